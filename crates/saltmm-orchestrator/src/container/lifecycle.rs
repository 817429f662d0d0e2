//! Runtime state of deployed containers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::host::HostName;

/// Handle to a container backing one logical host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Container ID assigned by the runtime.
    pub container_id: String,

    /// Logical host this container backs.
    pub host: HostName,

    /// Runtime container name (project-prefixed).
    pub name: String,

    /// Last known state.
    pub state: ContainerState,

    /// Creation timestamp (Unix milliseconds).
    pub created_at: u64,
}

impl ContainerHandle {
    /// Creates a handle in the `Created` state.
    pub fn new(
        container_id: impl Into<String>,
        host: HostName,
        name: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            host,
            name: name.into(),
            state: ContainerState::Created,
            created_at,
        }
    }

    /// Returns true if the container is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state, ContainerState::Running)
    }
}

/// Container state as tracked by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Created but not started.
    Created,

    /// Running.
    Running,
}

/// Registry of container handles keyed by host.
#[derive(Debug, Default)]
pub struct LifecycleManager {
    containers: Arc<RwLock<BTreeMap<HostName, ContainerHandle>>>,
}

impl LifecycleManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container, replacing any previous handle for the host.
    pub async fn register(&self, handle: ContainerHandle) {
        let mut containers = self.containers.write().await;
        containers.insert(handle.host.clone(), handle);
    }

    /// Unregisters a container.
    pub async fn unregister(&self, host: &HostName) -> Option<ContainerHandle> {
        let mut containers = self.containers.write().await;
        containers.remove(host)
    }

    /// Gets a container handle.
    pub async fn get(&self, host: &HostName) -> Option<ContainerHandle> {
        let containers = self.containers.read().await;
        containers.get(host).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_handle() {
        let mut handle = ContainerHandle::new(
            "abc123def456",
            HostName::from("master1"),
            "saltmm-1a2b-master1",
            1000,
        );
        assert_eq!(handle.state, ContainerState::Created);
        assert!(!handle.is_running());

        handle.state = ContainerState::Running;
        assert!(handle.is_running());
    }

    #[tokio::test]
    async fn test_lifecycle_manager() {
        let manager = LifecycleManager::new();
        let host = HostName::from("minion1");

        manager
            .register(ContainerHandle::new("c-1", host.clone(), "saltmm-minion1", 1000))
            .await;
        assert_eq!(manager.get(&host).await.unwrap().name, "saltmm-minion1");

        let mut replacement = ContainerHandle::new("c-2", host.clone(), "saltmm-minion1", 2000);
        replacement.state = ContainerState::Running;
        manager.register(replacement).await;
        let current = manager.get(&host).await.unwrap();
        assert_eq!(current.container_id, "c-2");
        assert!(current.is_running());

        assert!(manager.unregister(&host).await.is_some());
        assert!(manager.get(&host).await.is_none());
        assert!(manager.unregister(&host).await.is_none());
    }
}
