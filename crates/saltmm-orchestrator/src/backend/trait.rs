//! Orchestration backend trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::container::ContainerHandle;
use crate::error::{OrchestratorError, Result};
use crate::host::HostName;
use crate::topology::{ClusterTopology, DeployedCluster};

/// A container runtime that can host a test cluster.
///
/// # Lifecycle
///
/// 1. `deploy()` creates the network, volumes, and containers
/// 2. `exec()` drives commands inside containers while a scenario runs
/// 3. `teardown()` releases everything `deploy()` created
///
/// Implementations are `Send + Sync` so a backend can be shared behind an
/// `Arc` between the fixture and the scenario driver.
#[async_trait]
pub trait OrchestrationBackend: Send + Sync {
    /// Deploys a cluster.
    ///
    /// Containers are started in dependency order. A container with a health
    /// check must report healthy before the next one starts. On failure,
    /// everything created so far is torn down before the error is returned.
    async fn deploy(&self, topology: &ClusterTopology) -> Result<DeployedCluster>;

    /// Tears down a deployed cluster.
    ///
    /// Keeps going after individual failures and reports them together.
    async fn teardown(&self, cluster: &DeployedCluster) -> Result<()>;

    /// Gets the handle of the container backing a host.
    async fn get_container(&self, host: &HostName) -> Result<ContainerHandle>;

    /// Executes a command inside a host's container and waits for it.
    ///
    /// A non-zero exit code is not an error; only runtime failures are.
    async fn exec(&self, host: &HostName, cmd: &[&str]) -> Result<ExecOutput>;

    /// Returns the backend name.
    fn name(&self) -> &str;

    /// Checks if the backend can reach its runtime.
    async fn is_ready(&self) -> bool {
        true
    }

    /// Gets the last `tail` lines of a host's container output, or all of
    /// it when `tail` is `None`. Attached to reports of failed scenarios.
    async fn logs(&self, host: &HostName, tail: Option<usize>) -> Result<String> {
        let _ = (host, tail);
        Err(OrchestratorError::capability_not_supported("logs"))
    }
}

/// Output of a command executed in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,

    /// Both streams as raw bytes, in arrival order.
    pub combined: Vec<u8>,

    /// Exit code; `-1` when the runtime did not report one.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Creates an output where the combined stream is stdout then stderr.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        let stdout = stdout.into();
        let stderr = stderr.into();
        let mut combined = stdout.clone().into_bytes();
        combined.extend_from_slice(stderr.as_bytes());
        Self {
            stdout,
            stderr,
            combined,
            exit_code,
        }
    }

    /// Returns true if the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output decoded lossily.
    pub fn combined_lossy(&self) -> String {
        String::from_utf8_lossy(&self.combined).into_owned()
    }
}

/// A boxed orchestration backend for dynamic dispatch.
pub type BoxedBackend = Box<dyn OrchestrationBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output() {
        let output = ExecOutput::new("minion1:\n    True\n", "", 0);
        assert!(output.success());
        assert_eq!(output.combined_lossy(), "minion1:\n    True\n");

        let output = ExecOutput::new("", "[ERROR] Salt request timed out.", 1);
        assert!(!output.success());
        assert_eq!(output.combined, b"[ERROR] Salt request timed out.".to_vec());
    }

    #[test]
    fn test_exec_output_combined_order() {
        let output = ExecOutput::new("out\n", "err\n", 2);
        assert_eq!(output.combined_lossy(), "out\nerr\n");
    }
}
