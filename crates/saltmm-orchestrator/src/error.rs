//! Error types for container orchestration.

use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors raised while deploying, driving, or tearing down a cluster.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No container is registered for the host.
    #[error("no container for host {0}")]
    ContainerNotFound(String),

    /// Image pull failed.
    #[error("failed to pull image {image}: {reason}")]
    ImagePullFailed {
        /// Image reference.
        image: String,
        /// Failure reason.
        reason: String,
    },

    /// Container could not be created or started.
    #[error("failed to start container {name}: {reason}")]
    ContainerStartFailed {
        /// Container name.
        name: String,
        /// Failure reason.
        reason: String,
    },

    /// An exec session inside a container failed at the runtime level.
    #[error("exec failed in container {container}: {reason}")]
    ExecFailed {
        /// Container name or ID.
        container: String,
        /// Failure reason.
        reason: String,
    },

    /// Network creation failed.
    #[error("failed to create network {name}: {reason}")]
    NetworkCreationFailed {
        /// Network name.
        name: String,
        /// Failure reason.
        reason: String,
    },

    /// Deployment failed.
    #[error("deployment failed: {0}")]
    DeploymentFailed(String),

    /// One or more resources could not be released.
    #[error("teardown failed: {0}")]
    TeardownFailed(String),

    /// Container reported an unhealthy status.
    #[error("health check failed for {container}: {reason}")]
    HealthCheckFailed {
        /// Container name or ID.
        container: String,
        /// Failure reason.
        reason: String,
    },

    /// Timed out waiting for a condition.
    #[error("timeout waiting for {condition}")]
    Timeout {
        /// The condition being waited on.
        condition: String,
    },

    /// The backend does not implement the operation.
    #[error("capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Compose or report (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Topology failed validation.
    #[error("validation error: {0}")]
    Validation(String),
}

impl OrchestratorError {
    /// Creates a container not found error.
    pub fn container_not_found(host: impl Into<String>) -> Self {
        Self::ContainerNotFound(host.into())
    }

    /// Creates an image pull failed error.
    pub fn image_pull_failed(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImagePullFailed {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container start failed error.
    pub fn container_start_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerStartFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an exec failed error.
    pub fn exec_failed(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecFailed {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Creates a network creation failed error.
    pub fn network_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetworkCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a deployment failed error.
    pub fn deployment_failed(reason: impl Into<String>) -> Self {
        Self::DeploymentFailed(reason.into())
    }

    /// Creates a teardown failed error.
    pub fn teardown_failed(reason: impl Into<String>) -> Self {
        Self::TeardownFailed(reason.into())
    }

    /// Creates a health check failed error.
    pub fn health_check_failed(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HealthCheckFailed {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(condition: impl Into<String>) -> Self {
        Self::Timeout {
            condition: condition.into(),
        }
    }

    /// Creates a capability not supported error.
    pub fn capability_not_supported(cap: impl Into<String>) -> Self {
        Self::CapabilityNotSupported(cap.into())
    }

    /// Creates a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    /// Creates a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound(_))
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::container_not_found("master1");
        assert_eq!(err.to_string(), "no container for host master1");

        let err = OrchestratorError::timeout("master1 to become healthy");
        assert_eq!(err.to_string(), "timeout waiting for master1 to become healthy");
    }

    #[test]
    fn test_error_is_not_found() {
        assert!(OrchestratorError::container_not_found("minion1").is_not_found());
        assert!(!OrchestratorError::timeout("x").is_not_found());
    }
}
