//! Error types for scenario execution.

use std::time::Duration;

use saltmm_orchestrator::OrchestratorError;
use thiserror::Error;

/// Result type alias for scenario operations.
pub type Result<T> = std::result::Result<T, ScenarioError>;

/// Errors that can occur while preparing or running a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The container runtime failed underneath a command.
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// A probe did not produce the expected exit code or output.
    #[error("Step {step} failed on {host} running `{command}`: {detail}")]
    AssertionFailed {
        step: usize,
        host: String,
        command: String,
        detail: String,
    },

    /// A readiness probe never passed.
    #[error("Timed out after {elapsed:?} waiting for `{command}` on {host}: {detail}")]
    Timeout {
        host: String,
        command: String,
        elapsed: Duration,
        detail: String,
    },

    /// No scenario is registered under the given name.
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An I/O error occurred while writing a report.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A report could not be serialized.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScenarioError {
    /// Creates an assertion failure.
    pub fn assertion_failed(
        step: usize,
        host: impl Into<String>,
        command: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::AssertionFailed {
            step,
            host: host.into(),
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// Creates a readiness timeout.
    pub fn timeout(
        host: impl Into<String>,
        command: impl Into<String>,
        elapsed: Duration,
        detail: impl Into<String>,
    ) -> Self {
        Self::Timeout {
            host: host.into(),
            command: command.into(),
            elapsed,
            detail: detail.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Checks if the error is a failed check on the system under test,
    /// as opposed to a problem with the harness or the runtime.
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            ScenarioError::AssertionFailed { .. } | ScenarioError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertion_message() {
        let err = ScenarioError::assertion_failed(
            3,
            "master1",
            "salt * test.ping",
            "expected exit code 0, got 1",
        );
        assert_eq!(
            err.to_string(),
            "Step 3 failed on master1 running `salt * test.ping`: expected exit code 0, got 1"
        );
        assert!(err.is_assertion());
    }

    #[test]
    fn test_orchestrator_error_converts() {
        let err: ScenarioError = OrchestratorError::container_not_found("minion1").into();
        assert!(matches!(err, ScenarioError::Orchestrator(_)));
        assert!(!err.is_assertion());
    }

    #[test]
    fn test_timeout_is_assertion() {
        let err = ScenarioError::timeout("master2", "pgrep salt-master", Duration::from_secs(5), "exit 1");
        assert!(err.is_assertion());
        assert!(err.to_string().contains("pgrep salt-master"));
    }
}
