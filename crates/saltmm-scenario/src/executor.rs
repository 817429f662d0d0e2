//! Runs command lines on logical hosts.

use std::sync::Arc;
use std::time::Duration;

use saltmm_orchestrator::{words, ExecOutput, OrchestrationBackend, OrchestratorError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::host::SaltHost;

/// Exit code and raw output of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Exit code reported by the runtime.
    pub exit_code: i64,

    /// Stdout and stderr interleaved, as raw bytes.
    pub output: Vec<u8>,
}

impl ProbeResult {
    /// Creates a probe result.
    pub fn new(exit_code: i64, output: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Returns true if the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns true if `needle` occurs anywhere in the raw output.
    pub fn contains(&self, needle: &str) -> bool {
        let needle = needle.as_bytes();
        needle.is_empty() || self.output.windows(needle.len()).any(|w| w == needle)
    }

    /// Returns the output decoded lossily.
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Returns at most the last `max` characters of the output, for messages.
    pub fn output_tail(&self, max: usize) -> String {
        let text = self.output_lossy();
        let text = text.trim_end();
        let count = text.chars().count();
        if count <= max {
            text.to_string()
        } else {
            let tail: String = text.chars().skip(count - max).collect();
            format!("...{}", tail)
        }
    }
}

impl From<ExecOutput> for ProbeResult {
    fn from(output: ExecOutput) -> Self {
        Self {
            exit_code: output.exit_code,
            output: output.combined,
        }
    }
}

/// Executes commands inside the container backing a [`SaltHost`].
///
/// Command lines are split into words without a shell, so `salt *` reaches
/// `salt` with a literal `*`. Every call runs exactly once and is abandoned
/// after the executor's time limit.
#[derive(Clone)]
pub struct HostExecutor {
    backend: Arc<dyn OrchestrationBackend>,
    exec_timeout: Duration,
}

impl HostExecutor {
    /// Default limit for a single command.
    pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

    /// Creates an executor over a deployed backend.
    pub fn new(backend: Arc<dyn OrchestrationBackend>) -> Self {
        Self {
            backend,
            exec_timeout: Self::DEFAULT_EXEC_TIMEOUT,
        }
    }

    /// Sets the limit for a single command.
    pub fn with_exec_timeout(mut self, exec_timeout: Duration) -> Self {
        self.exec_timeout = exec_timeout;
        self
    }

    /// Runs `command` on `host` and waits for it to finish.
    ///
    /// A command still running after the time limit fails with
    /// [`OrchestratorError::Timeout`].
    pub async fn exec(&self, host: SaltHost, command: &str) -> Result<ProbeResult> {
        let argv = words::split(command)?;
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();

        debug!(host = %host, command = %command, "exec");
        let output = tokio::time::timeout(self.exec_timeout, self.backend.exec(&host.host_name(), &args))
            .await
            .map_err(|_| {
                warn!(host = %host, command = %command, limit_secs = self.exec_timeout.as_secs(), "exec timed out");
                OrchestratorError::timeout(format!(
                    "`{}` on {} to finish within {:?}",
                    command, host, self.exec_timeout
                ))
            })??;
        let probe = ProbeResult::from(output);
        debug!(
            host = %host,
            command = %command,
            exit_code = probe.exit_code,
            output = %probe.output_tail(200),
            "exec finished"
        );

        Ok(probe)
    }
}

impl std::fmt::Debug for HostExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostExecutor")
            .field("backend", &self.backend.name())
            .field("exec_timeout", &self.exec_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltmm_orchestrator::OrchestrationBackend;

    #[test]
    fn test_contains_bytes() {
        let probe = ProbeResult::new(
            1,
            b"[ERROR] Salt request timed out. The master is not responding.".to_vec(),
        );
        assert!(probe.contains("The master is not responding"));
        assert!(!probe.contains("No master could be reached"));
        assert!(probe.contains(""));
        assert!(!probe.success());
    }

    #[test]
    fn test_output_tail() {
        let probe = ProbeResult::new(0, "minion1:\n    True\n");
        assert_eq!(probe.output_tail(100), "minion1:\n    True");
        assert_eq!(probe.output_tail(4), "...True");
    }

    #[test]
    fn test_from_exec_output_uses_combined_stream() {
        let probe = ProbeResult::from(ExecOutput::new("out", "err", 2));
        assert_eq!(probe.exit_code, 2);
        assert_eq!(probe.output, b"outerr".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_gives_up_after_time_limit() {
        use crate::error::ScenarioError;
        use crate::sim::{SimFault, SimulatedCluster};
        use crate::transport::Transport;
        use saltmm_orchestrator::{ClusterTopology, NodeSpec};

        let sim = Arc::new(SimulatedCluster::new(Transport::Tcp).with_fault(SimFault::CallRetriesForever));
        let topology = ClusterTopology::builder("executor")
            .node(NodeSpec::builder("master1", "salt").build())
            .node(NodeSpec::builder("minion1", "salt").build())
            .build();
        sim.deploy(&topology).await.unwrap();

        let executor = HostExecutor::new(sim.clone()).with_exec_timeout(Duration::from_secs(5));
        let ping = executor.exec(SaltHost::Minion1, "salt-call test.ping").await.unwrap();
        assert!(ping.success());

        executor.exec(SaltHost::Master1, "pkill salt-master").await.unwrap();
        let started = tokio::time::Instant::now();
        let err = executor
            .exec(SaltHost::Minion1, "salt-call test.ping")
            .await
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(matches!(
            err,
            ScenarioError::Orchestrator(OrchestratorError::Timeout { .. })
        ));
        assert!(err.to_string().contains("`salt-call test.ping` on minion1 to finish within 5s"));
    }
}
