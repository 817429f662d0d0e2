//! Readiness polling.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, ScenarioError};
use crate::executor::{HostExecutor, ProbeResult};
use crate::expect::{check_all, Expectation};
use crate::host::SaltHost;

/// How long and how often to re-run a probe until it passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    /// Give up after this long.
    pub timeout: Duration,

    /// Pause between attempts.
    pub interval: Duration,

    /// Upper bound on a single command.
    pub exec_timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(2),
            exec_timeout: Duration::from_secs(120),
        }
    }
}

impl ReadinessPolicy {
    /// Creates a policy.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            ..Self::default()
        }
    }

    /// Sets the per-command time limit.
    pub fn with_exec_timeout(mut self, exec_timeout: Duration) -> Self {
        self.exec_timeout = exec_timeout;
        self
    }
}

/// Successful readiness wait.
#[derive(Debug, Clone)]
pub struct Ready {
    /// The passing probe.
    pub probe: ProbeResult,

    /// Attempts made, including the passing one.
    pub attempts: u32,
}

/// Re-runs `command` on `host` until every expectation holds.
///
/// Runtime errors, including a command outliving the executor's time limit,
/// are not retried. When the timeout passes, the error carries the mismatch of
/// the last attempt.
pub async fn eventually(
    executor: &HostExecutor,
    host: SaltHost,
    command: &str,
    expect: &[Expectation],
    policy: &ReadinessPolicy,
) -> Result<Ready> {
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let probe = executor.exec(host, command).await?;

        let detail = match check_all(expect, &probe) {
            Ok(()) => {
                if attempts > 1 {
                    info!(host = %host, command = %command, attempts, "Ready");
                }
                return Ok(Ready { probe, attempts });
            }
            Err(detail) => detail,
        };

        let elapsed = start.elapsed();
        if elapsed + policy.interval > policy.timeout {
            return Err(ScenarioError::timeout(
                host.as_str(),
                command,
                elapsed,
                format!("{} (after {} attempts)", detail, attempts),
            ));
        }

        debug!(host = %host, command = %command, attempt = attempts, detail = %detail, "Not ready yet");
        tokio::time::sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salt::SaltCommand;
    use crate::sim::SimulatedCluster;
    use crate::transport::Transport;
    use saltmm_orchestrator::{ClusterTopology, NodeSpec, OrchestrationBackend};
    use std::sync::Arc;

    async fn deployed() -> (Arc<SimulatedCluster>, HostExecutor) {
        let sim = Arc::new(SimulatedCluster::new(Transport::Zeromq));
        let topology = ClusterTopology::builder("wait")
            .node(NodeSpec::builder("master1", "salt").build())
            .node(NodeSpec::builder("master2", "salt").build())
            .node(NodeSpec::builder("minion1", "salt").build())
            .build();
        sim.deploy(&topology).await.unwrap();
        let executor = HostExecutor::new(sim.clone());
        (sim, executor)
    }

    fn ping_ok() -> Vec<Expectation> {
        vec![Expectation::Success]
    }

    #[test]
    fn test_default_policy() {
        let policy = ReadinessPolicy::default();
        assert_eq!(policy.timeout, Duration::from_secs(300));
        assert_eq!(policy.interval, Duration::from_secs(2));
        assert_eq!(policy.exec_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_new_keeps_default_exec_timeout() {
        let policy = ReadinessPolicy::new(Duration::from_secs(10), Duration::from_millis(500))
            .with_exec_timeout(Duration::from_secs(15));
        assert_eq!(policy.interval, Duration::from_millis(500));
        assert_eq!(policy.exec_timeout, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_waits_for_master() {
        let (sim, executor) = deployed().await;
        executor.exec(SaltHost::Master2, "pkill salt-master").await.unwrap();

        let starter = {
            let sim = Arc::clone(&sim);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                sim.exec(&SaltHost::Master2.host_name(), &["salt-master", "-d"])
                    .await
                    .unwrap();
            })
        };

        let policy = ReadinessPolicy::new(Duration::from_secs(30), Duration::from_secs(2));
        let ready = eventually(
            &executor,
            SaltHost::Master2,
            SaltCommand::TestPing.as_str(),
            &ping_ok(),
            &policy,
        )
        .await
        .unwrap();

        starter.await.unwrap();
        assert_eq!(ready.attempts, 4);
        assert!(ready.probe.contains("True"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_times_out_with_last_mismatch() {
        let (_sim, executor) = deployed().await;
        executor.exec(SaltHost::Master2, "pkill salt-master").await.unwrap();

        let policy = ReadinessPolicy::new(Duration::from_secs(10), Duration::from_secs(2));
        let err = eventually(
            &executor,
            SaltHost::Master2,
            SaltCommand::TestPing.as_str(),
            &ping_ok(),
            &policy,
        )
        .await
        .unwrap_err();

        match err {
            ScenarioError::Timeout { host, detail, .. } => {
                assert_eq!(host, "master2");
                assert!(detail.contains("after 6 attempts"), "{}", detail);
            }
            other => panic!("expected a timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_eventually_propagates_runtime_errors() {
        let sim = Arc::new(SimulatedCluster::new(Transport::Tcp));
        let executor = HostExecutor::new(sim);

        let err = eventually(
            &executor,
            SaltHost::Master1,
            SaltCommand::TestPing.as_str(),
            &ping_ok(),
            &ReadinessPolicy::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScenarioError::Orchestrator(_)));
    }
}
