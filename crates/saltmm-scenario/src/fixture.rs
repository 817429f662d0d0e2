//! Per-scenario cluster setup and teardown.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use saltmm_orchestrator::{ClusterTopology, DeployedCluster, OrchestrationBackend};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::ScenarioDriver;
use crate::error::Result;
use crate::executor::HostExecutor;
use crate::expect::Expectation;
use crate::host::SaltHost;
use crate::report::ScenarioReport;
use crate::salt::SaltCommand;
use crate::scenario::Scenario;
use crate::transport::Transport;
use crate::wait::{eventually, ReadinessPolicy};

/// Label recording the transport a cluster was built for.
pub const TRANSPORT_LABEL: &str = "saltmm.transport";

/// Lines of container output kept per host when a scenario fails.
pub const FAILURE_LOG_LINES: usize = 50;

/// Loads the compose file for `transport` from `compose_dir`.
///
/// The topology gets a unique name so resources of concurrent or leftover
/// runs never collide.
pub fn load_topology(compose_dir: &Path, transport: Transport, label: &str) -> Result<ClusterTopology> {
    let path = compose_dir.join(transport.compose_file_name());
    let mut topology = ClusterTopology::from_compose_file(&path)?;

    let suffix = Uuid::new_v4().simple().to_string();
    topology.name = format!(
        "{}-{}-{}",
        transport,
        label.replace('_', "-"),
        &suffix[..8]
    );
    topology
        .global_labels
        .insert(TRANSPORT_LABEL.to_string(), transport.to_string());

    Ok(topology)
}

/// A deployed two-master, one-minion cluster that answers Salt commands.
pub struct MultiMasterFixture {
    backend: Arc<dyn OrchestrationBackend>,
    cluster: Option<DeployedCluster>,
    executor: HostExecutor,
    transport: Transport,
}

impl MultiMasterFixture {
    /// Deploys the topology and waits until the cluster is usable.
    ///
    /// Usable means both master daemons and the minion daemon are running
    /// and `salt * test.ping` succeeds from each master. If the cluster never
    /// gets there it is torn down before the error is returned.
    pub async fn setup(
        backend: Arc<dyn OrchestrationBackend>,
        topology: &ClusterTopology,
        transport: Transport,
        policy: &ReadinessPolicy,
    ) -> Result<Self> {
        info!(
            cluster = %topology.name,
            transport = %transport,
            backend = backend.name(),
            "Setting up multi-master cluster"
        );

        let cluster = backend.deploy(topology).await?;
        let fixture = Self {
            executor: HostExecutor::new(Arc::clone(&backend)).with_exec_timeout(policy.exec_timeout),
            backend,
            cluster: Some(cluster),
            transport,
        };

        if let Err(e) = fixture.wait_until_ready(policy).await {
            warn!(cluster = %topology.name, error = %e, "Cluster never became ready");
            if let Err(teardown_err) = fixture.teardown().await {
                warn!(error = %teardown_err, "Teardown after failed setup was incomplete");
            }
            return Err(e);
        }

        info!(cluster = %topology.name, "Cluster ready");
        Ok(fixture)
    }

    async fn wait_until_ready(&self, policy: &ReadinessPolicy) -> Result<()> {
        for host in SaltHost::ALL {
            eventually(
                &self.executor,
                host,
                &host.daemon().liveness_command(),
                &[Expectation::Success],
                policy,
            )
            .await?;
        }
        for master in SaltHost::MASTERS {
            eventually(
                &self.executor,
                master,
                SaltCommand::TestPing.as_str(),
                &[Expectation::Success],
                policy,
            )
            .await?;
        }
        Ok(())
    }

    /// Returns the executor bound to this cluster.
    pub fn executor(&self) -> &HostExecutor {
        &self.executor
    }

    /// Returns the transport the cluster runs.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns the deployed cluster, until teardown.
    pub fn cluster(&self) -> Option<&DeployedCluster> {
        self.cluster.as_ref()
    }

    /// Reads the last `tail` lines of each host's output. Hosts whose logs
    /// cannot be read are left out.
    pub async fn collect_logs(&self, tail: usize) -> BTreeMap<String, String> {
        let mut logs = BTreeMap::new();
        for host in SaltHost::ALL {
            match self.backend.logs(&host.host_name(), Some(tail)).await {
                Ok(text) => {
                    logs.insert(host.to_string(), text);
                }
                Err(e) => debug!(host = %host, error = %e, "Could not read logs"),
            }
        }
        logs
    }

    /// Releases every container, the network, and the volumes.
    pub async fn teardown(mut self) -> Result<()> {
        if let Some(cluster) = self.cluster.take() {
            info!(cluster = %cluster.topology.name, "Tearing down multi-master cluster");
            self.backend.teardown(&cluster).await?;
        }
        Ok(())
    }
}

impl Drop for MultiMasterFixture {
    fn drop(&mut self) {
        if let Some(cluster) = self.cluster.as_ref() {
            warn!(
                cluster = %cluster.topology.name,
                "Fixture dropped without teardown; containers may be left behind"
            );
        }
    }
}

/// Sets up a cluster, runs one scenario on it, and always tears it down.
///
/// Setup failures are returned as errors. Scenario failures are part of the
/// returned report.
pub async fn run_scenario(
    backend: Arc<dyn OrchestrationBackend>,
    topology: &ClusterTopology,
    transport: Transport,
    policy: &ReadinessPolicy,
    scenario: &Scenario,
) -> Result<ScenarioReport> {
    let fixture = MultiMasterFixture::setup(backend, topology, transport, policy).await?;

    let driver = ScenarioDriver::new(fixture.executor().clone(), *policy);
    let mut report = driver.run(scenario).await;
    report.transport = Some(transport);
    if !report.passed() {
        report.logs = fixture.collect_logs(FAILURE_LOG_LINES).await;
    }

    if let Err(e) = fixture.teardown().await {
        if report.passed() {
            return Err(e);
        }
        warn!(scenario = %scenario.name, error = %e, "Teardown failed after a failed scenario");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_topology_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("docker-compose-tcp.yml"),
            "services:\n  master1:\n    image: salt\n  minion1:\n    image: salt\n    depends_on: [master1]\n",
        )
        .unwrap();

        let a = load_topology(dir.path(), Transport::Tcp, "multi_master").unwrap();
        let b = load_topology(dir.path(), Transport::Tcp, "multi_master").unwrap();
        assert!(a.name.starts_with("tcp-multi-master-"));
        assert_ne!(a.name, b.name);
        assert_eq!(
            a.global_labels.get(TRANSPORT_LABEL).map(String::as_str),
            Some("tcp")
        );
    }

    #[test]
    fn test_load_topology_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_topology(dir.path(), Transport::Zeromq, "x").is_err());
    }
}
