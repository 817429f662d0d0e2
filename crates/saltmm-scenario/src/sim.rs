//! In-memory stand-in for a Salt multi-master cluster.
//!
//! [`SimulatedCluster`] implements [`OrchestrationBackend`] without any
//! containers. It keeps track of which daemons run on which host and which
//! masters each minion is connected to, and answers the Salt commands the
//! scenarios use with the exit codes and texts the real CLI produces. Faults
//! can be switched on to check that the harness notices broken failover.

use async_trait::async_trait;
use saltmm_orchestrator::{
    ClusterTopology, ContainerHandle, ContainerState, DeployedCluster, ExecOutput, HostName,
    NodeRole, OrchestrationBackend, OrchestratorError, Result,
};
use saltmm_orchestrator::container::LifecycleManager;
use saltmm_orchestrator::topology::DeploymentState;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::salt::{SaltDaemon, MASTER_NOT_RESPONDING, NO_MASTER_REACHABLE};
use crate::transport::Transport;

/// Broken behaviors the simulation can exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimFault {
    /// A minion started with no master up exits instead of retrying.
    MinionExitsWithoutMaster,
    /// A minion never connects to a master that starts after it.
    NoReconnect,
    /// `pkill salt-master` reports success but the master keeps running.
    ZombieMaster,
    /// `config.get transport` reports this transport instead of the real one.
    ReportsTransport(Transport),
    /// `salt-master -d` fails.
    MasterStartFails,
    /// `salt-call` never returns while no master is up, as with a minion
    /// configured with `master_tries: -1`.
    CallRetriesForever,
}

/// One command the simulation executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    /// Host the command ran on.
    pub host: HostName,
    /// Command line, words joined by spaces.
    pub command: String,
    /// Exit code returned.
    pub exit_code: i64,
}

#[derive(Debug, Default)]
struct SimState {
    deployment_id: Option<String>,
    roles: BTreeMap<HostName, SaltDaemon>,
    running: BTreeSet<HostName>,
    connections: BTreeMap<HostName, BTreeSet<HostName>>,
    history: Vec<ExecRecord>,
    deployments: u32,
    teardowns: u32,
}

impl SimState {
    fn masters(&self) -> impl Iterator<Item = &HostName> {
        self.roles
            .iter()
            .filter(|(_, d)| **d == SaltDaemon::Master)
            .map(|(h, _)| h)
    }

    fn minions(&self) -> impl Iterator<Item = &HostName> {
        self.roles
            .iter()
            .filter(|(_, d)| **d == SaltDaemon::Minion)
            .map(|(h, _)| h)
    }

    fn running_masters(&self) -> BTreeSet<HostName> {
        self.masters()
            .filter(|m| self.running.contains(*m))
            .cloned()
            .collect()
    }
}

/// Simulated multi-master cluster.
pub struct SimulatedCluster {
    transport: Transport,
    faults: HashSet<SimFault>,
    lifecycle: LifecycleManager,
    state: Mutex<SimState>,
}

impl SimulatedCluster {
    /// Creates a healthy simulation for a transport.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            faults: HashSet::new(),
            lifecycle: LifecycleManager::new(),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Switches on a fault.
    pub fn with_fault(mut self, fault: SimFault) -> Self {
        self.faults.insert(fault);
        self
    }

    /// Returns the simulated transport.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns true if the host's daemon is running.
    pub async fn is_running(&self, host: &HostName) -> bool {
        self.state.lock().await.running.contains(host)
    }

    /// Masters a minion is connected to.
    pub async fn connections(&self, minion: &HostName) -> Vec<HostName> {
        self.state
            .lock()
            .await
            .connections
            .get(minion)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every command executed so far, in order.
    pub async fn history(&self) -> Vec<ExecRecord> {
        self.state.lock().await.history.clone()
    }

    /// Number of successful deployments.
    pub async fn deployments(&self) -> u32 {
        self.state.lock().await.deployments
    }

    /// Number of teardowns.
    pub async fn teardowns(&self) -> u32 {
        self.state.lock().await.teardowns
    }

    /// Returns true while a cluster is deployed.
    pub async fn is_deployed(&self) -> bool {
        self.state.lock().await.deployment_id.is_some()
    }

    fn has(&self, fault: SimFault) -> bool {
        self.faults.contains(&fault)
    }

    fn reported_transport(&self) -> Transport {
        self.faults
            .iter()
            .find_map(|f| match f {
                SimFault::ReportsTransport(t) => Some(*t),
                _ => None,
            })
            .unwrap_or(self.transport)
    }

    fn start_daemon(&self, state: &mut SimState, host: &HostName) {
        let Some(daemon) = state.roles.get(host).copied() else {
            return;
        };
        state.running.insert(host.clone());

        match daemon {
            SaltDaemon::Master => {
                if self.has(SimFault::NoReconnect) {
                    return;
                }
                let minions: Vec<HostName> = state
                    .minions()
                    .filter(|m| state.running.contains(*m))
                    .cloned()
                    .collect();
                for minion in minions {
                    state.connections.entry(minion).or_default().insert(host.clone());
                }
            }
            SaltDaemon::Minion => {
                let masters = state.running_masters();
                if masters.is_empty() && self.has(SimFault::MinionExitsWithoutMaster) {
                    state.running.remove(host);
                    debug!(host = %host, "Minion exited with no master reachable");
                }
                state.connections.insert(host.clone(), masters);
            }
        }
    }

    fn stop_daemon(&self, state: &mut SimState, host: &HostName) {
        state.running.remove(host);
        match state.roles.get(host) {
            Some(SaltDaemon::Master) => {
                for connected in state.connections.values_mut() {
                    connected.remove(host);
                }
            }
            Some(SaltDaemon::Minion) => {
                state.connections.remove(host);
            }
            None => {}
        }
    }

    fn run(&self, state: &mut SimState, host: &HostName, argv: &[&str]) -> ExecOutput {
        let daemon = state.roles.get(host).copied();
        let owns = |name: &str| daemon.map(|d| d.process_name()) == Some(name);

        match argv {
            ["pgrep", name] => {
                if owns(name) && state.running.contains(host) {
                    ExecOutput::new(format!("{}\n", pid_of(host)), "", 0)
                } else {
                    ExecOutput::new("", "", 1)
                }
            }
            ["pkill", rest @ ..] if !rest.is_empty() => {
                let name = rest[rest.len() - 1];
                if !(owns(name) && state.running.contains(host)) {
                    return ExecOutput::new("", "", 1);
                }
                if daemon == Some(SaltDaemon::Master) && self.has(SimFault::ZombieMaster) {
                    return ExecOutput::new("", "", 0);
                }
                self.stop_daemon(state, host);
                ExecOutput::new("", "", 0)
            }
            [name, "-d"] if *name == "salt-master" || *name == "salt-minion" => {
                if !owns(name) {
                    return ExecOutput::new(
                        "",
                        format!("exec: \"{}\": executable file not found in $PATH\n", name),
                        127,
                    );
                }
                if daemon == Some(SaltDaemon::Master) && self.has(SimFault::MasterStartFails) {
                    return ExecOutput::new(
                        "",
                        "[ERROR   ] Failed to bind to 0.0.0.0:4506: address already in use\n",
                        1,
                    );
                }
                self.start_daemon(state, host);
                ExecOutput::new("", "", 0)
            }
            ["salt", target, function, args @ ..] => self.salt(state, host, target, function, args),
            ["salt-call", "test.ping"] => self.salt_call(state, host),
            [program, ..] => ExecOutput::new(
                "",
                format!("exec: \"{}\": executable file not found in $PATH\n", program),
                127,
            ),
            [] => ExecOutput::new("", "no command specified\n", 126),
        }
    }

    fn salt(
        &self,
        state: &SimState,
        host: &HostName,
        target: &str,
        function: &str,
        args: &[&str],
    ) -> ExecOutput {
        if state.roles.get(host) != Some(&SaltDaemon::Master) {
            return ExecOutput::new("", "exec: \"salt\": executable file not found in $PATH\n", 127);
        }
        if !state.running.contains(host) {
            return ExecOutput::new(
                "",
                format!(
                    "[ERROR   ] {}. You may need to run your command with `--async` in order to bypass the congested event bus.\n",
                    MASTER_NOT_RESPONDING
                ),
                1,
            );
        }

        let minions: Vec<&HostName> = state
            .minions()
            .filter(|m| target == "*" || m.as_str() == target)
            .collect();
        if minions.is_empty() {
            return ExecOutput::new(
                "",
                "No minions matched the target. No command was sent, no jid was assigned.\nERROR: No return received\n",
                2,
            );
        }

        let value = match (function, args) {
            ("test.ping", []) | ("saltutil.refresh_pillar", []) => "True".to_string(),
            ("config.get", ["transport"]) => self.reported_transport().to_string(),
            _ => {
                return ExecOutput::new(format!("'{}' is not available.\n", function), "", 1);
            }
        };

        let mut stdout = String::new();
        let mut failed = false;
        for minion in minions {
            let connected = state
                .connections
                .get(minion)
                .map(|c| c.contains(host))
                .unwrap_or(false);
            if connected {
                let _ = write!(stdout, "{}:\n    {}\n", minion, value);
            } else {
                failed = true;
                let _ = write!(stdout, "{}:\n    Minion did not return. [Not connected]\n", minion);
            }
        }

        if failed {
            ExecOutput::new(stdout, "ERROR: Minions returned with non-zero exit code\n", 1)
        } else {
            ExecOutput::new(stdout, "", 0)
        }
    }

    fn salt_call(&self, state: &SimState, host: &HostName) -> ExecOutput {
        if state.roles.get(host) != Some(&SaltDaemon::Minion) {
            return ExecOutput::new("", "exec: \"salt-call\": executable file not found in $PATH\n", 127);
        }
        if state.running_masters().is_empty() {
            let message = format!(
                "{} or all masters denied the minion's connection attempt.",
                NO_MASTER_REACHABLE
            );
            return ExecOutput::new("", format!("[ERROR   ] {}\nERROR: {}\n", message, message), 2);
        }
        ExecOutput::new("local:\n    True\n", "", 0)
    }
}

fn pid_of(host: &HostName) -> u32 {
    100 + host.as_str().bytes().map(u32::from).sum::<u32>() % 900
}

fn daemon_for(role: &NodeRole) -> Option<SaltDaemon> {
    match role {
        NodeRole::Master => Some(SaltDaemon::Master),
        NodeRole::Minion => Some(SaltDaemon::Minion),
        NodeRole::Custom(_) => None,
    }
}

#[async_trait]
impl OrchestrationBackend for SimulatedCluster {
    async fn deploy(&self, topology: &ClusterTopology) -> Result<DeployedCluster> {
        topology.validate()?;

        let mut state = self.state.lock().await;
        if let Some(id) = state.deployment_id.as_ref() {
            return Err(OrchestratorError::deployment_failed(format!(
                "simulated cluster {} is already deployed",
                id
            )));
        }

        if topology.nodes_by_role(&NodeRole::Master).next().is_none() {
            return Err(OrchestratorError::validation("topology has no master"));
        }
        if topology.nodes_by_role(&NodeRole::Minion).next().is_none() {
            return Err(OrchestratorError::validation("topology has no minion"));
        }
        let roles: BTreeMap<HostName, SaltDaemon> = topology
            .iter_nodes()
            .filter_map(|node| daemon_for(&node.role).map(|d| (node.name.clone(), d)))
            .collect();

        state.deployments += 1;
        let deployment_id = format!("sim-{}-{}", topology.name, state.deployments);
        let mut cluster = DeployedCluster::new(topology.clone(), &deployment_id, 0);

        for node in topology.nodes_in_order() {
            let container_id = format!("{}-{}", deployment_id, node.name);
            let mut handle = ContainerHandle::new(&container_id, node.name.clone(), &container_id, 0);
            handle.state = ContainerState::Running;
            self.lifecycle.register(handle).await;
            cluster.container_ids.insert(node.name.clone(), container_id);
        }

        let history = std::mem::take(&mut state.history);
        let (deployments, teardowns) = (state.deployments, state.teardowns);
        *state = SimState {
            deployment_id: Some(deployment_id.clone()),
            roles,
            history,
            deployments,
            teardowns,
            ..Default::default()
        };

        let masters: Vec<HostName> = state.masters().cloned().collect();
        let minions: Vec<HostName> = state.minions().cloned().collect();
        for host in masters.iter().chain(minions.iter()) {
            self.start_daemon(&mut state, host);
        }

        cluster.state = DeploymentState::Running;
        info!(deployment_id = %deployment_id, transport = %self.transport, "Simulated cluster deployed");
        Ok(cluster)
    }

    async fn teardown(&self, cluster: &DeployedCluster) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.deployment_id.as_deref() != Some(cluster.deployment_id.as_str()) {
            return Err(OrchestratorError::teardown_failed(format!(
                "deployment {} is not active",
                cluster.deployment_id
            )));
        }

        for host in cluster.container_ids.keys() {
            self.lifecycle.unregister(host).await;
        }

        state.deployment_id = None;
        state.roles.clear();
        state.running.clear();
        state.connections.clear();
        state.teardowns += 1;

        info!(deployment_id = %cluster.deployment_id, "Simulated cluster torn down");
        Ok(())
    }

    async fn get_container(&self, host: &HostName) -> Result<ContainerHandle> {
        self.lifecycle
            .get(host)
            .await
            .ok_or_else(|| OrchestratorError::container_not_found(host.as_str()))
    }

    async fn exec(&self, host: &HostName, cmd: &[&str]) -> Result<ExecOutput> {
        let mut state = self.state.lock().await;
        if state.deployment_id.is_none() || !state.roles.contains_key(host) {
            return Err(OrchestratorError::container_not_found(host.as_str()));
        }

        if self.has(SimFault::CallRetriesForever)
            && cmd.first() == Some(&"salt-call")
            && state.roles.get(host) == Some(&SaltDaemon::Minion)
            && state.running_masters().is_empty()
        {
            state.history.push(ExecRecord {
                host: host.clone(),
                command: cmd.join(" "),
                exit_code: -1,
            });
            drop(state);
            debug!(host = %host, "salt-call retrying with no master up");
            return std::future::pending().await;
        }

        let output = self.run(&mut state, host, cmd);
        state.history.push(ExecRecord {
            host: host.clone(),
            command: cmd.join(" "),
            exit_code: output.exit_code,
        });
        Ok(output)
    }

    fn name(&self) -> &str {
        "simulated"
    }

    async fn logs(&self, host: &HostName, tail: Option<usize>) -> Result<String> {
        let state = self.state.lock().await;
        if !state.roles.contains_key(host) {
            return Err(OrchestratorError::container_not_found(host.as_str()));
        }
        let lines: Vec<String> = state
            .history
            .iter()
            .filter(|r| &r.host == host)
            .map(|r| format!("$ {} -> {}", r.command, r.exit_code))
            .collect();
        let skip = tail.map(|n| lines.len().saturating_sub(n)).unwrap_or(0);
        Ok(lines[skip..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltmm_orchestrator::NodeSpec;

    fn topology() -> ClusterTopology {
        ClusterTopology::builder("sim")
            .node(NodeSpec::builder("master1", "salt").role(NodeRole::Master).build())
            .node(NodeSpec::builder("master2", "salt").role(NodeRole::Master).build())
            .node(
                NodeSpec::builder("minion1", "salt")
                    .role(NodeRole::Minion)
                    .depends_on("master1")
                    .depends_on("master2")
                    .build(),
            )
            .build()
    }

    fn host(name: &str) -> HostName {
        HostName::new(name)
    }

    #[tokio::test]
    async fn test_deploy_connects_minion_to_both_masters() {
        let sim = SimulatedCluster::new(Transport::Tcp);
        sim.deploy(&topology()).await.unwrap();

        assert_eq!(
            sim.connections(&host("minion1")).await,
            vec![host("master1"), host("master2")]
        );
        let ping = sim.exec(&host("master1"), &["salt", "*", "test.ping"]).await.unwrap();
        assert_eq!(ping.exit_code, 0);
        assert_eq!(ping.stdout, "minion1:\n    True\n");
    }

    #[tokio::test]
    async fn test_killed_master_times_out() {
        let sim = SimulatedCluster::new(Transport::Zeromq);
        sim.deploy(&topology()).await.unwrap();

        let kill = sim.exec(&host("master1"), &["pkill", "salt-master"]).await.unwrap();
        assert_eq!(kill.exit_code, 0);
        let again = sim.exec(&host("master1"), &["pkill", "salt-master"]).await.unwrap();
        assert_eq!(again.exit_code, 1);

        let ping = sim.exec(&host("master1"), &["salt", "*", "test.ping"]).await.unwrap();
        assert_ne!(ping.exit_code, 0);
        assert!(ping.combined_lossy().contains(MASTER_NOT_RESPONDING));
        assert_eq!(sim.connections(&host("minion1")).await, vec![host("master2")]);
    }

    #[tokio::test]
    async fn test_salt_call_without_masters() {
        let sim = SimulatedCluster::new(Transport::Tcp);
        sim.deploy(&topology()).await.unwrap();
        for master in ["master1", "master2"] {
            sim.exec(&host(master), &["pkill", "salt-master"]).await.unwrap();
        }

        let call = sim.exec(&host("minion1"), &["salt-call", "test.ping"]).await.unwrap();
        assert_eq!(call.exit_code, 2);
        assert!(call.combined_lossy().contains(NO_MASTER_REACHABLE));
    }

    #[tokio::test]
    async fn test_minion_reconnects_when_master_returns() {
        let sim = SimulatedCluster::new(Transport::Tcp);
        sim.deploy(&topology()).await.unwrap();
        sim.exec(&host("master2"), &["pkill", "salt-master"]).await.unwrap();
        sim.exec(&host("minion1"), &["pkill", "salt-minion"]).await.unwrap();
        sim.exec(&host("minion1"), &["salt-minion", "-d"]).await.unwrap();
        assert_eq!(sim.connections(&host("minion1")).await, vec![host("master1")]);

        sim.exec(&host("master2"), &["salt-master", "-d"]).await.unwrap();
        assert_eq!(
            sim.connections(&host("minion1")).await,
            vec![host("master1"), host("master2")]
        );
    }

    #[tokio::test]
    async fn test_no_reconnect_fault() {
        let sim = SimulatedCluster::new(Transport::Tcp).with_fault(SimFault::NoReconnect);
        sim.deploy(&topology()).await.unwrap();
        sim.exec(&host("master2"), &["pkill", "salt-master"]).await.unwrap();
        sim.exec(&host("master2"), &["salt-master", "-d"]).await.unwrap();

        let ping = sim.exec(&host("master2"), &["salt", "*", "test.ping"]).await.unwrap();
        assert_eq!(ping.exit_code, 1);
        assert!(ping.stdout.contains("[Not connected]"));
    }

    #[tokio::test]
    async fn test_unknown_program_and_wrong_host() {
        let sim = SimulatedCluster::new(Transport::Tcp);
        sim.deploy(&topology()).await.unwrap();

        let out = sim.exec(&host("minion1"), &["salt-master", "-d"]).await.unwrap();
        assert_eq!(out.exit_code, 127);
        let out = sim.exec(&host("master1"), &["nc", "-z", "master2", "4505"]).await.unwrap();
        assert_eq!(out.exit_code, 127);

        let err = sim.exec(&host("minion2"), &["true"]).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_teardown_and_redeploy() {
        let sim = SimulatedCluster::new(Transport::Tcp);
        let cluster = sim.deploy(&topology()).await.unwrap();
        assert!(sim.deploy(&topology()).await.is_err());

        sim.teardown(&cluster).await.unwrap();
        assert!(!sim.is_deployed().await);
        assert!(sim.teardown(&cluster).await.is_err());

        sim.deploy(&topology()).await.unwrap();
        assert_eq!(sim.deployments().await, 2);
        assert_eq!(sim.teardowns().await, 1);
    }

    #[tokio::test]
    async fn test_logs_tail_history() {
        let sim = SimulatedCluster::new(Transport::Tcp);
        sim.deploy(&topology()).await.unwrap();

        sim.exec(&host("master1"), &["pkill", "salt-master"]).await.unwrap();
        sim.exec(&host("master1"), &["pgrep", "salt-master"]).await.unwrap();
        sim.exec(&host("master2"), &["pgrep", "salt-master"]).await.unwrap();

        let logs = sim.logs(&host("master1"), Some(1)).await.unwrap();
        assert_eq!(logs, "$ pgrep salt-master -> 1");
        let logs = sim.logs(&host("master1"), None).await.unwrap();
        assert_eq!(logs.lines().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_salt_call_retrying_forever_never_returns() {
        let sim = SimulatedCluster::new(Transport::Tcp).with_fault(SimFault::CallRetriesForever);
        sim.deploy(&topology()).await.unwrap();

        let call = sim.exec(&host("minion1"), &["salt-call", "test.ping"]).await.unwrap();
        assert_eq!(call.exit_code, 0, "a master is still up");

        for master in ["master1", "master2"] {
            sim.exec(&host(master), &["pkill", "salt-master"]).await.unwrap();
        }
        let hung = tokio::time::timeout(
            std::time::Duration::from_secs(3600),
            sim.exec(&host("minion1"), &["salt-call", "test.ping"]),
        )
        .await;
        assert!(hung.is_err());
        assert_eq!(sim.history().await.last().unwrap().exit_code, -1);
    }
}
