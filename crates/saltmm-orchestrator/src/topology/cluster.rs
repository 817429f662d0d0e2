//! Cluster topology definitions.
//!
//! A topology names every host, the image and command it runs, what it
//! mounts, and which hosts must be started before it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::container::ContainerImage;
use crate::error::{OrchestratorError, Result};
use crate::host::HostName;
use crate::topology::network::NetworkSpec;

/// The role a host plays in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Salt master.
    Master,

    /// Salt minion.
    Minion,

    /// Anything else.
    Custom(String),
}

impl NodeRole {
    /// Creates a custom role.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// Returns the role name used in labels.
    pub fn name(&self) -> &str {
        match self {
            Self::Master => "master",
            Self::Minion => "minion",
            Self::Custom(name) => name,
        }
    }

    /// Parses a role name; unknown names become custom roles.
    pub fn from_name(name: &str) -> Self {
        match name {
            "master" => Self::Master,
            "minion" => Self::Minion,
            other => Self::custom(other),
        }
    }

    /// Infers a role from a host name such as `master2` or `minion1`.
    pub fn infer(host: &str) -> Self {
        let base = host.trim_end_matches(|c: char| c.is_ascii_digit());
        Self::from_name(base)
    }
}

/// Specification for a single host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Logical host name; also the network alias.
    pub name: HostName,

    /// Container hostname, when it differs from the logical name.
    pub hostname: Option<String>,

    /// Role of the host.
    pub role: NodeRole,

    /// Image to run.
    pub image: ContainerImage,

    /// Entrypoint overriding the image default.
    pub entrypoint: Option<Vec<String>>,

    /// Command overriding the image default.
    pub command: Option<Vec<String>>,

    /// Environment variables.
    pub environment: BTreeMap<String, String>,

    /// Volume mounts.
    pub volumes: Vec<VolumeMount>,

    /// Container labels.
    pub labels: HashMap<String, String>,

    /// Health check evaluated by the container runtime.
    pub health_check: Option<HealthCheck>,

    /// Hosts that must be started first.
    pub depends_on: Vec<HostName>,

    /// Restart policy.
    pub restart_policy: RestartPolicy,
}

impl NodeSpec {
    /// Creates a node specification builder.
    pub fn builder(name: impl Into<HostName>, image: impl Into<ContainerImage>) -> NodeSpecBuilder {
        NodeSpecBuilder::new(name.into(), image.into())
    }

    /// Returns the hostname the container should report.
    pub fn effective_hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or(self.name.as_str())
    }
}

/// Builder for `NodeSpec`.
#[derive(Debug)]
pub struct NodeSpecBuilder {
    spec: NodeSpec,
}

impl NodeSpecBuilder {
    fn new(name: HostName, image: ContainerImage) -> Self {
        let role = NodeRole::infer(name.as_str());
        Self {
            spec: NodeSpec {
                name,
                hostname: None,
                role,
                image,
                entrypoint: None,
                command: None,
                environment: BTreeMap::new(),
                volumes: Vec::new(),
                labels: HashMap::new(),
                health_check: None,
                depends_on: Vec::new(),
                restart_policy: RestartPolicy::default(),
            },
        }
    }

    /// Sets the container hostname.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.spec.hostname = Some(hostname.into());
        self
    }

    /// Sets the role.
    pub fn role(mut self, role: NodeRole) -> Self {
        self.spec.role = role;
        self
    }

    /// Sets the entrypoint.
    pub fn entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.entrypoint = Some(entrypoint.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the command.
    pub fn command<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.command = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.environment.insert(key.into(), value.into());
        self
    }

    /// Adds a volume mount.
    pub fn volume(mut self, mount: VolumeMount) -> Self {
        self.spec.volumes.push(mount);
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the health check.
    pub fn health_check(mut self, check: HealthCheck) -> Self {
        self.spec.health_check = Some(check);
        self
    }

    /// Adds a dependency on another host.
    pub fn depends_on(mut self, host: impl Into<HostName>) -> Self {
        self.spec.depends_on.push(host.into());
        self
    }

    /// Sets the restart policy.
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.spec.restart_policy = policy;
        self
    }

    /// Builds the node specification.
    pub fn build(self) -> NodeSpec {
        self.spec
    }
}

/// Volume mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path (bind) or volume name.
    pub source: String,

    /// Path inside the container.
    pub target: String,

    /// Mounted read-only.
    pub read_only: bool,

    /// Mount kind.
    pub volume_type: VolumeType,
}

impl VolumeMount {
    /// Creates a bind mount from the host filesystem.
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
            volume_type: VolumeType::Bind,
        }
    }

    /// Creates a named volume mount.
    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: name.into(),
            target: target.into(),
            read_only: false,
            volume_type: VolumeType::Volume,
        }
    }

    /// Marks the mount read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Parses compose short syntax `source:target[:ro]`.
    pub fn parse_short(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (source, target, mode) = match parts.as_slice() {
            [source, target] => (*source, *target, None),
            [source, target, mode] => (*source, *target, Some(*mode)),
            _ => {
                return Err(OrchestratorError::validation(format!(
                    "unsupported volume syntax: {spec}"
                )))
            }
        };

        let is_path = source.starts_with('.') || source.starts_with('/') || source.starts_with('~');
        let mount = if is_path {
            Self::bind(source, target)
        } else {
            Self::volume(source, target)
        };

        match mode {
            None | Some("rw") => Ok(mount),
            Some("ro") => Ok(mount.read_only()),
            Some(other) => Err(OrchestratorError::validation(format!(
                "unsupported volume mode '{other}' in {spec}"
            ))),
        }
    }

    /// Formats the mount in compose short syntax.
    pub fn to_short(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// Kind of volume mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeType {
    /// Host filesystem path.
    Bind,

    /// Named volume managed by the runtime.
    Volume,
}

/// Health check run by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Test command in Docker form (`CMD`/`CMD-SHELL` first).
    pub test: Vec<String>,

    /// Seconds between checks.
    pub interval_secs: u32,

    /// Seconds before a single check times out.
    pub timeout_secs: u32,

    /// Consecutive failures before unhealthy.
    pub retries: u32,

    /// Grace period before failures count.
    pub start_period_secs: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), "exit 0".to_string()],
            interval_secs: 5,
            timeout_secs: 5,
            retries: 3,
            start_period_secs: 0,
        }
    }
}

impl HealthCheck {
    /// Healthy while a process matching `name` is running.
    pub fn process(name: &str) -> Self {
        Self::cmd(["pgrep", name])
    }

    /// Custom command check.
    pub fn cmd<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut test = vec!["CMD".to_string()];
        test.extend(command.into_iter().map(Into::into));
        Self {
            test,
            ..Default::default()
        }
    }
}

/// Container restart policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RestartPolicy {
    /// Never restart.
    #[default]
    No,

    /// Restart on failure.
    OnFailure,

    /// Always restart.
    Always,

    /// Restart unless explicitly stopped.
    UnlessStopped,
}

impl RestartPolicy {
    /// Returns the compose/Docker policy string.
    pub fn as_compose_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::OnFailure => "on-failure",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
        }
    }

    /// Parses a compose policy string.
    pub fn from_compose_str(s: &str) -> Result<Self> {
        match s {
            "" | "no" => Ok(Self::No),
            "always" => Ok(Self::Always),
            "unless-stopped" => Ok(Self::UnlessStopped),
            s if s.starts_with("on-failure") => Ok(Self::OnFailure),
            other => Err(OrchestratorError::validation(format!(
                "unknown restart policy: {other}"
            ))),
        }
    }
}

/// The complete topology of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTopology {
    /// Cluster name.
    pub name: String,

    /// Node specifications keyed by host.
    pub nodes: BTreeMap<HostName, NodeSpec>,

    /// Cluster network.
    pub network: NetworkSpec,

    /// Named volumes used by the nodes.
    pub volumes: BTreeSet<String>,

    /// Environment applied to every node (node values win).
    pub global_env: BTreeMap<String, String>,

    /// Labels applied to every container.
    pub global_labels: HashMap<String, String>,
}

impl ClusterTopology {
    /// Creates a topology builder.
    pub fn builder(name: impl Into<String>) -> ClusterTopologyBuilder {
        ClusterTopologyBuilder::new(name)
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates over node specifications in host-name order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.values()
    }

    /// Returns nodes with the given role.
    pub fn nodes_by_role<'a>(&'a self, role: &'a NodeRole) -> impl Iterator<Item = &'a NodeSpec> {
        self.nodes.values().filter(move |n| &n.role == role)
    }

    /// Gets a node by host name.
    pub fn get_node(&self, host: &HostName) -> Option<&NodeSpec> {
        self.nodes.get(host)
    }

    /// Replaces every node's image.
    pub fn override_image(&mut self, image: &ContainerImage) {
        for node in self.nodes.values_mut() {
            node.image = image.clone();
        }
    }

    /// Checks that dependencies exist and contain no cycle.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(OrchestratorError::validation(format!(
                "topology {} has no nodes",
                self.name
            )));
        }

        for node in self.nodes.values() {
            for dep in &node.depends_on {
                if !self.nodes.contains_key(dep) {
                    return Err(OrchestratorError::validation(format!(
                        "{} depends on unknown host {}",
                        node.name, dep
                    )));
                }
            }
            for mount in &node.volumes {
                if mount.volume_type == VolumeType::Volume && !self.volumes.contains(&mount.source) {
                    return Err(OrchestratorError::validation(format!(
                        "{} mounts undeclared volume {}",
                        node.name, mount.source
                    )));
                }
            }
        }

        self.ordered().map(|_| ())
    }

    /// Returns nodes in dependency order (dependencies first).
    ///
    /// Nodes without mutual dependencies keep host-name order.
    pub fn nodes_in_order(&self) -> Vec<&NodeSpec> {
        self.ordered().unwrap_or_else(|_| self.nodes.values().collect())
    }

    fn ordered(&self) -> Result<Vec<&NodeSpec>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            node: &'a NodeSpec,
            nodes: &'a BTreeMap<HostName, NodeSpec>,
            marks: &mut HashMap<&'a HostName, Mark>,
            result: &mut Vec<&'a NodeSpec>,
        ) -> Result<()> {
            match marks.get(&node.name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(OrchestratorError::validation(format!(
                        "dependency cycle through {}",
                        node.name
                    )))
                }
                None => {}
            }

            marks.insert(&node.name, Mark::Visiting);
            for dep in &node.depends_on {
                if let Some(dep_node) = nodes.get(dep) {
                    visit(dep_node, nodes, marks, result)?;
                }
            }
            marks.insert(&node.name, Mark::Done);
            result.push(node);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut result = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.values() {
            visit(node, &self.nodes, &mut marks, &mut result)?;
        }
        Ok(result)
    }
}

/// Builder for `ClusterTopology`.
#[derive(Debug)]
pub struct ClusterTopologyBuilder {
    topology: ClusterTopology,
}

impl ClusterTopologyBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            topology: ClusterTopology {
                name: name.into(),
                nodes: BTreeMap::new(),
                network: NetworkSpec::default(),
                volumes: BTreeSet::new(),
                global_env: BTreeMap::new(),
                global_labels: HashMap::new(),
            },
        }
    }

    /// Adds a node.
    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.topology.nodes.insert(spec.name.clone(), spec);
        self
    }

    /// Sets the network.
    pub fn network(mut self, network: NetworkSpec) -> Self {
        self.topology.network = network;
        self
    }

    /// Declares a named volume.
    pub fn volume(mut self, name: impl Into<String>) -> Self {
        self.topology.volumes.insert(name.into());
        self
    }

    /// Adds a global environment variable.
    pub fn global_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.topology.global_env.insert(key.into(), value.into());
        self
    }

    /// Adds a global label.
    pub fn global_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.topology.global_labels.insert(key.into(), value.into());
        self
    }

    /// Builds the topology.
    pub fn build(self) -> ClusterTopology {
        self.topology
    }
}

/// A cluster that has been deployed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedCluster {
    /// Topology used for the deployment.
    pub topology: ClusterTopology,

    /// Unique deployment ID.
    pub deployment_id: String,

    /// Container IDs keyed by host.
    pub container_ids: BTreeMap<HostName, String>,

    /// Cluster network ID.
    pub network_id: Option<String>,

    /// Runtime names of the named volumes created for this deployment.
    pub volume_names: Vec<String>,

    /// Deployment timestamp (Unix milliseconds).
    pub deployed_at: u64,

    /// Deployment state.
    pub state: DeploymentState,
}

impl DeployedCluster {
    /// Creates a pending deployment record.
    pub fn new(topology: ClusterTopology, deployment_id: impl Into<String>, deployed_at: u64) -> Self {
        Self {
            topology,
            deployment_id: deployment_id.into(),
            container_ids: BTreeMap::new(),
            network_id: None,
            volume_names: Vec::new(),
            deployed_at,
            state: DeploymentState::Pending,
        }
    }

    /// Returns the container ID for a host.
    pub fn container_id(&self, host: &HostName) -> Option<&str> {
        self.container_ids.get(host).map(String::as_str)
    }

    /// Returns true if the deployment is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state, DeploymentState::Running)
    }
}

/// State of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentState {
    /// Not started.
    Pending,

    /// Containers are being created.
    Starting,

    /// All containers started.
    Running,

    /// Torn down.
    Stopped,

    /// Deployment failed.
    Failed {
        /// Error message.
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salt_node(name: &str) -> NodeSpecBuilder {
        NodeSpec::builder(name, "saltstack/salt:3006")
    }

    #[test]
    fn test_role_inference() {
        assert_eq!(NodeRole::infer("master1"), NodeRole::Master);
        assert_eq!(NodeRole::infer("minion12"), NodeRole::Minion);
        assert_eq!(NodeRole::infer("syndic1"), NodeRole::custom("syndic"));
        assert_eq!(NodeRole::Master.name(), "master");
    }

    #[test]
    fn test_node_spec_builder() {
        let spec = salt_node("master1")
            .command(["salt-master", "-l", "info"])
            .env("SALT_TRANSPORT", "tcp")
            .build();

        assert_eq!(spec.name.as_str(), "master1");
        assert_eq!(spec.role, NodeRole::Master);
        assert_eq!(spec.effective_hostname(), "master1");
        assert_eq!(spec.environment.get("SALT_TRANSPORT").map(String::as_str), Some("tcp"));
    }

    #[test]
    fn test_nodes_in_order() {
        let topology = ClusterTopology::builder("mm")
            .node(salt_node("minion1").depends_on("master1").depends_on("master2").build())
            .node(salt_node("master2").depends_on("master1").build())
            .node(salt_node("master1").build())
            .build();

        let ordered: Vec<&str> = topology
            .nodes_in_order()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(ordered, vec!["master1", "master2", "minion1"]);
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let topology = ClusterTopology::builder("mm")
            .node(salt_node("minion1").depends_on("master3").build())
            .build();
        let err = topology.validate().unwrap_err();
        assert!(err.to_string().contains("unknown host master3"));
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let topology = ClusterTopology::builder("mm")
            .node(salt_node("master1").depends_on("master2").build())
            .node(salt_node("master2").depends_on("master1").build())
            .build();
        assert!(topology.validate().unwrap_err().to_string().contains("cycle"));
    }

    #[test]
    fn test_validate_rejects_undeclared_volume() {
        let topology = ClusterTopology::builder("mm")
            .node(
                salt_node("master1")
                    .volume(VolumeMount::volume("master-pki", "/etc/salt/pki/master"))
                    .build(),
            )
            .build();
        assert!(topology.validate().is_err());

        let topology = ClusterTopology::builder("mm")
            .volume("master-pki")
            .node(
                salt_node("master1")
                    .volume(VolumeMount::volume("master-pki", "/etc/salt/pki/master"))
                    .build(),
            )
            .build();
        assert!(topology.validate().is_ok());
    }

    #[test]
    fn test_volume_short_syntax() {
        let mount = VolumeMount::parse_short("./conf/minion.conf:/etc/salt/minion.d/mm.conf:ro").unwrap();
        assert_eq!(mount.volume_type, VolumeType::Bind);
        assert!(mount.read_only);
        assert_eq!(mount.to_short(), "./conf/minion.conf:/etc/salt/minion.d/mm.conf:ro");

        let mount = VolumeMount::parse_short("master-pki:/etc/salt/pki/master").unwrap();
        assert_eq!(mount.volume_type, VolumeType::Volume);
        assert!(!mount.read_only);

        assert!(VolumeMount::parse_short("/only-target").is_err());
        assert!(VolumeMount::parse_short("a:/b:zz").is_err());
    }

    #[test]
    fn test_restart_policy() {
        assert_eq!(RestartPolicy::No.as_compose_str(), "no");
        assert_eq!(RestartPolicy::from_compose_str("on-failure:3").unwrap(), RestartPolicy::OnFailure);
        assert!(RestartPolicy::from_compose_str("sometimes").is_err());
    }

    #[test]
    fn test_global_settings_and_roles() {
        let topology = ClusterTopology::builder("mm")
            .node(salt_node("master1").role(NodeRole::Master).build())
            .node(salt_node("master2").role(NodeRole::Master).build())
            .node(salt_node("minion1").role(NodeRole::Minion).build())
            .global_env("SALT_LOG_LEVEL", "debug")
            .global_label("saltmm.transport", "tcp")
            .build();

        assert_eq!(topology.nodes_by_role(&NodeRole::Master).count(), 2);
        assert_eq!(topology.nodes_by_role(&NodeRole::Minion).count(), 1);
        assert_eq!(topology.global_env.get("SALT_LOG_LEVEL").map(String::as_str), Some("debug"));
        assert_eq!(topology.global_labels.get("saltmm.transport").map(String::as_str), Some("tcp"));
    }

    #[test]
    fn test_override_image() {
        let mut topology = ClusterTopology::builder("mm")
            .node(salt_node("master1").build())
            .node(salt_node("minion1").build())
            .build();
        topology.override_image(&ContainerImage::new("local/salt:dev"));
        assert!(topology.iter_nodes().all(|n| n.image.reference() == "local/salt:dev"));
    }
}
