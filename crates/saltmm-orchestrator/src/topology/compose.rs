//! Docker Compose files as topology definitions.
//!
//! Only the subset of the compose format the harness needs is understood:
//! services (image, pull_policy, hostname, entrypoint, command, environment,
//! volumes, depends_on, labels, healthcheck, restart), a single network, and
//! named volumes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::container::{ContainerImage, ImagePullPolicy};
use crate::error::{OrchestratorError, Result};
use crate::topology::cluster::{
    ClusterTopology, HealthCheck, NodeRole, NodeSpec, RestartPolicy, VolumeMount, VolumeType,
};
use crate::topology::network::NetworkSpec;
use crate::words;

/// Label that overrides role inference from the service name.
pub const ROLE_LABEL: &str = "saltmm.role";

impl ClusterTopology {
    /// Loads a topology from a compose file.
    ///
    /// The cluster is named after the file stem. Relative bind mounts are
    /// resolved against the file's directory.
    pub fn from_compose_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cluster".to_string());
        let base_dir = path.parent().filter(|p| !p.as_os_str().is_empty());

        debug!(path = %path.display(), "Loading compose file");
        Self::from_compose_str(&name, &yaml, base_dir)
    }

    /// Parses a topology from compose YAML.
    pub fn from_compose_str(name: &str, yaml: &str, base_dir: Option<&Path>) -> Result<Self> {
        let compose: ComposeFile = serde_yaml::from_str(yaml)?;

        let network = match compose.networks.len() {
            0 => NetworkSpec::default(),
            1 => {
                let (net_name, net) = compose
                    .networks
                    .iter()
                    .next()
                    .ok_or_else(|| OrchestratorError::validation("missing network"))?;
                let net = net.clone().unwrap_or_default();
                NetworkSpec::builder(net_name.as_str())
                    .driver(net.driver.unwrap_or_else(|| "bridge".to_string()))
                    .internal(net.internal)
                    .build()
            }
            n => {
                return Err(OrchestratorError::validation(format!(
                    "expected at most one network, found {n}"
                )))
            }
        };

        let mut builder = ClusterTopology::builder(name).network(network);
        for volume in compose.volumes.keys() {
            builder = builder.volume(volume.as_str());
        }

        for (service_name, service) in compose.services {
            let node = service.into_node(&service_name, base_dir)?;
            builder = builder.node(node);
        }

        let topology = builder.build();
        topology.validate()?;
        Ok(topology)
    }

    /// Renders the topology as compose YAML.
    ///
    /// `container_name` supplies the runtime name for each node.
    pub fn to_compose_yaml(&self, container_name: impl Fn(&NodeSpec) -> String) -> Result<String> {
        let mut compose = ComposeFile {
            version: Some("3.8".to_string()),
            ..Default::default()
        };

        compose.networks.insert(
            self.network.name.clone(),
            Some(ComposeNetwork {
                driver: Some(self.network.driver.clone()),
                internal: self.network.internal,
            }),
        );
        for volume in &self.volumes {
            compose.volumes.insert(volume.clone(), None);
        }

        for node in self.nodes_in_order() {
            let mut environment = self.global_env.clone();
            environment.extend(node.environment.clone());

            let mut labels: BTreeMap<String, String> = self
                .global_labels
                .iter()
                .chain(node.labels.iter())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            labels.insert(ROLE_LABEL.to_string(), node.role.name().to_string());

            let service = ComposeService {
                image: Some(node.image.reference().to_string()),
                pull_policy: (node.image.pull_policy != ImagePullPolicy::default())
                    .then(|| node.image.pull_policy.as_compose_str().to_string()),
                container_name: Some(container_name(node)),
                hostname: Some(node.effective_hostname().to_string()),
                entrypoint: node.entrypoint.clone().map(StringOrList::List),
                command: node.command.clone().map(StringOrList::List),
                environment: (!environment.is_empty()).then(|| {
                    MapOrList::Map(
                        environment
                            .into_iter()
                            .map(|(k, v)| (k, Some(serde_yaml::Value::String(v))))
                            .collect(),
                    )
                }),
                volumes: node.volumes.iter().map(VolumeMount::to_short).collect(),
                depends_on: (!node.depends_on.is_empty()).then(|| {
                    ListOrMap::List(node.depends_on.iter().map(|h| h.to_string()).collect())
                }),
                restart: Some(node.restart_policy.as_compose_str().to_string()),
                labels: Some(MapOrList::Map(
                    labels
                        .into_iter()
                        .map(|(k, v)| (k, Some(serde_yaml::Value::String(v))))
                        .collect(),
                )),
                networks: Some(ListOrMap::List(vec![self.network.name.clone()])),
                healthcheck: node.health_check.as_ref().map(|h| ComposeHealthcheck {
                    test: StringOrList::List(h.test.clone()),
                    interval: Some(format!("{}s", h.interval_secs)),
                    timeout: Some(format!("{}s", h.timeout_secs)),
                    retries: Some(h.retries),
                    start_period: Some(format!("{}s", h.start_period_secs)),
                }),
            };
            compose.services.insert(node.name.to_string(), service);
        }

        Ok(serde_yaml::to_string(&compose)?)
    }
}

/// Parses a compose duration such as `30s`, `1m30s`, `500ms`, or `2h`.
///
/// Returns whole seconds, rounding any non-zero sub-second value up to 1.
pub fn parse_compose_duration(s: &str) -> Result<u32> {
    let invalid = || OrchestratorError::validation(format!("invalid duration: {s}"));
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = s.parse::<u32>() {
        return Ok(secs);
    }

    let mut total_ms: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let factor = match &rest[..unit_len] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            _ => return Err(invalid()),
        };
        total_ms += value * factor;
        rest = &rest[unit_len..];
    }

    let secs = total_ms.div_ceil(1_000);
    u32::try_from(secs).map_err(|_| invalid())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default)]
    services: BTreeMap<String, ComposeService>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    networks: BTreeMap<String, Option<ComposeNetwork>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<String, Option<ComposeVolume>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entrypoint: Option<StringOrList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<StringOrList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    environment: Option<MapOrList>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    depends_on: Option<ListOrMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    restart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    labels: Option<MapOrList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    networks: Option<ListOrMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    healthcheck: Option<ComposeHealthcheck>,
}

impl ComposeService {
    fn into_node(self, name: &str, base_dir: Option<&Path>) -> Result<NodeSpec> {
        let image = self.image.ok_or_else(|| {
            OrchestratorError::validation(format!("service {name} has no image"))
        })?;

        let labels = self.labels.map(MapOrList::into_pairs).transpose()?.unwrap_or_default();
        let role = labels
            .iter()
            .find(|(k, _)| k == ROLE_LABEL)
            .map(|(_, v)| NodeRole::from_name(v))
            .unwrap_or_else(|| NodeRole::infer(name));

        let mut image = ContainerImage::new(image);
        if let Some(policy) = self.pull_policy {
            let policy = ImagePullPolicy::from_compose_str(&policy).ok_or_else(|| {
                OrchestratorError::validation(format!("service {name}: unsupported pull_policy {policy}"))
            })?;
            image = image.with_pull_policy(policy);
        }

        let mut builder = NodeSpec::builder(name, image).role(role);

        if let Some(hostname) = self.hostname.filter(|h| h != name) {
            builder = builder.hostname(hostname);
        }
        if let Some(entrypoint) = self.entrypoint {
            builder = builder.entrypoint(entrypoint.into_argv()?);
        }
        if let Some(command) = self.command {
            builder = builder.command(command.into_argv()?);
        }
        for (key, value) in self.environment.map(MapOrList::into_pairs).transpose()?.unwrap_or_default() {
            builder = builder.env(key, value);
        }
        for (key, value) in labels.into_iter().filter(|(k, _)| k != ROLE_LABEL) {
            builder = builder.label(key, value);
        }
        for volume in &self.volumes {
            let mut mount = VolumeMount::parse_short(volume)?;
            if mount.volume_type == VolumeType::Bind {
                mount.source = resolve_bind_source(&mount.source, base_dir);
            }
            builder = builder.volume(mount);
        }
        for dep in self.depends_on.map(ListOrMap::into_names).unwrap_or_default() {
            builder = builder.depends_on(dep);
        }
        if let Some(restart) = self.restart {
            builder = builder.restart_policy(RestartPolicy::from_compose_str(&restart)?);
        }
        if let Some(health) = self.healthcheck {
            builder = builder.health_check(health.into_health_check()?);
        }

        Ok(builder.build())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ComposeNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    driver: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    internal: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeVolume {}

#[derive(Debug, Serialize, Deserialize)]
struct ComposeHealthcheck {
    test: StringOrList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_period: Option<String>,
}

impl ComposeHealthcheck {
    fn into_health_check(self) -> Result<HealthCheck> {
        let defaults = HealthCheck::default();
        let test = match self.test {
            StringOrList::String(s) => vec!["CMD-SHELL".to_string(), s],
            StringOrList::List(list) => list,
        };
        let secs = |value: Option<String>, default: u32| -> Result<u32> {
            value.map_or(Ok(default), |v| parse_compose_duration(&v))
        };

        Ok(HealthCheck {
            test,
            interval_secs: secs(self.interval, defaults.interval_secs)?,
            timeout_secs: secs(self.timeout, defaults.timeout_secs)?,
            retries: self.retries.unwrap_or(defaults.retries),
            start_period_secs: secs(self.start_period, defaults.start_period_secs)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

impl StringOrList {
    fn into_argv(self) -> Result<Vec<String>> {
        match self {
            Self::String(s) => words::split(&s),
            Self::List(list) => Ok(list),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum MapOrList {
    Map(BTreeMap<String, Option<serde_yaml::Value>>),
    List(Vec<String>),
}

impl MapOrList {
    fn into_pairs(self) -> Result<Vec<(String, String)>> {
        match self {
            Self::Map(map) => map
                .into_iter()
                .map(|(k, v)| yaml_scalar(v).map(|v| (k, v)))
                .collect(),
            Self::List(list) => Ok(list
                .into_iter()
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (entry, String::new()),
                })
                .collect()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ListOrMap {
    List(Vec<String>),
    Map(BTreeMap<String, serde_yaml::Value>),
}

impl ListOrMap {
    fn into_names(self) -> Vec<String> {
        match self {
            Self::List(list) => list,
            Self::Map(map) => map.into_keys().collect(),
        }
    }
}

fn yaml_scalar(value: Option<serde_yaml::Value>) -> Result<String> {
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(String::new()),
        Some(serde_yaml::Value::String(s)) => Ok(s),
        Some(serde_yaml::Value::Bool(b)) => Ok(b.to_string()),
        Some(serde_yaml::Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(OrchestratorError::validation(format!(
            "expected a scalar value, found {other:?}"
        ))),
    }
}

fn resolve_bind_source(source: &str, base_dir: Option<&Path>) -> String {
    match base_dir {
        Some(base) if !Path::new(source).is_absolute() && !source.starts_with('~') => {
            let relative = source.strip_prefix("./").unwrap_or(source);
            base.join(relative).to_string_lossy().into_owned()
        }
        _ => source.to_string(),
    }
}
