//! Docker backend driven by compose-style topologies.
//!
//! Talks to the Docker API directly via bollard. The effective
//! docker-compose.yml is written next to the run for manual debugging.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    EndpointSettings, HealthConfig, HealthStatusEnum, HostConfig,
    RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::backend::r#trait::{ExecOutput, OrchestrationBackend};
use crate::container::{ContainerHandle, ContainerState, ImagePullPolicy, LifecycleManager};
use crate::error::{OrchestratorError, Result};
use crate::host::HostName;
use crate::topology::{
    ClusterTopology, DeployedCluster, DeploymentState, HealthCheck, NodeSpec, RestartPolicy,
    VolumeType,
};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Configuration for the Docker backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerComposeConfig {
    /// Prefix for every container, network, and volume.
    pub project_name: String,

    /// Directory for generated compose files.
    pub work_dir: PathBuf,

    /// Remove containers on teardown (otherwise only stop them).
    pub remove_on_teardown: bool,

    /// Remove named volumes on teardown.
    pub remove_volumes: bool,

    /// Write the effective docker-compose.yml on deploy.
    pub generate_compose_file: bool,

    /// Timeout for a container to become healthy, in seconds.
    pub timeout_secs: u64,

    /// Pull images before deploying.
    pub pull_images: bool,

    /// Labels applied to all containers.
    pub labels: HashMap<String, String>,
}

impl Default for DockerComposeConfig {
    fn default() -> Self {
        Self {
            project_name: "saltmm".to_string(),
            work_dir: std::env::temp_dir().join("saltmm"),
            remove_on_teardown: true,
            remove_volumes: true,
            generate_compose_file: true,
            timeout_secs: 120,
            pull_images: false,
            labels: HashMap::new(),
        }
    }
}

impl DockerComposeConfig {
    /// Creates a configuration builder.
    pub fn builder() -> DockerComposeConfigBuilder {
        DockerComposeConfigBuilder::default()
    }
}

/// Builder for `DockerComposeConfig`.
#[derive(Debug, Default)]
pub struct DockerComposeConfigBuilder {
    config: DockerComposeConfig,
}

impl DockerComposeConfigBuilder {
    /// Sets the project name.
    pub fn project_name(mut self, name: impl Into<String>) -> Self {
        self.config.project_name = name.into();
        self
    }

    /// Sets the work directory.
    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_dir = path.into();
        self
    }

    /// Sets whether containers are removed on teardown.
    pub fn remove_on_teardown(mut self, remove: bool) -> Self {
        self.config.remove_on_teardown = remove;
        self
    }

    /// Sets whether named volumes are removed on teardown.
    pub fn remove_volumes(mut self, remove: bool) -> Self {
        self.config.remove_volumes = remove;
        self
    }

    /// Sets whether compose files are generated.
    pub fn generate_compose_file(mut self, generate: bool) -> Self {
        self.config.generate_compose_file = generate;
        self
    }

    /// Sets the health timeout.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    /// Sets whether images are pulled before deploying.
    pub fn pull_images(mut self, pull: bool) -> Self {
        self.config.pull_images = pull;
        self
    }

    /// Adds a container label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.labels.insert(key.into(), value.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DockerComposeConfig {
        self.config
    }
}

/// Docker orchestration backend.
pub struct DockerComposeBackend {
    docker: Docker,
    config: DockerComposeConfig,
    lifecycle: Arc<LifecycleManager>,
    current_deployment: Arc<RwLock<Option<DeployedCluster>>>,
    node_containers: Arc<RwLock<BTreeMap<HostName, String>>>,
}

impl DockerComposeBackend {
    /// Connects with the default configuration.
    pub async fn new() -> Result<Self> {
        Self::with_config(DockerComposeConfig::default()).await
    }

    /// Connects to the local Docker daemon and verifies it answers.
    pub async fn with_config(config: DockerComposeConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;

        info!(project = %config.project_name, "Connected to Docker daemon");

        Ok(Self {
            docker,
            config,
            lifecycle: Arc::new(LifecycleManager::new()),
            current_deployment: Arc::new(RwLock::new(None)),
            node_containers: Arc::new(RwLock::new(BTreeMap::new())),
        })
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &DockerComposeConfig {
        &self.config
    }

    /// Renders the compose file for a topology.
    pub fn generate_compose_yaml(&self, topology: &ClusterTopology) -> Result<String> {
        topology.to_compose_yaml(|node| self.container_name(topology, node))
    }

    fn resource_prefix(&self, topology: &ClusterTopology) -> String {
        format!("{}-{}", self.config.project_name, topology.name)
    }

    fn container_name(&self, topology: &ClusterTopology, node: &NodeSpec) -> String {
        format!("{}-{}", self.resource_prefix(topology), node.name)
    }

    fn network_name(&self, topology: &ClusterTopology) -> String {
        format!("{}-{}", self.resource_prefix(topology), topology.network.name)
    }

    fn volume_name(&self, topology: &ClusterTopology, volume: &str) -> String {
        format!("{}-{}", self.resource_prefix(topology), volume)
    }

    fn project_labels(&self, topology: &ClusterTopology) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("saltmm.project".to_string(), self.config.project_name.clone());
        labels.insert("saltmm.cluster".to_string(), topology.name.clone());
        labels
    }

    async fn container_id(&self, host: &HostName) -> Result<String> {
        let containers = self.node_containers.read().await;
        containers
            .get(host)
            .cloned()
            .ok_or_else(|| OrchestratorError::container_not_found(host.as_str()))
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => return Err(OrchestratorError::image_pull_failed(image, e.to_string())),
            }
        }

        Ok(())
    }

    async fn pull_images(&self, topology: &ClusterTopology) -> Result<()> {
        let mut seen = HashSet::new();
        for node in topology.iter_nodes() {
            let image = node.image.reference();
            if !seen.insert(image) {
                continue;
            }
            let pull = match node.image.pull_policy {
                ImagePullPolicy::Always => true,
                ImagePullPolicy::IfNotPresent => self.config.pull_images && !self.image_exists(image).await,
                ImagePullPolicy::Never => false,
            };
            if pull {
                self.pull_image(image).await?;
            }
        }
        Ok(())
    }

    async fn create_network(&self, topology: &ClusterTopology) -> Result<String> {
        let network_name = self.network_name(topology);

        let filters: HashMap<String, Vec<String>> =
            [("name".to_string(), vec![network_name.clone()])]
                .into_iter()
                .collect();
        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await?;

        // The name filter is a substring match.
        if let Some(id) = existing
            .iter()
            .find(|n| n.name.as_deref() == Some(network_name.as_str()))
            .and_then(|n| n.id.clone())
        {
            info!(network = %network_name, id = %id, "Using existing network");
            return Ok(id);
        }

        let mut labels = topology.network.labels.clone();
        labels.extend(self.project_labels(topology));
        let labels: HashMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let options = CreateNetworkOptions {
            name: network_name.as_str(),
            driver: topology.network.driver.as_str(),
            internal: topology.network.internal,
            enable_ipv6: topology.network.enable_ipv6,
            labels,
            ..Default::default()
        };

        let response = self.docker.create_network(options).await?;
        if response.id.is_empty() {
            return Err(OrchestratorError::network_creation_failed(
                &network_name,
                "no ID returned",
            ));
        }

        info!(network = %network_name, id = %response.id, "Created network");
        Ok(response.id)
    }

    async fn create_volume(&self, topology: &ClusterTopology, volume: &str) -> Result<String> {
        let name = self.volume_name(topology, volume);
        let labels = self.project_labels(topology);
        let options = CreateVolumeOptions {
            name: name.clone(),
            labels,
            ..Default::default()
        };
        self.docker.create_volume(options).await?;
        info!(volume = %name, "Created volume");
        Ok(name)
    }

    async fn create_container(&self, topology: &ClusterTopology, node: &NodeSpec) -> Result<String> {
        let container_name = self.container_name(topology, node);
        let network_name = self.network_name(topology);

        let mut env: Vec<String> = topology
            .global_env
            .iter()
            .chain(node.environment.iter())
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.push(format!("SALTMM_HOST={}", node.name));
        env.push(format!("SALTMM_ROLE={}", node.role.name()));

        let mut labels = topology.global_labels.clone();
        labels.extend(node.labels.clone());
        labels.extend(self.config.labels.clone());
        labels.extend(self.project_labels(topology));
        labels.insert("saltmm.host".to_string(), node.name.to_string());
        labels.insert("saltmm.role".to_string(), node.role.name().to_string());

        let binds: Vec<String> = node
            .volumes
            .iter()
            .map(|mount| {
                let source = match mount.volume_type {
                    VolumeType::Bind => mount.source.clone(),
                    VolumeType::Volume => self.volume_name(topology, &mount.source),
                };
                if mount.read_only {
                    format!("{}:{}:ro", source, mount.target)
                } else {
                    format!("{}:{}", source, mount.target)
                }
            })
            .collect();

        let host_config = HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            network_mode: Some(network_name.clone()),
            restart_policy: Some(docker_restart_policy(&node.restart_policy)),
            ..Default::default()
        };

        // Other containers reach this one by its logical host name.
        let endpoints: HashMap<String, EndpointSettings> = [(
            network_name,
            EndpointSettings {
                aliases: Some(vec![node.name.to_string()]),
                ..Default::default()
            },
        )]
        .into_iter()
        .collect();

        let config = Config {
            image: Some(node.image.reference().to_string()),
            hostname: Some(node.effective_hostname().to_string()),
            env: Some(env),
            labels: Some(labels),
            entrypoint: node.entrypoint.clone(),
            cmd: node.command.clone(),
            healthcheck: node.health_check.as_ref().map(docker_health_config),
            host_config: Some(host_config),
            networking_config: Some(NetworkingConfig {
                endpoints_config: endpoints,
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| OrchestratorError::container_start_failed(&container_name, e.to_string()))?;

        info!(container = %container_name, id = %response.id, "Created container");

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| OrchestratorError::container_start_failed(&container_name, e.to_string()))?;

        info!(container = %container_name, "Started container");

        Ok(response.id)
    }

    async fn wait_for_healthy(&self, container: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();

        loop {
            if start.elapsed() > timeout {
                return Err(OrchestratorError::timeout(format!(
                    "container {} to become healthy",
                    container
                )));
            }

            let inspect = self.docker.inspect_container(container, None).await?;

            if let Some(state) = inspect.state {
                if state.running == Some(false) && state.restarting != Some(true) {
                    return Err(OrchestratorError::health_check_failed(
                        container,
                        format!("container exited with code {}", state.exit_code.unwrap_or(-1)),
                    ));
                }
                match state.health.and_then(|h| h.status) {
                    Some(HealthStatusEnum::HEALTHY) => return Ok(()),
                    Some(HealthStatusEnum::UNHEALTHY) => {
                        return Err(OrchestratorError::health_check_failed(
                            container,
                            "container is unhealthy",
                        ))
                    }
                    None | Some(HealthStatusEnum::NONE) | Some(HealthStatusEnum::EMPTY)
                        if state.running == Some(true) =>
                    {
                        return Ok(())
                    }
                    _ => {}
                }
            }

            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        if let Err(e) = self
            .docker
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            warn!(container = %container_id, error = %e, "Failed to stop container");
        }

        if !self.config.remove_on_teardown {
            return Ok(());
        }

        let options = RemoveContainerOptions {
            force: true,
            v: self.config.remove_volumes,
            ..Default::default()
        };
        self.docker.remove_container(container_id, Some(options)).await?;

        info!(container = %container_id, "Removed container");
        Ok(())
    }
}

#[async_trait]
impl OrchestrationBackend for DockerComposeBackend {
    async fn deploy(&self, topology: &ClusterTopology) -> Result<DeployedCluster> {
        topology.validate()?;

        info!(cluster = %topology.name, nodes = topology.node_count(), "Deploying cluster");

        if self.config.generate_compose_file {
            let yaml = self.generate_compose_yaml(topology)?;
            let compose_path = self
                .config
                .work_dir
                .join(format!("docker-compose-{}.yml", topology.name));

            std::fs::create_dir_all(&self.config.work_dir)?;
            std::fs::write(&compose_path, &yaml)?;
            info!(path = %compose_path.display(), "Generated docker-compose.yml");
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let deployment_id = self.resource_prefix(topology);
        let mut cluster = DeployedCluster::new(topology.clone(), &deployment_id, now);
        cluster.state = DeploymentState::Starting;

        if let Err(e) = self.deploy_resources(topology, &mut cluster, now).await {
            error!(cluster = %topology.name, error = %e, "Deployment failed");
            cluster.state = DeploymentState::Failed {
                error: e.to_string(),
            };
            if let Err(teardown_err) = self.teardown(&cluster).await {
                warn!(error = %teardown_err, "Cleanup after failed deployment was incomplete");
            }
            return Err(e);
        }

        cluster.state = DeploymentState::Running;
        *self.current_deployment.write().await = Some(cluster.clone());

        info!(cluster = %topology.name, deployment_id = %deployment_id, "Cluster deployed");
        Ok(cluster)
    }

    async fn teardown(&self, cluster: &DeployedCluster) -> Result<()> {
        info!(
            cluster = %cluster.topology.name,
            deployment_id = %cluster.deployment_id,
            "Tearing down cluster"
        );

        let mut errors = Vec::new();

        // Reverse start order, so the minion goes before its masters.
        for (host, container_id) in cluster.container_ids.iter().rev() {
            if let Err(e) = self.remove_container(container_id).await {
                error!(host = %host, container = %container_id, error = %e, "Failed to remove container");
                errors.push(e.to_string());
            }
            self.lifecycle.unregister(host).await;
        }

        if let Some(network_id) = &cluster.network_id {
            match self.docker.remove_network(network_id).await {
                Ok(()) => info!(network = %network_id, "Removed network"),
                Err(e) => {
                    error!(network = %network_id, error = %e, "Failed to remove network");
                    errors.push(e.to_string());
                }
            }
        }

        if self.config.remove_volumes {
            for volume in &cluster.volume_names {
                match self
                    .docker
                    .remove_volume(volume, Some(RemoveVolumeOptions { force: true }))
                    .await
                {
                    Ok(()) => info!(volume = %volume, "Removed volume"),
                    Err(e) => {
                        error!(volume = %volume, error = %e, "Failed to remove volume");
                        errors.push(e.to_string());
                    }
                }
            }
        }

        {
            let mut node_containers = self.node_containers.write().await;
            for host in cluster.container_ids.keys() {
                node_containers.remove(host);
            }
        }

        {
            let mut current = self.current_deployment.write().await;
            if current.as_ref().map(|c| &c.deployment_id) == Some(&cluster.deployment_id) {
                *current = None;
            }
        }

        if errors.is_empty() {
            info!(cluster = %cluster.topology.name, "Cluster teardown complete");
            Ok(())
        } else {
            Err(OrchestratorError::teardown_failed(errors.join("; ")))
        }
    }

    async fn get_container(&self, host: &HostName) -> Result<ContainerHandle> {
        self.lifecycle
            .get(host)
            .await
            .ok_or_else(|| OrchestratorError::container_not_found(host.as_str()))
    }

    async fn exec(&self, host: &HostName, cmd: &[&str]) -> Result<ExecOutput> {
        let container_id = self.container_id(host).await?;

        debug!(host = %host, container = %container_id, cmd = ?cmd, "Executing command");

        let exec_options = CreateExecOptions {
            cmd: Some(cmd.iter().map(|s| s.to_string()).collect::<Vec<String>>()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&container_id, exec_options)
            .await
            .map_err(|e| OrchestratorError::exec_failed(&container_id, e.to_string()))?;
        let start_result = self.docker.start_exec(&exec.id, None).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut combined = Vec::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(result) = output.next().await {
                match result {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.extend_from_slice(&message);
                        combined.extend_from_slice(&message);
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.extend_from_slice(&message);
                        combined.extend_from_slice(&message);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(OrchestratorError::exec_failed(&container_id, e.to_string()));
                    }
                }
            }
        }

        let exec_inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = exec_inspect.exit_code.unwrap_or(-1);

        debug!(host = %host, exit_code, "Command finished");

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            combined,
            exit_code,
        })
    }

    fn name(&self) -> &str {
        "docker-compose"
    }

    async fn is_ready(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn logs(&self, host: &HostName, tail: Option<usize>) -> Result<String> {
        let container_id = self.container_id(host).await?;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.logs(&container_id, Some(options));
        let mut output = String::new();
        while let Some(result) = stream.next().await {
            output.push_str(&result?.to_string());
        }

        Ok(output)
    }
}

impl DockerComposeBackend {
    async fn deploy_resources(
        &self,
        topology: &ClusterTopology,
        cluster: &mut DeployedCluster,
        now: u64,
    ) -> Result<()> {
        cluster.network_id = Some(self.create_network(topology).await?);

        for volume in &topology.volumes {
            let name = self.create_volume(topology, volume).await?;
            cluster.volume_names.push(name);
        }

        self.pull_images(topology).await?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        for node in topology.nodes_in_order() {
            let container_id = self.create_container(topology, node).await?;
            cluster.container_ids.insert(node.name.clone(), container_id.clone());
            self.node_containers
                .write()
                .await
                .insert(node.name.clone(), container_id.clone());

            let mut handle = ContainerHandle::new(
                &container_id,
                node.name.clone(),
                self.container_name(topology, node),
                now,
            );
            handle.state = ContainerState::Running;
            self.lifecycle.register(handle).await;

            if node.health_check.is_some() {
                self.wait_for_healthy(&container_id, timeout).await?;
                info!(host = %node.name, "Container healthy");
            }
        }

        Ok(())
    }
}

fn docker_health_config(check: &HealthCheck) -> HealthConfig {
    HealthConfig {
        test: Some(check.test.clone()),
        interval: Some(i64::from(check.interval_secs) * NANOS_PER_SEC),
        timeout: Some(i64::from(check.timeout_secs) * NANOS_PER_SEC),
        retries: Some(i64::from(check.retries)),
        start_period: Some(i64::from(check.start_period_secs) * NANOS_PER_SEC),
        ..Default::default()
    }
}

fn docker_restart_policy(policy: &RestartPolicy) -> DockerRestartPolicy {
    let name = match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };
    DockerRestartPolicy {
        name: Some(name),
        maximum_retry_count: None,
    }
}
