//! Container orchestration for multi-node Salt test clusters.
//!
//! This crate deploys a small cluster of containers (typically two Salt
//! masters and one minion), runs commands inside them while a test scenario
//! executes, and tears everything down afterwards.
//!
//! # Overview
//!
//! The orchestrator handles:
//! - **Cluster deployment**: Creating the network, named volumes, and containers
//! - **Command execution**: Running commands inside containers and capturing output
//! - **Container lifecycle**: Tracking container state and reading logs
//! - **Teardown**: Cleaning up all resources after a run completes
//!
//! # Architecture
//!
//! - [`backend`]: Orchestration backend trait and the Docker implementation
//! - [`topology`]: Cluster topology definitions and compose-file loading
//! - [`container`]: Container images and lifecycle tracking
//! - [`host`]: Logical host names
//! - [`words`]: Splitting command lines into argument vectors
//! - [`error`]: Error types for orchestration operations
//!
//! # Example
//!
//! ```ignore
//! use saltmm_orchestrator::{
//!     backend::{DockerComposeBackend, OrchestrationBackend},
//!     topology::{ClusterTopology, HealthCheck, NodeRole, NodeSpec, VolumeMount},
//!     HostName,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let topology = ClusterTopology::builder("mm")
//!         .node(
//!             NodeSpec::builder("master1", "saltstack/salt:3006")
//!                 .role(NodeRole::Master)
//!                 .health_check(HealthCheck::process("salt-master"))
//!                 .volume(VolumeMount::volume("master-pki", "/etc/salt/pki/master"))
//!                 .build(),
//!         )
//!         .node(
//!             NodeSpec::builder("minion1", "saltstack/salt:3006")
//!                 .role(NodeRole::Minion)
//!                 .depends_on("master1")
//!                 .build(),
//!         )
//!         .volume("master-pki")
//!         .build();
//!
//!     let backend = DockerComposeBackend::new().await?;
//!     let cluster = backend.deploy(&topology).await?;
//!
//!     let output = backend
//!         .exec(&HostName::new("master1"), &["salt", "*", "test.ping"])
//!         .await?;
//!     println!("{}", output.stdout);
//!
//!     backend.teardown(&cluster).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Compose files
//!
//! Topologies can be loaded from a `docker-compose.yml` with
//! [`ClusterTopology::from_compose_file`], and the effective topology is
//! written back out as compose YAML on every deploy so a failed run can be
//! reproduced by hand with `docker compose up`.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod container;
pub mod error;
pub mod host;
pub mod topology;
pub mod words;

// Re-export commonly used types at the crate root
pub use backend::{
    DockerComposeBackend, DockerComposeConfig, ExecOutput, OrchestrationBackend,
};
pub use container::{ContainerHandle, ContainerImage, ContainerState, ImagePullPolicy};
pub use error::{OrchestratorError, Result};
pub use host::HostName;
pub use topology::{ClusterTopology, DeployedCluster, NetworkSpec, NodeRole, NodeSpec};
