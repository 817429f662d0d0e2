//! Topology definitions: hosts, network, volumes, and compose files.

mod cluster;
mod compose;
mod network;

pub use cluster::{
    ClusterTopology, ClusterTopologyBuilder, DeployedCluster, DeploymentState, HealthCheck,
    NodeRole, NodeSpec, NodeSpecBuilder, RestartPolicy, VolumeMount, VolumeType,
};
pub use compose::{parse_compose_duration, ROLE_LABEL};
pub use network::{NetworkSpec, NetworkSpecBuilder};
