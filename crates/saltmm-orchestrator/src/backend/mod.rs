//! Orchestration backends.

mod docker_compose;
mod r#trait;

pub use docker_compose::{DockerComposeBackend, DockerComposeConfig, DockerComposeConfigBuilder};
pub use r#trait::{BoxedBackend, ExecOutput, OrchestrationBackend};
