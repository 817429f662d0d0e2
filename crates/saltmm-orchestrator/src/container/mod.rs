//! Container images and runtime lifecycle tracking.

mod lifecycle;
mod spec;

pub use lifecycle::{ContainerHandle, ContainerState, LifecycleManager};
pub use spec::{ContainerImage, ImagePullPolicy};
