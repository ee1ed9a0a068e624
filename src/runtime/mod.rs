//! The container engine capability.
//!
//! Provisioning only ever needs three things from an engine: start a
//! container from a [`LaunchSpec`], stop (and remove) it, and arm a
//! self-destruct timer on it. [`DockerRuntime`] implements this over the
//! Docker API; tests use [`FakeRuntime`](crate::testing::FakeRuntime).

pub mod docker;
pub mod error;

use std::time::Duration;

use async_trait::async_trait;

use crate::launch::LaunchSpec;

pub use docker::DockerRuntime;
pub use error::RuntimeError;

/// Reference to a started container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    id: String,
    name: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Narrow interface over a container engine.
///
/// Implementations must be safe to share across concurrent provisioning
/// calls; each call only ever passes back handles it was given by `start`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container. Nothing is left behind on error.
    async fn start(&self, spec: &LaunchSpec) -> Result<ContainerHandle, RuntimeError>;

    /// Stop and remove a container. Removing a container that is already
    /// gone is not an error.
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Ask the engine to remove the container after `ttl`, whether or not
    /// this process is still alive by then.
    async fn set_ttl(&self, handle: &ContainerHandle, ttl: Duration) -> Result<(), RuntimeError>;
}
