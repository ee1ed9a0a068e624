//! Error types for provisioning.
//!
//! Every exit path of [`Launcher::provision`](crate::launcher::Launcher::provision)
//! maps to one [`ProvisionError`] variant, and [`ProvisionError::outcome`]
//! tells the caller whether a container was left behind.

use std::time::Duration;

use thiserror::Error;

use crate::probe::ProbeError;
use crate::runtime::RuntimeError;

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// The launch configuration is internally inconsistent.
///
/// Always detected before a container is created.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("image repository must not be empty")]
    EmptyImage,

    #[error("container path '{target}' is mounted more than once")]
    DuplicateMountTarget { target: String },

    #[error("host port {port} is bound to more than one container port")]
    DuplicateHostPort { port: u16 },

    #[error("container port {port} is bound more than once")]
    DuplicateContainerPort { port: u16 },

    #[error("{service}: port {port} is probed for readiness and must be published")]
    ProbePortUnpublished { service: String, port: u16 },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Host port reservation failed.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("failed to probe for a free port: {0}")]
    Io(#[from] std::io::Error),

    #[error("no unleased port found after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Removing a container failed.
///
/// Always carried alongside the error that triggered the removal.
#[derive(Debug, Error)]
#[error("failed to remove container '{id}': {source}")]
pub struct CleanupError {
    pub id: String,
    #[source]
    pub source: RuntimeError,
}

/// What a failed provisioning call left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// No container was ever created.
    NothingCreated,
    /// A container was created and has been removed again.
    CreatedAndRemoved,
    /// A container was created and removing it failed; it will linger until
    /// its expiry fires.
    CreatedRemovalFailed,
}

/// Errors returned by a provisioning call.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid launch configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to reserve host ports: {0}")]
    Ports(#[from] PortError),

    #[error("failed to start {image}: {source}")]
    Start {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error(
        "container '{id}' not ready after {attempts} attempts in {elapsed:?}{}",
        describe_cleanup(.cleanup)
    )]
    ReadinessTimeout {
        id: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: Option<ProbeError>,
        cleanup: Option<CleanupError>,
    },

    #[error(
        "provisioning of container '{id}' cancelled after {attempts} attempts{}",
        describe_cleanup(.cleanup)
    )]
    Cancelled {
        id: String,
        attempts: u32,
        #[source]
        last: Option<ProbeError>,
        cleanup: Option<CleanupError>,
    },
}

fn describe_cleanup(cleanup: &Option<CleanupError>) -> String {
    match cleanup {
        Some(err) => format!(" (and cleanup failed: {err})"),
        None => String::new(),
    }
}

impl ProvisionError {
    /// Classify what this failure left running.
    pub fn outcome(&self) -> ProvisionOutcome {
        match self {
            Self::Config(_) | Self::Ports(_) | Self::Start { .. } => {
                ProvisionOutcome::NothingCreated
            }
            Self::ReadinessTimeout { cleanup, .. } | Self::Cancelled { cleanup, .. } => {
                if cleanup.is_some() {
                    ProvisionOutcome::CreatedRemovalFailed
                } else {
                    ProvisionOutcome::CreatedAndRemoved
                }
            }
        }
    }

    /// The last probe failure, if the container got as far as probing.
    pub fn last_probe_error(&self) -> Option<&ProbeError> {
        match self {
            Self::ReadinessTimeout { last, .. } | Self::Cancelled { last, .. } => last.as_ref(),
            _ => None,
        }
    }

    /// The secondary failure to remove the container, if any.
    pub fn cleanup_error(&self) -> Option<&CleanupError> {
        match self {
            Self::ReadinessTimeout { cleanup, .. } | Self::Cancelled { cleanup, .. } => {
                cleanup.as_ref()
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadinessTimeout { .. })
    }
}
