//! Error types for the container engine boundary.

use thiserror::Error;

/// Errors reported by a [`ContainerRuntime`](super::ContainerRuntime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The engine cannot be reached.
    #[error("container engine not available: {reason}")]
    Unavailable {
        /// Reason why the engine is unavailable.
        reason: String,
    },

    /// Failed to pull the image.
    #[error("failed to pull image '{image}': {reason}")]
    ImagePull {
        /// Image name.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the container.
    #[error("failed to create container '{name}': {reason}")]
    Create {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start the created container.
    #[error("failed to start container '{name}': {reason}")]
    Start {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to stop and remove a container.
    #[error("failed to stop container '{id}': {reason}")]
    Stop {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to arm the container's expiry.
    #[error("failed to set expiry on container '{id}': {reason}")]
    Expire {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to list or inspect containers.
    #[error("failed to query containers: {reason}")]
    Query {
        /// Reason for failure.
        reason: String,
    },
}
