//! Error types for the launch workflow.

use thiserror::Error;

use crate::backend::BackendError;
use crate::bootstrap::BootstrapError;
use crate::credentials::CredentialError;
use crate::environment::EnvironmentError;
use crate::keypair::KeyPairError;
use crate::state::StateError;

/// Errors surfaced by [`super::LaunchOrchestrator`].
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Raised when the environment cannot be loaded.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    /// Raised when the boot script cannot be used.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// Raised when key pair resolution or deletion fails.
    #[error(transparent)]
    KeyPair(#[from] KeyPairError),
    /// Raised when private key files cannot be written or removed.
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    /// Raised when the local state cannot be read or written.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when building the launch request fails.
    #[error("invalid launch request: {0}")]
    Request(#[source] BackendError),
    /// Raised when the provider launch call fails.
    #[error("failed to launch instance: {0}")]
    Provision(#[source] BackendError),
    /// Raised when terminating an instance fails.
    #[error("failed to terminate instance {instance_id}: {source}")]
    Terminate {
        /// Instance being terminated.
        instance_id: String,
        /// Provider failure.
        #[source]
        source: BackendError,
    },
    /// Raised when deregistering an image fails.
    #[error("failed to delete image {image_id}: {source}")]
    DeleteImage {
        /// Image being deregistered.
        image_id: String,
        /// Provider failure.
        #[source]
        source: BackendError,
    },
    /// Raised when the instance is not tracked in local state.
    #[error("instance {instance_id} is not tracked by labship")]
    UnknownInstance {
        /// Requested instance id.
        instance_id: String,
    },
}
