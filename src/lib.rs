//! Core library for the labship notebook launcher.
//!
//! The crate reconciles three views of the world before and after launching
//! a short-lived Jupyter instance on EC2: key pairs registered with the
//! provider ([`keypair`]), files on the local disk ([`credentials`] and
//! [`state`]), and the declarative environment descriptions compiled into a
//! first-boot script ([`environment`] and [`bootstrap`]). [`launch`] ties the
//! pieces together behind the [`backend`] and registry traits, and [`aws`]
//! implements both traits by shelling out to the `aws` CLI.

pub mod aws;
pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod environment;
pub mod keypair;
pub mod launch;
pub mod process;
pub mod state;
pub mod test_support;

pub use aws::{AwsCli, AwsCliConfig, AwsError};
pub use backend::{
    BackendError, InstanceBackend, LaunchRequest, LaunchRequestBuilder, LaunchedInstance,
};
pub use bootstrap::{BootScript, BootstrapError, USER_DATA_LIMIT_BYTES};
pub use config::{ConfigError, LabshipConfig, LabshipPaths};
pub use credentials::{CredentialError, CredentialStore, PrivateKey};
pub use environment::{Environment, EnvironmentError, EnvironmentLoader};
pub use keypair::{
    CreatedBy, KeyPairError, KeyPairInfo, KeyPairRecord, KeyPairRegistry, KeyPairResolver,
    KeyPairStrategy, RegistryError, is_tool_owned,
};
pub use launch::{
    KeyRemoval, LaunchError, LaunchOptions, LaunchOrchestrator, LaunchOutcome, LaunchSettings,
};
pub use process::{CommandOutput, CommandRunner, ProcessCommandRunner, ProcessError};
pub use state::{Instance, LocalState, StateError, StateStore};
