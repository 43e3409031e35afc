//! Command-line interface definitions for the `labship` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `labship` binary.
#[derive(Debug, Parser)]
#[command(
    name = "labship",
    about = "Launch short-lived Jupyter instances on EC2",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log progress to stderr (equivalent to `RUST_LOG=info`).
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of the `labship` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Launch an instance for an environment.
    #[command(name = "launch")]
    Launch(LaunchCommand),
    /// Terminate a tracked instance and forget it.
    #[command(name = "terminate")]
    Terminate(TerminateCommand),
    /// List tracked instances.
    #[command(name = "list")]
    List,
    /// List environments available for launch.
    #[command(name = "environments")]
    Environments,
    /// Manage key pairs.
    #[command(name = "keys", subcommand)]
    Keys(KeysCommand),
    /// Print the boot script compiled for an environment.
    #[command(name = "script")]
    Script(ScriptCommand),
    /// Manage base images.
    #[command(name = "image", subcommand)]
    Image(ImageCommand),
}

/// Arguments for `labship launch`.
#[derive(Debug, Parser)]
pub(crate) struct LaunchCommand {
    /// Environment name, resolved against the environment directories.
    pub(crate) environment: String,
    /// Use an existing key pair instead of the tool's default.
    #[arg(long, value_name = "NAME")]
    pub(crate) key_name: Option<String>,
    /// Create a new key pair even if the default one exists.
    #[arg(long, conflicts_with = "key_name")]
    pub(crate) new_key: bool,
    /// Override the environment's instance type.
    #[arg(long, value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
}

/// Arguments for `labship terminate`.
#[derive(Debug, Parser)]
pub(crate) struct TerminateCommand {
    /// Instance identifier as shown by `labship list`.
    pub(crate) instance_id: String,
}

/// `labship keys` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum KeysCommand {
    /// List key pairs in the configured region.
    #[command(name = "list")]
    List {
        /// Only show key pairs created by labship.
        #[arg(long)]
        owned: bool,
    },
    /// Delete a key pair created by labship, with its local key files.
    #[command(name = "delete")]
    Delete {
        /// Key pair name.
        name: String,
    },
}

/// Arguments for `labship script`.
#[derive(Debug, Parser)]
pub(crate) struct ScriptCommand {
    /// Environment name.
    pub(crate) environment: String,
    /// Print the base64 form sent as user data.
    #[arg(long)]
    pub(crate) encoded: bool,
}

/// `labship image` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum ImageCommand {
    /// Deregister an image and forget instances launched from it.
    #[command(name = "delete")]
    Delete {
        /// Image identifier.
        image_id: String,
    },
}
