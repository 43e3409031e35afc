//! Configuration loading via `ortho-config`.
//!
//! [`LabshipConfig`] is the only place that knows about layered sources.
//! Components receive the resolved [`LabshipPaths`] and plain values at
//! construction and never consult the process environment themselves.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Name of the persisted state document inside the state directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Subdirectory of the state directory holding private key files.
pub const KEYS_DIR_NAME: &str = "keys";

/// Tool settings derived from environment variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "LABSHIP",
    discovery(
        app_name = "labship",
        env_var = "LABSHIP_CONFIG_PATH",
        config_file_name = "labship.toml",
        dotfile_name = ".labship.toml",
        project_file_name = "labship.toml"
    )
)]
pub struct LabshipConfig {
    /// AWS region that hosts instances and key pairs.
    #[ortho_config(default = "us-west-2".to_owned())]
    pub region: String,
    /// Namespace prefix for key pairs created by the tool.
    #[ortho_config(default = "labship".to_owned())]
    pub key_prefix: String,
    /// Path to the `aws` CLI binary.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Directory holding `state.json` and the `keys/` directory.
    #[ortho_config(default = "~/.labship".to_owned())]
    pub state_dir: String,
    /// User override directory searched first for environment files.
    #[ortho_config(default = "~/.labship/environments".to_owned())]
    pub environments_dir: String,
    /// Directory of environments shipped with the tool.
    #[ortho_config(default = "/usr/local/share/labship/environments".to_owned())]
    pub builtin_environments_dir: String,
    /// Reuse the region's default key pair when it already exists.
    #[ortho_config(default = true)]
    pub prefer_existing_key: bool,
    /// Security group attached to launched instances.
    pub security_group_id: Option<String>,
    /// Idle timeout recorded alongside each instance (for example `2h`).
    #[ortho_config(default = "2h".to_owned())]
    pub idle_timeout: String,
}

/// Filesystem locations resolved from [`LabshipConfig`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LabshipPaths {
    /// Full path of the persisted state document.
    pub state_file: Utf8PathBuf,
    /// Directory receiving private key files.
    pub keys_dir: Utf8PathBuf,
    /// User override directory for environment files.
    pub environments_dir: Utf8PathBuf,
    /// Built-in environment directory.
    pub builtin_environments_dir: Utf8PathBuf,
}

impl LabshipConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("labship")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Messages name the
    /// environment variable and TOML key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(&self.region, "AWS region", "region")?;
        require_field(&self.key_prefix, "key pair prefix", "key_prefix")?;
        require_field(&self.aws_bin, "aws CLI binary", "aws_bin")?;
        require_field(&self.state_dir, "state directory", "state_dir")?;
        require_field(
            &self.environments_dir,
            "environments directory",
            "environments_dir",
        )?;
        require_field(
            &self.builtin_environments_dir,
            "built-in environments directory",
            "builtin_environments_dir",
        )?;
        if let Some(group) = &self.security_group_id {
            require_field(group, "security group id", "security_group_id")?;
        }
        Ok(())
    }

    /// Resolves configured directories, expanding a leading `~/` against
    /// `home`. Paths are left untouched when `home` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn paths(&self, home: Option<&str>) -> Result<LabshipPaths, ConfigError> {
        self.validate()?;
        let state_dir = Utf8PathBuf::from(expand_home(&self.state_dir, home));
        Ok(LabshipPaths {
            state_file: state_dir.join(STATE_FILE_NAME),
            keys_dir: state_dir.join(KEYS_DIR_NAME),
            environments_dir: Utf8PathBuf::from(expand_home(&self.environments_dir, home)),
            builtin_environments_dir: Utf8PathBuf::from(expand_home(
                &self.builtin_environments_dir,
                home,
            )),
        })
    }
}

fn require_field(value: &str, description: &str, key: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        let env_var = format!("LABSHIP_{}", key.to_ascii_uppercase());
        return Err(ConfigError::MissingField(format!(
            "missing {description}: set {env_var} or add {key} to labship.toml"
        )));
    }
    Ok(())
}

/// Expands a leading `~/` prefix using an explicit home directory.
///
/// ```
/// # use labship::config::expand_home;
/// assert_eq!(expand_home("~/.labship", Some("/home/ada")), "/home/ada/.labship");
/// assert_eq!(expand_home("/srv/labship", Some("/home/ada")), "/srv/labship");
/// assert_eq!(expand_home("~/.labship", None), "~/.labship");
/// ```
#[must_use]
pub fn expand_home(path: &str, home: Option<&str>) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(dir) = home
    {
        return format!("{}/{rest}", dir.trim_end_matches('/'));
    }
    path.to_owned()
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
