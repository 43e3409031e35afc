//! Integration tests for configuration validation and derived settings.

use labship::config::{ConfigError, KEYS_DIR_NAME, STATE_FILE_NAME};
use labship::{LabshipConfig, LaunchSettings};
use rstest::*;

#[fixture]
fn valid_config() -> LabshipConfig {
    LabshipConfig {
        region: String::from("eu-west-1"),
        key_prefix: String::from("labship"),
        aws_bin: String::from("/usr/local/bin/aws"),
        state_dir: String::from("~/.labship"),
        environments_dir: String::from("~/.labship/environments"),
        builtin_environments_dir: String::from("/usr/local/share/labship/environments"),
        prefer_existing_key: false,
        security_group_id: Some(String::from("sg-0abc")),
        idle_timeout: String::from("90m"),
    }
}

/// Verifies that validation produces actionable errors mentioning both the
/// environment variable and configuration file for each required field.
#[rstest]
#[case::region(|cfg: &mut LabshipConfig| cfg.region.clear(), "LABSHIP_REGION", "region")]
#[case::key_prefix(|cfg: &mut LabshipConfig| cfg.key_prefix.clear(), "LABSHIP_KEY_PREFIX", "key_prefix")]
#[case::aws_bin(|cfg: &mut LabshipConfig| cfg.aws_bin.clear(), "LABSHIP_AWS_BIN", "aws_bin")]
#[case::state_dir(|cfg: &mut LabshipConfig| cfg.state_dir.clear(), "LABSHIP_STATE_DIR", "state_dir")]
#[case::environments_dir(
    |cfg: &mut LabshipConfig| cfg.environments_dir.clear(),
    "LABSHIP_ENVIRONMENTS_DIR",
    "environments_dir"
)]
#[case::builtin_environments_dir(
    |cfg: &mut LabshipConfig| cfg.builtin_environments_dir.clear(),
    "LABSHIP_BUILTIN_ENVIRONMENTS_DIR",
    "builtin_environments_dir"
)]
fn config_validation_produces_actionable_errors(
    valid_config: LabshipConfig,
    #[case] mutate: fn(&mut LabshipConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("labship.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn paths_place_state_and_keys_under_state_dir(valid_config: LabshipConfig) {
    let paths = valid_config
        .paths(Some("/home/grace"))
        .unwrap_or_else(|err| panic!("paths resolve: {err}"));

    assert_eq!(
        paths.state_file,
        format!("/home/grace/.labship/{STATE_FILE_NAME}")
    );
    assert_eq!(paths.keys_dir, format!("/home/grace/.labship/{KEYS_DIR_NAME}"));
    assert_eq!(paths.environments_dir, "/home/grace/.labship/environments");
}

#[rstest]
fn paths_refuse_invalid_config(valid_config: LabshipConfig) {
    let cfg = LabshipConfig {
        state_dir: String::from(" "),
        ..valid_config
    };
    assert!(cfg.paths(Some("/home/grace")).is_err());
}

#[rstest]
fn launch_settings_copy_config_values(valid_config: LabshipConfig) {
    let settings = LaunchSettings::from(&valid_config);

    assert_eq!(settings.region, "eu-west-1");
    assert_eq!(settings.key_prefix, "labship");
    assert!(!settings.prefer_existing_key);
    assert_eq!(settings.security_group_id.as_deref(), Some("sg-0abc"));
    assert_eq!(settings.idle_timeout, "90m");
}
