//! EC2 adapter that shells out to the `aws` CLI.
//!
//! Every call passes `--region` and `--output json` explicitly so the
//! adapter never depends on the user's CLI profile defaults. Provider error
//! codes in stderr such as `InvalidKeyPair.NotFound` are mapped to the
//! not-found variants the core understands.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::net::IpAddr;

use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{BackendError, InstanceBackend, LaunchRequest, LaunchedInstance};
use crate::credentials::PrivateKey;
use crate::keypair::{CreatedKeyPair, KeyPairRecord, KeyPairRegistry, RegistryError};
use crate::process::{CommandOutput, CommandRunner, ProcessCommandRunner, ProcessError};

mod types;

use types::{CreateKeyPairOutput, DescribeInstances, DescribeKeyPairs, RunInstancesOutput};

/// Default `aws` CLI binary name.
pub const DEFAULT_AWS_BIN: &str = "aws";

/// Root device name of the Ubuntu images the environments boot from.
pub const ROOT_DEVICE_NAME: &str = "/dev/sda1";

const KEY_PAIR_NOT_FOUND: &str = "InvalidKeyPair.NotFound";
const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";
const IMAGE_NOT_FOUND: &str = "InvalidAMIID.NotFound";
const IMAGE_UNAVAILABLE: &str = "InvalidAMIID.Unavailable";

/// Settings for the `aws` CLI adapter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AwsCliConfig {
    /// Path to the `aws` binary.
    pub aws_bin: String,
    /// Region passed to every call.
    pub region: String,
}

impl AwsCliConfig {
    /// Constructs a config, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError::InvalidConfig`] when either field is blank.
    pub fn new(aws_bin: impl Into<String>, region: impl Into<String>) -> Result<Self, AwsError> {
        let aws_bin = aws_bin.into().trim().to_owned();
        let region = region.into().trim().to_owned();
        if aws_bin.is_empty() {
            return Err(AwsError::InvalidConfig {
                field: String::from("aws_bin"),
            });
        }
        if region.is_empty() {
            return Err(AwsError::InvalidConfig {
                field: String::from("region"),
            });
        }
        Ok(Self { aws_bin, region })
    }
}

/// Errors raised while driving the `aws` CLI.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AwsError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}")]
    InvalidConfig {
        /// Name of the missing field.
        field: String,
    },
    /// Raised when `aws` returns a non-zero exit status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command, prefixed with the operation.
        stderr: String,
    },
    /// Raised when JSON output from the CLI cannot be parsed.
    #[error("failed to parse {resource} output: {message}")]
    Parse {
        /// Output being parsed, for example `key pairs`.
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when command execution fails.
    #[error(transparent)]
    Runner(#[from] ProcessError),
}

impl AwsError {
    /// Returns `true` when the provider reported `code` in stderr.
    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        matches!(self, Self::CommandFailure { stderr, .. } if stderr.contains(code))
    }
}

/// Key pair registry and instance backend backed by `aws ec2`.
#[derive(Clone, Debug)]
pub struct AwsCli<R: CommandRunner> {
    config: AwsCliConfig,
    runner: R,
}

impl AwsCli<ProcessCommandRunner> {
    /// Creates an adapter wired to the real process runner.
    #[must_use]
    pub const fn with_process_runner(config: AwsCliConfig) -> Self {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> AwsCli<R> {
    /// Creates an adapter using the provided configuration and runner.
    #[must_use]
    pub const fn new(config: AwsCliConfig, runner: R) -> Self {
        Self { config, runner }
    }

    /// Region every call targets.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.config.region
    }

    fn check_output(
        &self,
        output: CommandOutput,
        operation: &str,
    ) -> Result<CommandOutput, AwsError> {
        if output.is_success() {
            return Ok(output);
        }
        Err(AwsError::CommandFailure {
            program: self.config.aws_bin.clone(),
            status: output.code,
            status_text: output.status_text(),
            stderr: format!("{operation}: {}", output.stderr.trim()),
        })
    }

    /// Builds `ec2 <subcommand> <args..> --region R --output json`.
    fn build_args(&self, subcommand: &[&str], extra: Vec<OsString>) -> Vec<OsString> {
        let mut args = Vec::with_capacity(subcommand.len() + extra.len() + 5);
        args.push(OsString::from("ec2"));
        args.extend(subcommand.iter().map(OsString::from));
        args.extend(extra);
        args.push(OsString::from("--region"));
        args.push(OsString::from(&self.config.region));
        args.push(OsString::from("--output"));
        args.push(OsString::from("json"));
        args
    }

    fn run_ec2(
        &self,
        subcommand: &[&str],
        extra: Vec<OsString>,
        operation: &str,
    ) -> Result<String, AwsError> {
        let args = self.build_args(subcommand, extra);
        debug!(operation, region = %self.config.region, "invoking aws cli");
        let output = self.runner.run(&self.config.aws_bin, &args)?;
        self.check_output(output, operation).map(|out| out.stdout)
    }

    fn run_ec2_json<T>(
        &self,
        subcommand: &[&str],
        extra: Vec<OsString>,
        resource: &str,
    ) -> Result<T, AwsError>
    where
        T: DeserializeOwned,
    {
        let stdout = self.run_ec2(subcommand, extra, resource)?;
        serde_json::from_str::<T>(&stdout).map_err(|err| AwsError::Parse {
            resource: resource.to_owned(),
            message: err.to_string(),
        })
    }

    fn describe_key_pairs(&self, name: Option<&str>) -> Result<Vec<KeyPairRecord>, AwsError> {
        let extra = name.map_or_else(Vec::new, |key| {
            vec![OsString::from("--key-names"), OsString::from(key)]
        });
        let parsed: DescribeKeyPairs =
            self.run_ec2_json(&["describe-key-pairs"], extra, "key pairs")?;
        Ok(parsed.key_pairs.into_iter().map(Into::into).collect())
    }

    fn describe_instance(&self, instance_id: &str) -> Result<LaunchedInstance, AwsError> {
        let parsed: DescribeInstances = self.run_ec2_json(
            &["describe-instances"],
            vec![OsString::from("--instance-ids"), OsString::from(instance_id)],
            "instances",
        )?;
        let instance = parsed
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .find(|instance| instance.id == instance_id)
            .ok_or_else(|| AwsError::Parse {
                resource: String::from("instances"),
                message: format!("instance {instance_id} missing from describe output"),
            })?;
        let public_ip = instance
            .public_ip
            .as_deref()
            .map(str::parse::<IpAddr>)
            .transpose()
            .map_err(|err| AwsError::Parse {
                resource: String::from("instances"),
                message: err.to_string(),
            })?;
        Ok(LaunchedInstance {
            id: instance.id,
            public_ip,
            security_group_id: instance
                .security_groups
                .into_iter()
                .next()
                .map(|group| group.id),
        })
    }
}

/// Renders `--tag-specifications` as JSON so keys and values need no
/// shorthand escaping.
#[must_use]
pub fn tag_specification(resource_type: &str, tags: &BTreeMap<String, String>) -> String {
    let tags = tags
        .iter()
        .map(|(key, value)| json!({ "Key": key, "Value": value }))
        .collect::<Vec<_>>();
    json!([{ "ResourceType": resource_type, "Tags": tags }]).to_string()
}

fn launch_args(request: &LaunchRequest) -> Vec<OsString> {
    let mut args = vec![
        OsString::from("--image-id"),
        OsString::from(&request.image_id),
        OsString::from("--instance-type"),
        OsString::from(&request.instance_type),
        OsString::from("--key-name"),
        OsString::from(&request.key_name),
        OsString::from("--count"),
        OsString::from("1"),
        OsString::from("--client-token"),
        OsString::from(&request.client_token),
        // The CLI base64-encodes user data itself.
        OsString::from("--user-data"),
        OsString::from(request.boot_script.as_str()),
    ];
    if let Some(group) = &request.security_group_id {
        args.push(OsString::from("--security-group-ids"));
        args.push(OsString::from(group));
    }
    if request.root_volume_gib > 0 {
        args.push(OsString::from("--block-device-mappings"));
        args.push(OsString::from(format!(
            "DeviceName={ROOT_DEVICE_NAME},Ebs={{VolumeSize={},VolumeType=gp3,DeleteOnTermination=true}}",
            request.root_volume_gib
        )));
    }
    if !request.tags.is_empty() {
        args.push(OsString::from("--tag-specifications"));
        args.push(OsString::from(tag_specification("instance", &request.tags)));
    }
    args
}

fn registry_error(err: &AwsError) -> RegistryError {
    RegistryError::Remote {
        message: err.to_string(),
    }
}

fn backend_error(
    err: &AwsError,
    operation: &str,
    resource: &str,
    id: &str,
    codes: &[&str],
) -> BackendError {
    if codes.iter().any(|code| err.has_code(code)) {
        return BackendError::NotFound {
            resource: resource.to_owned(),
            id: id.to_owned(),
        };
    }
    BackendError::Provider {
        operation: operation.to_owned(),
        message: err.to_string(),
    }
}

impl<R: CommandRunner> KeyPairRegistry for AwsCli<R> {
    fn exists(&self, name: &str) -> Result<bool, RegistryError> {
        match self.describe_key_pairs(Some(name)) {
            Ok(records) => Ok(records.iter().any(|record| record.name == name)),
            Err(err) if err.has_code(KEY_PAIR_NOT_FOUND) => Ok(false),
            Err(err) => Err(registry_error(&err)),
        }
    }

    fn describe_all(&self) -> Result<Vec<KeyPairRecord>, RegistryError> {
        self.describe_key_pairs(None)
            .map_err(|err| registry_error(&err))
    }

    fn create(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<CreatedKeyPair, RegistryError> {
        let mut extra = vec![
            OsString::from("--key-name"),
            OsString::from(name),
            OsString::from("--key-type"),
            OsString::from("rsa"),
            OsString::from("--key-format"),
            OsString::from("pem"),
        ];
        if !tags.is_empty() {
            extra.push(OsString::from("--tag-specifications"));
            extra.push(OsString::from(tag_specification("key-pair", tags)));
        }
        let created: CreateKeyPairOutput = self
            .run_ec2_json(&["create-key-pair"], extra, "create key pair")
            .map_err(|err| registry_error(&err))?;
        info!(key_name = name, region = %self.config.region, "registered key pair");
        Ok(CreatedKeyPair {
            fingerprint: created.fingerprint,
            private_key: PrivateKey::new(created.material),
        })
    }

    fn delete(&self, name: &str) -> Result<(), RegistryError> {
        match self.run_ec2(
            &["delete-key-pair"],
            vec![OsString::from("--key-name"), OsString::from(name)],
            "delete key pair",
        ) {
            Ok(_) => Ok(()),
            Err(err) if err.has_code(KEY_PAIR_NOT_FOUND) => Err(RegistryError::NotFound {
                name: name.to_owned(),
            }),
            Err(err) => Err(registry_error(&err)),
        }
    }
}

impl<R: CommandRunner> InstanceBackend for AwsCli<R> {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedInstance, BackendError> {
        request.validate()?;
        let provider = |err: AwsError| BackendError::Provider {
            operation: String::from("launch instance"),
            message: err.to_string(),
        };

        let output: RunInstancesOutput = self
            .run_ec2_json(&["run-instances"], launch_args(request), "run instances")
            .map_err(provider)?;
        let instance_id = output
            .instances
            .into_iter()
            .next()
            .map(|instance| instance.id)
            .ok_or_else(|| BackendError::Provider {
                operation: String::from("launch instance"),
                message: String::from("run-instances returned no instances"),
            })?;
        info!(instance_id = %instance_id, image_id = %request.image_id, "instance launched");

        let unconfirmed = |err: AwsError| BackendError::Unconfirmed {
            instance_id: instance_id.clone(),
            operation: String::from("confirm instance"),
            message: err.to_string(),
        };
        self.run_ec2(
            &["wait", "instance-running"],
            vec![OsString::from("--instance-ids"), OsString::from(&instance_id)],
            "wait instance running",
        )
        .map_err(unconfirmed)?;
        self.describe_instance(&instance_id).map_err(unconfirmed)
    }

    fn terminate(&self, instance_id: &str) -> Result<(), BackendError> {
        self.run_ec2(
            &["terminate-instances"],
            vec![OsString::from("--instance-ids"), OsString::from(instance_id)],
            "terminate instances",
        )
        .map_err(|err| {
            backend_error(
                &err,
                "terminate instance",
                "instance",
                instance_id,
                &[INSTANCE_NOT_FOUND],
            )
        })?;
        info!(instance_id, "instance terminating");
        Ok(())
    }

    fn deregister_image(&self, image_id: &str) -> Result<(), BackendError> {
        self.run_ec2(
            &["deregister-image"],
            vec![OsString::from("--image-id"), OsString::from(image_id)],
            "deregister image",
        )
        .map_err(|err| {
            backend_error(
                &err,
                "deregister image",
                "image",
                image_id,
                &[IMAGE_NOT_FOUND, IMAGE_UNAVAILABLE],
            )
        })?;
        info!(image_id, "image deregistered");
        Ok(())
    }
}
