//! Backend abstraction for launching and tearing down notebook instances.

use std::collections::BTreeMap;
use std::net::IpAddr;

use thiserror::Error;

use crate::bootstrap::BootScript;

/// Parameters required to launch a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchRequest {
    /// Base image identifier (AMI).
    pub image_id: String,
    /// Instance type, for example `t3.large`.
    pub instance_type: String,
    /// Key pair registered with the provider.
    pub key_name: String,
    /// Security group attached to the instance, if any.
    pub security_group_id: Option<String>,
    /// Root volume size in GiB; zero keeps the image default.
    pub root_volume_gib: u32,
    /// First-boot script.
    pub boot_script: BootScript,
    /// Tags applied to the instance.
    pub tags: BTreeMap<String, String>,
    /// Idempotency token so a retried call cannot launch twice.
    pub client_token: String,
}

impl LaunchRequest {
    /// Starts a builder for a [`LaunchRequest`].
    #[must_use]
    pub fn builder() -> LaunchRequestBuilder {
        LaunchRequestBuilder::default()
    }

    /// Validates the request, returning the first blank required field.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a required field is empty.
    pub fn validate(&self) -> Result<(), BackendError> {
        for (field, value) in [
            ("image_id", &self.image_id),
            ("instance_type", &self.instance_type),
            ("key_name", &self.key_name),
            ("client_token", &self.client_token),
        ] {
            if value.is_empty() {
                return Err(BackendError::Validation(field.to_owned()));
            }
        }
        if self
            .security_group_id
            .as_deref()
            .is_some_and(str::is_empty)
        {
            return Err(BackendError::Validation(String::from("security_group_id")));
        }
        Ok(())
    }
}

/// Builder for [`LaunchRequest`] that trims string inputs on build.
#[derive(Clone, Debug, Default)]
pub struct LaunchRequestBuilder {
    image_id: String,
    instance_type: String,
    key_name: String,
    security_group_id: Option<String>,
    root_volume_gib: u32,
    boot_script: Option<BootScript>,
    tags: BTreeMap<String, String>,
    client_token: String,
}

impl LaunchRequestBuilder {
    /// Sets the base image identifier.
    #[must_use]
    pub fn image_id(mut self, value: impl Into<String>) -> Self {
        self.image_id = value.into();
        self
    }

    /// Sets the instance type.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the key pair name.
    #[must_use]
    pub fn key_name(mut self, value: impl Into<String>) -> Self {
        self.key_name = value.into();
        self
    }

    /// Sets the optional security group.
    #[must_use]
    pub fn security_group_id(mut self, value: Option<String>) -> Self {
        self.security_group_id = value;
        self
    }

    /// Sets the root volume size.
    #[must_use]
    pub const fn root_volume_gib(mut self, value: u32) -> Self {
        self.root_volume_gib = value;
        self
    }

    /// Sets the first-boot script.
    #[must_use]
    pub fn boot_script(mut self, value: BootScript) -> Self {
        self.boot_script = Some(value);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Sets the idempotency token.
    #[must_use]
    pub fn client_token(mut self, value: impl Into<String>) -> Self {
        self.client_token = value.into();
        self
    }

    /// Builds and validates the [`LaunchRequest`].
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a required field is empty or
    /// the boot script is missing.
    pub fn build(self) -> Result<LaunchRequest, BackendError> {
        let boot_script = self
            .boot_script
            .ok_or_else(|| BackendError::Validation(String::from("boot_script")))?;
        let request = LaunchRequest {
            image_id: self.image_id.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            key_name: self.key_name.trim().to_owned(),
            security_group_id: self.security_group_id.map(|value| value.trim().to_owned()),
            root_volume_gib: self.root_volume_gib,
            boot_script,
            tags: self.tags,
            client_token: self.client_token.trim().to_owned(),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Details of a freshly launched instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchedInstance {
    /// Provider specific identifier.
    pub id: String,
    /// Public address once the instance is running.
    pub public_ip: Option<IpAddr>,
    /// Security group actually attached.
    pub security_group_id: Option<String>,
}

/// Errors raised by backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the addressed resource does not exist remotely.
    #[error("{resource} `{id}` not found")]
    NotFound {
        /// Kind of resource, for example `instance`.
        resource: String,
        /// Provider identifier.
        id: String,
    },
    /// Raised when the provider created an instance but a later step of the
    /// launch failed. The instance may still be running.
    #[error("{operation} failed for instance {instance_id}: {message}")]
    Unconfirmed {
        /// Identifier of the created instance.
        instance_id: String,
        /// Step that failed after creation.
        operation: String,
        /// Failure description.
        message: String,
    },
    /// Raised when the provider call fails.
    #[error("{operation} failed: {message}")]
    Provider {
        /// Operation being performed.
        operation: String,
        /// Failure description.
        message: String,
    },
}

/// Minimal instance lifecycle implemented by cloud backends.
pub trait InstanceBackend {
    /// Launches an instance and waits until it is running.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when validation or the provider call fails,
    /// and [`BackendError::Unconfirmed`] when the instance was created but
    /// could not be confirmed as running.
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedInstance, BackendError>;

    /// Terminates an instance.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] when the instance is unknown.
    fn terminate(&self, instance_id: &str) -> Result<(), BackendError>;

    /// Deregisters a base image.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] when the image is unknown.
    fn deregister_image(&self, image_id: &str) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootScript;

    fn builder() -> LaunchRequestBuilder {
        LaunchRequest::builder()
            .image_id(" ami-123 ")
            .instance_type("t3.large")
            .key_name("labship-us-west-2")
            .boot_script(BootScript::from_raw("#!/bin/bash\n"))
            .client_token("token")
    }

    #[test]
    fn build_trims_fields() {
        let request = builder().build().expect("request should build");
        assert_eq!(request.image_id, "ami-123");
        assert_eq!(request.root_volume_gib, 0);
    }

    #[test]
    fn build_requires_boot_script() {
        let err = LaunchRequest::builder()
            .image_id("ami-123")
            .instance_type("t3.large")
            .key_name("k")
            .client_token("t")
            .build()
            .expect_err("boot script required");
        assert_eq!(err, BackendError::Validation(String::from("boot_script")));
    }

    #[test]
    fn build_rejects_blank_key_name() {
        let err = builder()
            .key_name("  ")
            .build()
            .expect_err("key name required");
        assert_eq!(err, BackendError::Validation(String::from("key_name")));
    }

    #[test]
    fn build_rejects_blank_security_group() {
        let err = builder()
            .security_group_id(Some(String::from(" ")))
            .build()
            .expect_err("blank security group rejected");
        assert_eq!(
            err,
            BackendError::Validation(String::from("security_group_id"))
        );
    }
}
