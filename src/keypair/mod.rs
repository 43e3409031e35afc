//! SSH key pair resolution.
//!
//! Launching an instance needs a key pair registered with the provider. The
//! resolver decides between three outcomes: verify a key the user named,
//! reuse the tool's default key for the region, or create a new one. Only
//! creation mutates remote state, and it never happens under a name the user
//! supplied unless creation was explicitly forced.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::credentials::PrivateKey;

/// Tag key marking resources created by this tool.
pub const PROVENANCE_TAG_KEY: &str = "ManagedBy";
/// Tag value marking resources created by this tool.
pub const PROVENANCE_TAG_VALUE: &str = "labship";
/// Separator between the namespace prefix and the rest of a key name.
pub const KEY_NAME_SEPARATOR: char = '-';

/// Who brought a key pair into existence.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatedBy {
    /// Created and tagged by this tool.
    Tool,
    /// Pre-existing key referenced by the user.
    User,
}

impl fmt::Display for CreatedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tool => "tool",
            Self::User => "user",
        })
    }
}

/// Policy controlling how a key pair is chosen for a launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPairStrategy {
    /// Reuse the default key for the region when it already exists.
    pub prefer_existing: bool,
    /// Namespace prefix used to build the default key name.
    pub default_prefix: String,
    /// Explicit key name supplied by the user.
    pub user_specified: Option<String>,
    /// Region the key lives in; also namespaces the default name.
    pub region: String,
    /// Create a new key even when an existing one would do.
    pub force_create: bool,
}

impl KeyPairStrategy {
    /// Returns the user-specified name when it is non-blank.
    #[must_use]
    pub fn user_key_name(&self) -> Option<&str> {
        self.user_specified
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Default key name for the region: `<prefix>-<region>`.
    #[must_use]
    pub fn default_key_name(&self) -> String {
        format!(
            "{}{KEY_NAME_SEPARATOR}{}",
            self.default_prefix, self.region
        )
    }

    /// Name the resolver will verify, reuse, or create.
    #[must_use]
    pub fn key_name(&self) -> String {
        self.user_key_name()
            .map_or_else(|| self.default_key_name(), str::to_owned)
    }
}

/// Outcome of key pair resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPairInfo {
    /// Key pair name registered with the provider.
    pub name: String,
    /// Fingerprint reported by the provider.
    pub fingerprint: String,
    /// Private key material, present only for a key created by this call.
    pub private_key: Option<PrivateKey>,
    /// Region holding the key pair.
    pub region: String,
    /// Provenance of the key pair.
    pub created_by: CreatedBy,
}

/// Key pair as described by the remote registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPairRecord {
    /// Key pair name.
    pub name: String,
    /// Fingerprint reported by the provider.
    pub fingerprint: String,
    /// Provider identifier, when reported.
    pub key_pair_id: Option<String>,
    /// Tags attached to the key pair.
    pub tags: BTreeMap<String, String>,
}

/// Material returned when the registry creates a key pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedKeyPair {
    /// Fingerprint of the new key.
    pub fingerprint: String,
    /// Private key; the provider never returns it again.
    pub private_key: PrivateKey,
}

/// Failures reported by a [`KeyPairRegistry`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// The named key pair does not exist remotely.
    #[error("key pair `{name}` not found")]
    NotFound {
        /// Requested key pair name.
        name: String,
    },
    /// Transport, permission, or parsing failure.
    #[error("{message}")]
    Remote {
        /// Description of the failure.
        message: String,
    },
}

/// Remote key pair API of the cloud provider.
pub trait KeyPairRegistry {
    /// Reports whether `name` exists. Absence is `Ok(false)`, never an error.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Remote`] when the query itself fails.
    fn exists(&self, name: &str) -> Result<bool, RegistryError>;

    /// Lists every key pair visible in the region.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Remote`] when the query fails.
    fn describe_all(&self) -> Result<Vec<KeyPairRecord>, RegistryError>;

    /// Creates a key pair tagged with `tags`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Remote`] when creation fails.
    fn create(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<CreatedKeyPair, RegistryError>;

    /// Deletes a key pair.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when the key is absent and
    /// [`RegistryError::Remote`] for any other failure.
    fn delete(&self, name: &str) -> Result<(), RegistryError>;
}

/// Errors raised while resolving or managing key pairs.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum KeyPairError {
    /// The user named a key pair that the provider does not know.
    #[error("user-specified key pair `{name}` does not exist in {region}")]
    UserKeyMissing {
        /// Name supplied by the user.
        name: String,
        /// Region that was searched.
        region: String,
    },
    /// The registry confirmed a key exists but did not list it.
    #[error("key pair `{name}` exists but was missing from the key pair listing")]
    MissingFromListing {
        /// Name reported as existing.
        name: String,
    },
    /// The key pair was not created by this tool.
    #[error("key pair `{name}` is not managed by labship (expected prefix `{prefix}-`)")]
    NotToolOwned {
        /// Rejected key pair name.
        name: String,
        /// Namespace prefix expected for tool-owned keys.
        prefix: String,
    },
    /// A registry call failed.
    #[error("{operation} failed: {source}")]
    Registry {
        /// Operation being performed, for example `describe key pairs`.
        operation: String,
        /// Underlying registry failure.
        #[source]
        source: RegistryError,
    },
}

impl KeyPairError {
    fn registry(operation: impl fmt::Display, source: RegistryError) -> Self {
        Self::Registry {
            operation: operation.to_string(),
            source,
        }
    }
}

/// Returns `true` when `name` lives in the tool's namespace: the prefix, the
/// separator, and at least one more character.
#[must_use]
pub fn is_tool_owned(name: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(KEY_NAME_SEPARATOR))
        .is_some_and(|suffix| !suffix.is_empty())
}

/// Builds the provenance tags attached to created key pairs.
#[must_use]
pub fn provenance_tags(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            String::from(PROVENANCE_TAG_KEY),
            String::from(PROVENANCE_TAG_VALUE),
        ),
        (String::from("Name"), name.to_owned()),
    ])
}

/// Chooses, verifies, or creates key pairs against a registry.
#[derive(Clone, Debug)]
pub struct KeyPairResolver<R> {
    registry: R,
    prefix: String,
}

impl<R: KeyPairRegistry> KeyPairResolver<R> {
    /// Creates a resolver; `prefix` defines which names count as tool-owned.
    #[must_use]
    pub fn new(registry: R, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            prefix: prefix.into(),
        }
    }

    /// Registry used by the resolver.
    #[must_use]
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// Namespace prefix for tool-owned keys.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolves the key pair to use for a launch.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::UserKeyMissing`] when a user-specified key is
    /// absent (nothing is created in that case), and
    /// [`KeyPairError::Registry`] when a remote call fails.
    pub fn resolve(&self, strategy: &KeyPairStrategy) -> Result<KeyPairInfo, KeyPairError> {
        let name = strategy.key_name();

        if !strategy.force_create {
            if let Some(user_name) = strategy.user_key_name() {
                return self.verify_user_key(user_name, strategy);
            }
            if strategy.prefer_existing
                && let Some(existing) = self.find_existing(&name, strategy)?
            {
                return Ok(existing);
            }
        }

        self.create(&name, strategy)
    }

    /// Lists every key pair in the registry.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::Registry`] when the listing fails.
    pub fn list_all(&self) -> Result<Vec<KeyPairRecord>, KeyPairError> {
        self.registry
            .describe_all()
            .map_err(|err| KeyPairError::registry("describe key pairs", err))
    }

    /// Lists key pairs whose names fall in the tool's namespace.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::Registry`] when the listing fails.
    pub fn list_owned_by_tool(&self) -> Result<Vec<KeyPairRecord>, KeyPairError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|record| is_tool_owned(&record.name, &self.prefix))
            .collect())
    }

    /// Deletes a tool-owned key pair from the registry. Returns `false` when
    /// the key was already gone.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPairError::NotToolOwned`] for names outside the tool's
    /// namespace and [`KeyPairError::Registry`] when deletion fails.
    pub fn delete_owned(&self, name: &str) -> Result<bool, KeyPairError> {
        if !is_tool_owned(name, &self.prefix) {
            return Err(KeyPairError::NotToolOwned {
                name: name.to_owned(),
                prefix: self.prefix.clone(),
            });
        }
        match self.registry.delete(name) {
            Ok(()) => {
                info!(key_name = name, "deleted key pair");
                Ok(true)
            }
            Err(RegistryError::NotFound { .. }) => {
                debug!(key_name = name, "key pair already absent");
                Ok(false)
            }
            Err(err) => Err(KeyPairError::registry(
                format_args!("delete key pair `{name}`"),
                err,
            )),
        }
    }

    fn exists(&self, name: &str) -> Result<bool, KeyPairError> {
        match self.registry.exists(name) {
            Ok(found) => Ok(found),
            Err(RegistryError::NotFound { .. }) => Ok(false),
            Err(err) => Err(KeyPairError::registry(
                format_args!("check key pair `{name}`"),
                err,
            )),
        }
    }

    fn verify_user_key(
        &self,
        name: &str,
        strategy: &KeyPairStrategy,
    ) -> Result<KeyPairInfo, KeyPairError> {
        if !self.exists(name)? {
            return Err(KeyPairError::UserKeyMissing {
                name: name.to_owned(),
                region: strategy.region.clone(),
            });
        }
        debug!(key_name = name, "using user-specified key pair");
        let fingerprint = self
            .lookup(name)?
            .map(|record| record.fingerprint)
            .unwrap_or_default();
        Ok(KeyPairInfo {
            name: name.to_owned(),
            fingerprint,
            private_key: None,
            region: strategy.region.clone(),
            created_by: CreatedBy::User,
        })
    }

    fn find_existing(
        &self,
        name: &str,
        strategy: &KeyPairStrategy,
    ) -> Result<Option<KeyPairInfo>, KeyPairError> {
        if !self.exists(name)? {
            debug!(key_name = name, "no existing key pair to reuse");
            return Ok(None);
        }
        let record = self
            .lookup(name)?
            .ok_or_else(|| KeyPairError::MissingFromListing {
                name: name.to_owned(),
            })?;
        debug!(key_name = name, "reusing existing key pair");
        let created_by = if is_tool_owned(&record.name, &self.prefix) {
            CreatedBy::Tool
        } else {
            CreatedBy::User
        };
        Ok(Some(KeyPairInfo {
            name: record.name,
            fingerprint: record.fingerprint,
            private_key: None,
            region: strategy.region.clone(),
            created_by,
        }))
    }

    fn lookup(&self, name: &str) -> Result<Option<KeyPairRecord>, KeyPairError> {
        Ok(self
            .list_all()?
            .into_iter()
            .find(|record| record.name == name))
    }

    fn create(&self, name: &str, strategy: &KeyPairStrategy) -> Result<KeyPairInfo, KeyPairError> {
        let created = self
            .registry
            .create(name, &provenance_tags(name))
            .map_err(|err| KeyPairError::registry(format_args!("create key pair `{name}`"), err))?;
        info!(
            key_name = name,
            region = %strategy.region,
            fingerprint = %created.fingerprint,
            "created key pair"
        );
        Ok(KeyPairInfo {
            name: name.to_owned(),
            fingerprint: created.fingerprint,
            private_key: Some(created.private_key),
            region: strategy.region.clone(),
            created_by: CreatedBy::Tool,
        })
    }
}

#[cfg(test)]
mod tests;
