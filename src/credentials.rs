//! Local storage for key pair material.
//!
//! Each key pair maps to one `<name>.pem` file readable only by the owner.
//! An optional `<name>.pub` companion is world-readable. Key names are
//! sanitised so a name containing path separators cannot escape the keys
//! directory.

use std::fmt;
use std::io;
use std::os::unix::fs::PermissionsExt as _;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::Permissions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, info};

/// File extension used for private keys.
pub const PRIVATE_KEY_EXTENSION: &str = "pem";
/// File extension used for public keys.
pub const PUBLIC_KEY_EXTENSION: &str = "pub";
/// Mode applied to private key files.
pub const PRIVATE_KEY_MODE: u32 = 0o600;
/// Mode applied to public key files.
pub const PUBLIC_KEY_MODE: u32 = 0o644;

/// Private key material returned by the provider when a key pair is created.
///
/// The provider never returns this again, so the value travels from the
/// resolver to [`CredentialStore`] and nowhere else. `Debug` output is
/// redacted.
#[derive(Clone, Eq, PartialEq)]
pub struct PrivateKey(String);

impl PrivateKey {
    /// Wraps raw PEM material.
    #[must_use]
    pub fn new(material: impl Into<String>) -> Self {
        Self(material.into())
    }

    /// Returns the PEM material.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Errors raised while reading or writing key files.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// Raised when a key name is empty after trimming.
    #[error("key pair name must not be empty")]
    EmptyName,
    /// Raised when a filesystem operation fails.
    #[error("failed to {operation} {path}: {message}")]
    Io {
        /// Operation that failed, for example `write private key`.
        operation: String,
        /// Path involved in the failure.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Replaces path separators so the key name is a single path component.
#[must_use]
pub fn sanitise_key_name(name: &str) -> String {
    name.trim().replace(['/', '\\'], "_")
}

/// Stores key material beneath a single directory.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    keys_dir: Utf8PathBuf,
}

impl CredentialStore {
    /// Creates a store rooted at `keys_dir`. The directory is created lazily
    /// on first write.
    #[must_use]
    pub fn new(keys_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            keys_dir: keys_dir.into(),
        }
    }

    /// Directory holding key files.
    #[must_use]
    pub fn keys_dir(&self) -> &Utf8Path {
        &self.keys_dir
    }

    /// Path of the private key file for `key_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::EmptyName`] for a blank name.
    pub fn private_key_path(&self, key_name: &str) -> Result<Utf8PathBuf, CredentialError> {
        Ok(self.keys_dir.join(file_name(key_name, PRIVATE_KEY_EXTENSION)?))
    }

    /// Path of the public key file for `key_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::EmptyName`] for a blank name.
    pub fn public_key_path(&self, key_name: &str) -> Result<Utf8PathBuf, CredentialError> {
        Ok(self.keys_dir.join(file_name(key_name, PUBLIC_KEY_EXTENSION)?))
    }

    /// Writes the private key with owner-only permissions, replacing any
    /// previous file, and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the name is blank or the file cannot
    /// be written.
    pub fn save_private_key(
        &self,
        key_name: &str,
        key: &PrivateKey,
    ) -> Result<Utf8PathBuf, CredentialError> {
        let name = file_name(key_name, PRIVATE_KEY_EXTENSION)?;
        self.write_with_mode(&name, key.expose(), PRIVATE_KEY_MODE, "write private key")?;
        let path = self.keys_dir.join(&name);
        info!(key_name, %path, "saved private key");
        Ok(path)
    }

    /// Writes the public key with owner read/write and world read.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the name is blank or the file cannot
    /// be written.
    pub fn save_public_key(
        &self,
        key_name: &str,
        material: &str,
    ) -> Result<Utf8PathBuf, CredentialError> {
        let name = file_name(key_name, PUBLIC_KEY_EXTENSION)?;
        self.write_with_mode(&name, material, PUBLIC_KEY_MODE, "write public key")?;
        Ok(self.keys_dir.join(&name))
    }

    /// Removes the private and public key files for `key_name`. Returns
    /// `true` when a private key file was present.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when a file exists but cannot be removed.
    pub fn remove(&self, key_name: &str) -> Result<bool, CredentialError> {
        let private_name = file_name(key_name, PRIVATE_KEY_EXTENSION)?;
        let public_name = file_name(key_name, PUBLIC_KEY_EXTENSION)?;
        let dir = match Dir::open_ambient_dir(&self.keys_dir, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(self.io_error("open keys directory", &self.keys_dir, &err)),
        };

        let removed = remove_if_present(&dir, &private_name)
            .map_err(|err| self.io_error("remove private key", &private_name, &err))?;
        remove_if_present(&dir, &public_name)
            .map_err(|err| self.io_error("remove public key", &public_name, &err))?;
        debug!(key_name, removed, "removed local key files");
        Ok(removed)
    }

    fn write_with_mode(
        &self,
        name: &str,
        contents: &str,
        mode: u32,
        operation: &str,
    ) -> Result<(), CredentialError> {
        Dir::create_ambient_dir_all(&self.keys_dir, ambient_authority())
            .map_err(|err| self.io_error("create keys directory", &self.keys_dir, &err))?;
        let dir = Dir::open_ambient_dir(&self.keys_dir, ambient_authority())
            .map_err(|err| self.io_error("open keys directory", &self.keys_dir, &err))?;

        // Restrict the temporary file before any key material lands in it.
        let tmp_name = format!(".{name}.tmp");
        dir.create(&tmp_name)
            .map_err(|err| self.io_error(operation, &tmp_name, &err))?;
        dir.set_permissions(
            &tmp_name,
            Permissions::from_std(std::fs::Permissions::from_mode(mode)),
        )
        .map_err(|err| self.io_error(operation, &tmp_name, &err))?;
        dir.write(&tmp_name, contents)
            .map_err(|err| self.io_error(operation, &tmp_name, &err))?;
        dir.rename(&tmp_name, &dir, name)
            .map_err(|err| self.io_error(operation, name, &err))
    }

    fn io_error(
        &self,
        operation: &str,
        name: impl AsRef<Utf8Path>,
        err: &io::Error,
    ) -> CredentialError {
        let relative = name.as_ref();
        let path = if relative == self.keys_dir.as_path() {
            self.keys_dir.clone()
        } else {
            self.keys_dir.join(relative)
        };
        CredentialError::Io {
            operation: operation.to_owned(),
            path,
            message: err.to_string(),
        }
    }
}

fn file_name(key_name: &str, extension: &str) -> Result<String, CredentialError> {
    let sanitised = sanitise_key_name(key_name);
    if sanitised.is_empty() {
        return Err(CredentialError::EmptyName);
    }
    Ok(format!("{sanitised}.{extension}"))
}

fn remove_if_present(dir: &Dir, name: &str) -> io::Result<bool> {
    match dir.remove_file(name) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
