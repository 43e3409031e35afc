//! Local record of instances and key pairs created by the tool.
//!
//! The record is one JSON document. Every mutation is a read-modify-write of
//! the whole file, and saves go through a temporary sibling plus rename so a
//! concurrent reader sees either the old or the new document. Two processes
//! writing at once still race: the last save wins.

use std::collections::BTreeMap;
use std::io;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// A provisioned instance tracked locally.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Instance {
    /// Provider instance identifier.
    pub id: String,
    /// Environment the instance was bootstrapped with.
    pub environment: String,
    /// Instance shape.
    pub instance_type: String,
    /// Public address, once assigned.
    #[serde(default)]
    pub public_ip: Option<IpAddr>,
    /// Key pair used for SSH.
    pub key_name: String,
    /// Time the launch succeeded.
    pub launch_time: DateTime<Utc>,
    /// Idle timeout, for example `2h`.
    #[serde(default)]
    pub idle_timeout: String,
    /// Process id of a local SSH tunnel, when one is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_pid: Option<u32>,
    /// Region hosting the instance.
    pub region: String,
    /// Security group attached at launch.
    #[serde(default)]
    pub security_group_id: Option<String>,
    /// Base image the instance booted from. Absent in records written before
    /// the field existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

/// Persisted document: instances by id and private key paths by key name.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LocalState {
    /// Instances keyed by provider id.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub instances: BTreeMap<String, Instance>,
    /// Private key file paths keyed by key pair name.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub key_pairs: BTreeMap<String, Utf8PathBuf>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl LocalState {
    /// Removes every instance matching `predicate` and returns how many were
    /// removed.
    pub fn remove_instances_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Instance) -> bool,
    {
        let before = self.instances.len();
        self.instances.retain(|_, instance| !predicate(instance));
        before - self.instances.len()
    }
}

/// Errors raised while reading or writing the state document.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StateError {
    /// Raised when the document cannot be read or parsed.
    #[error("failed to load state from {path}: {message}")]
    Load {
        /// State file path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the document cannot be written.
    #[error("failed to save state to {path}: {message}")]
    Save {
        /// State file path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Reads and writes the state document at a fixed path.
#[derive(Clone, Debug)]
pub struct StateStore {
    path: Utf8PathBuf,
}

impl StateStore {
    /// Creates a store for the document at `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the state document.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Loads the document. A missing or blank file yields empty state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Load`] when the file cannot be read or holds
    /// malformed JSON. The file is left untouched.
    pub fn load(&self) -> Result<LocalState, StateError> {
        let (parent, file_name) = self.split().map_err(|message| self.load_error(message))?;
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(LocalState::default()),
            Err(err) => return Err(self.load_error(err.to_string())),
        };
        let contents = match dir.read_to_string(file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path, "no state file, starting empty");
                return Ok(LocalState::default());
            }
            Err(err) => return Err(self.load_error(err.to_string())),
        };
        if contents.trim().is_empty() {
            return Ok(LocalState::default());
        }
        serde_json::from_str(&contents).map_err(|err| self.load_error(err.to_string()))
    }

    /// Replaces the document with `state`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Save`] when serialisation or any filesystem step
    /// fails.
    pub fn save(&self, state: &LocalState) -> Result<(), StateError> {
        let (parent, file_name) = self.split().map_err(|message| self.save_error(message))?;
        let mut rendered =
            serde_json::to_string_pretty(state).map_err(|err| self.save_error(err.to_string()))?;
        rendered.push('\n');

        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| self.save_error(err.to_string()))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| self.save_error(err.to_string()))?;

        let tmp_name = format!(".{file_name}.{}.tmp", Uuid::new_v4().simple());
        if let Err(err) = dir.write(&tmp_name, rendered) {
            return Err(self.save_error(err.to_string()));
        }
        if let Err(err) = dir.rename(&tmp_name, &dir, file_name) {
            dir.remove_file(&tmp_name).ok();
            return Err(self.save_error(err.to_string()));
        }
        debug!(
            path = %self.path,
            instances = state.instances.len(),
            key_pairs = state.key_pairs.len(),
            "saved state"
        );
        Ok(())
    }

    /// Loads, applies `mutate`, saves, and returns whatever `mutate` returned.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when loading or saving fails.
    pub fn update<T, F>(&self, mutate: F) -> Result<T, StateError>
    where
        F: FnOnce(&mut LocalState) -> T,
    {
        let mut state = self.load()?;
        let result = mutate(&mut state);
        self.save(&state)?;
        Ok(result)
    }

    /// Removes every instance matching `predicate`. The file is rewritten
    /// only when at least one entry was removed. Returns the removal count.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when loading or saving fails.
    pub fn prune_by<F>(&self, predicate: F) -> Result<usize, StateError>
    where
        F: FnMut(&Instance) -> bool,
    {
        let mut state = self.load()?;
        let removed = state.remove_instances_where(predicate);
        if removed > 0 {
            self.save(&state)?;
            info!(path = %self.path, removed, "pruned instances from state");
        }
        Ok(removed)
    }

    fn split(&self) -> Result<(&Utf8Path, &str), String> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| String::from("state file path is missing a filename"))?;
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Ok((parent, file_name))
    }

    fn load_error(&self, message: String) -> StateError {
        StateError::Load {
            path: self.path.clone(),
            message,
        }
    }

    fn save_error(&self, message: String) -> StateError {
        StateError::Save {
            path: self.path.clone(),
            message,
        }
    }
}
