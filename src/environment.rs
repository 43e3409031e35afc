//! Environment descriptions and their loader.
//!
//! An environment is a TOML file naming the instance shape, base image and
//! the packages the bootstrap script installs. The loader searches the user
//! override directory before the built-in directory and the first match
//! wins.

use std::collections::{BTreeMap, BTreeSet};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// File extension of environment descriptions.
pub const ENVIRONMENT_EXTENSION: &str = "toml";

/// Declarative description of a notebook machine.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    /// Display name; defaults to the file stem when omitted.
    #[serde(default)]
    pub name: String,
    /// Instance shape, for example `t3.large`.
    pub instance_type: String,
    /// Base image identifier.
    pub image_id: String,
    /// Root volume size in GiB; zero keeps the image default.
    #[serde(default)]
    pub root_volume_gib: u32,
    /// OS packages installed with the system package manager.
    #[serde(default)]
    pub system_packages: Vec<String>,
    /// Python packages installed with pip.
    #[serde(default)]
    pub python_packages: Vec<String>,
    /// Notebook extensions installed one by one.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Variables exported from the default shell profile.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Environment {
    /// Parses a TOML description. `fallback_name` fills an omitted `name`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Parse`] for malformed TOML and
    /// [`EnvironmentError::Invalid`] when validation fails.
    pub fn from_toml(
        contents: &str,
        fallback_name: &str,
        path: &Utf8Path,
    ) -> Result<Self, EnvironmentError> {
        let mut environment: Self =
            toml::from_str(contents).map_err(|err| EnvironmentError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        if environment.name.trim().is_empty() {
            fallback_name.clone_into(&mut environment.name);
        }
        environment.normalise();
        environment.validate()?;
        Ok(environment)
    }

    /// Trims entries and drops blanks and duplicates, keeping the first
    /// occurrence of each package or extension.
    pub fn normalise(&mut self) {
        self.name = self.name.trim().to_owned();
        self.instance_type = self.instance_type.trim().to_owned();
        self.image_id = self.image_id.trim().to_owned();
        dedup_ordered(&mut self.system_packages);
        dedup_ordered(&mut self.python_packages);
        dedup_ordered(&mut self.extensions);
    }

    /// Checks required fields and variable names.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Invalid`] describing the first problem.
    pub fn validate(&self) -> Result<(), EnvironmentError> {
        let invalid = |message: String| EnvironmentError::Invalid {
            name: self.name.clone(),
            message,
        };
        if self.name.is_empty() {
            return Err(invalid(String::from("name must not be empty")));
        }
        if self.instance_type.is_empty() {
            return Err(invalid(String::from("instance_type must not be empty")));
        }
        if self.image_id.is_empty() {
            return Err(invalid(String::from("image_id must not be empty")));
        }
        if let Some(key) = self.env.keys().find(|key| !is_variable_name(key)) {
            return Err(invalid(format!(
                "environment variable name `{key}` is not a valid shell identifier"
            )));
        }
        if let Some(key) = self
            .env
            .iter()
            .find_map(|(key, value)| value.contains(['\n', '\r']).then_some(key))
        {
            return Err(invalid(format!(
                "environment variable `{key}` must be a single line"
            )));
        }
        Ok(())
    }
}

fn dedup_ordered(items: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    let trimmed = items
        .drain(..)
        .map(|item| item.trim().to_owned())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>();
    for item in trimmed {
        if seen.insert(item.clone()) {
            items.push(item);
        }
    }
}

/// Returns `true` for names matching `[A-Za-z_][A-Za-z0-9_]*`.
#[must_use]
pub fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Errors raised while locating or parsing environments.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum EnvironmentError {
    /// Raised when a lookup name could escape the search directories.
    #[error("invalid environment name `{name}`")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// Raised when no search directory holds the environment.
    #[error("environment `{name}` not found (searched {searched})")]
    NotFound {
        /// Requested name.
        name: String,
        /// Comma separated list of searched directories.
        searched: String,
    },
    /// Raised when a file or directory cannot be read.
    #[error("failed to read {path}: {message}")]
    Read {
        /// Path that failed.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when TOML parsing fails.
    #[error("failed to parse environment {path}: {message}")]
    Parse {
        /// File that failed to parse.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when a parsed environment is incomplete.
    #[error("invalid environment `{name}`: {message}")]
    Invalid {
        /// Environment name.
        name: String,
        /// Description of the problem.
        message: String,
    },
}

/// Resolves environments from an ordered list of directories.
#[derive(Clone, Debug)]
pub struct EnvironmentLoader {
    search_dirs: Vec<Utf8PathBuf>,
}

impl EnvironmentLoader {
    /// Searches `user_dir` first, then `builtin_dir`.
    #[must_use]
    pub fn new(user_dir: impl Into<Utf8PathBuf>, builtin_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            search_dirs: vec![user_dir.into(), builtin_dir.into()],
        }
    }

    /// Directories in search order.
    #[must_use]
    pub fn search_dirs(&self) -> &[Utf8PathBuf] {
        &self.search_dirs
    }

    /// Loads the environment called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::NotFound`] when no directory has it, or a
    /// read/parse/validation error for the first matching file.
    pub fn load(&self, name: &str) -> Result<Environment, EnvironmentError> {
        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('.')
            || trimmed.contains(['/', '\\'])
        {
            return Err(EnvironmentError::InvalidName {
                name: name.to_owned(),
            });
        }

        let file_name = format!("{trimmed}.{ENVIRONMENT_EXTENSION}");
        for dir_path in &self.search_dirs {
            let Some(contents) = read_optional(dir_path, &file_name)? else {
                continue;
            };
            let path = dir_path.join(&file_name);
            debug!(environment = trimmed, %path, "loaded environment");
            return Environment::from_toml(&contents, trimmed, &path);
        }

        Err(EnvironmentError::NotFound {
            name: trimmed.to_owned(),
            searched: self
                .search_dirs
                .iter()
                .map(|dir| dir.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Names available across all directories, sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Read`] when a present directory cannot be
    /// listed.
    pub fn available(&self) -> Result<Vec<String>, EnvironmentError> {
        let mut names = BTreeSet::new();
        for dir_path in &self.search_dirs {
            let dir = match Dir::open_ambient_dir(dir_path, ambient_authority()) {
                Ok(dir) => dir,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(read_error(dir_path, &err)),
            };
            let entries = dir.entries().map_err(|err| read_error(dir_path, &err))?;
            for entry in entries {
                let entry = entry.map_err(|err| read_error(dir_path, &err))?;
                let file_name = entry.file_name().map_err(|err| read_error(dir_path, &err))?;
                if let Some(stem) = file_name
                    .strip_suffix(ENVIRONMENT_EXTENSION)
                    .and_then(|rest| rest.strip_suffix('.'))
                    && !stem.is_empty()
                {
                    names.insert(stem.to_owned());
                }
            }
        }
        Ok(names.into_iter().collect())
    }
}

fn read_optional(dir_path: &Utf8Path, file_name: &str) -> Result<Option<String>, EnvironmentError> {
    let dir = match Dir::open_ambient_dir(dir_path, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(read_error(dir_path, &err)),
    };
    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(read_error(&dir_path.join(file_name), &err)),
    }
}

fn read_error(path: &Utf8Path, err: &io::Error) -> EnvironmentError {
    EnvironmentError::Read {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
