//! First-boot script compilation.
//!
//! [`compile`] walks a fixed list of named sections. Each section is a pure
//! function of the [`Environment`] returning `None` when it has nothing to
//! emit, so omitted sections leave no header behind. Present sections are
//! joined with a blank line. Environment variables are emitted in key order,
//! which makes compilation fully deterministic.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::environment::Environment;

mod sections;

pub use sections::{
    BOOTSTRAP_LOG, JUPYTER_CONFIG_PATH, JUPYTER_PORT, JUPYTER_UNIT, NOTEBOOK_USER, SECTIONS,
    Section, WORKSPACE_DIR,
};

/// Largest raw user-data payload EC2 accepts.
pub const USER_DATA_LIMIT_BYTES: usize = 16 * 1024;

const SECTION_SEPARATOR: &str = "\n\n";

/// Errors raised while handling boot scripts.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BootstrapError {
    /// Raised when an encoded payload is not valid base64.
    #[error("failed to decode boot script: {0}")]
    Decode(String),
    /// Raised when a decoded payload is not UTF-8.
    #[error("decoded boot script is not valid UTF-8: {0}")]
    Utf8(String),
    /// Raised when the script exceeds the provider's user-data limit.
    #[error("boot script for `{environment}` is {size} bytes; the limit is {limit} bytes")]
    TooLarge {
        /// Environment the script was compiled for.
        environment: String,
        /// Script size in bytes.
        size: usize,
        /// Provider limit in bytes.
        limit: usize,
    },
}

/// Compiled first-boot script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootScript {
    raw: String,
}

impl BootScript {
    /// Wraps an already rendered script.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Rendered shell script.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Size of the raw script in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` for an empty script.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Base64 form expected by the EC2 `UserData` field.
    #[must_use]
    pub fn encoded(&self) -> String {
        STANDARD.encode(self.raw.as_bytes())
    }

    /// Reverses [`BootScript::encoded`].
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] when the payload is not base64 or does not
    /// decode to UTF-8.
    pub fn decode(encoded: &str) -> Result<Self, BootstrapError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|err| BootstrapError::Decode(err.to_string()))?;
        let raw = String::from_utf8(bytes).map_err(|err| BootstrapError::Utf8(err.to_string()))?;
        Ok(Self { raw })
    }

    /// Ensures the script fits the provider's user-data limit.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::TooLarge`] when it does not.
    pub fn ensure_within_limit(&self, environment: &str) -> Result<(), BootstrapError> {
        if self.raw.len() > USER_DATA_LIMIT_BYTES {
            return Err(BootstrapError::TooLarge {
                environment: environment.to_owned(),
                size: self.raw.len(),
                limit: USER_DATA_LIMIT_BYTES,
            });
        }
        Ok(())
    }
}

/// Renders every present section, in order, paired with its name.
#[must_use]
pub fn render_sections(environment: &Environment) -> Vec<(&'static str, String)> {
    SECTIONS
        .iter()
        .filter_map(|section| {
            (section.render)(environment).map(|body| (section.name, body))
        })
        .collect()
}

/// Compiles an environment into its first-boot script.
#[must_use]
pub fn compile(environment: &Environment) -> BootScript {
    let mut raw = render_sections(environment)
        .into_iter()
        .map(|(_, body)| body)
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);
    raw.push('\n');
    BootScript { raw }
}
