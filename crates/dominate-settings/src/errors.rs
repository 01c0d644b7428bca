//! Settings load and validation failures.
//!
//! File errors carry the path they came from; validation errors carry the
//! camelCase key of the offending field, as written in `settings.json`.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a [`DominateSettings`](crate::DominateSettings) could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON, or does not fit the schema.
    #[error("{} is not a valid settings document: {source}", .path.display())]
    Json {
        /// File whose contents were rejected.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// A value parsed but the hub cannot run with it.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Dotted camelCase key, e.g. `hub.mailboxCapacity`.
        key: &'static str,
        /// What the value must satisfy.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_owned(),
            source,
        }
    }

    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }

    /// The offending key, for validation failures.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { key, .. } => Some(*key),
            Self::Io { .. } | Self::Json { .. } => None,
        }
    }
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
