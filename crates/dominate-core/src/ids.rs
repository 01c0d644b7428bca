//! Connection identifiers and caller-supplied identities.
//!
//! A [`ConnectionId`] is unique per WebSocket connection instance and is never
//! reused. An [`Identity`] is whatever the client claimed in the `user_id`
//! query parameter; many connections may share one identity (several open
//! tabs for the same user).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::ANONYMOUS_IDENTITY;

/// Unique identifier for one connection instance (UUID v7, time-ordered).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a fresh connection ID.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque, caller-supplied identity grouping zero or more live connections.
///
/// The hub never authenticates it; it is only used to target
/// `send_to_user` deliveries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Build an identity from an optional request parameter.
    ///
    /// Missing and empty values both collapse to `"anonymous"`.
    #[must_use]
    pub fn from_param(raw: Option<&str>) -> Self {
        match raw {
            Some(value) if !value.is_empty() => Self(value.to_owned()),
            _ => Self::anonymous(),
        }
    }

    /// The shared identity for connections that did not supply one.
    #[must_use]
    pub fn anonymous() -> Self {
        Self(ANONYMOUS_IDENTITY.to_owned())
    }

    /// Whether this is the anonymous identity.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS_IDENTITY
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::from_param(Some(s))
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        if s.is_empty() { Self::anonymous() } else { Self(s) }
    }
}

impl PartialEq<str> for Identity {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
