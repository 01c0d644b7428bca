//! Event taxonomy and the server→client wire envelope.
//!
//! Publishers hand the hub an event name and any `Serialize` payload. The hub
//! serializes an [`EventEnvelope`] exactly once into a [`Frame`], which is then
//! shared (by reference count) across every recipient mailbox.
//!
//! Wire format:
//!
//! ```json
//! {"event": "task_created", "payload": {...}, "userId": "u1"}
//! ```
//!
//! `userId` names the user who triggered the change and is omitted when absent.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::HubError;

/// Well-known event names.
///
/// The taxonomy is open: publishers may use any string, these are simply the
/// names the web client subscribes to out of the box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task was created.
    TaskCreated,
    /// A task was updated.
    TaskUpdated,
    /// A task was deleted.
    TaskDeleted,
    /// A chat message was posted.
    ChatMessage,
    /// A user-targeted notification.
    Notification,
    /// An activity log entry was recorded.
    ActivityLog,
    /// A member joined the team.
    MemberJoined,
    /// A project changed.
    ProjectUpdate,
}

impl EventKind {
    /// Every known event kind.
    pub const ALL: [Self; 8] = [
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskDeleted,
        Self::ChatMessage,
        Self::Notification,
        Self::ActivityLog,
        Self::MemberJoined,
        Self::ProjectUpdate,
    ];

    /// Wire name of this event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskDeleted => "task_deleted",
            Self::ChatMessage => "chat_message",
            Self::Notification => "notification",
            Self::ActivityLog => "activity_log",
            Self::MemberJoined => "member_joined",
            Self::ProjectUpdate => "project_update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for EventKind {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Error returned when parsing an unknown event name into [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_owned()))
    }
}

/// Borrowed envelope used for the one-time serialization of a publish.
#[derive(Debug, Serialize)]
pub struct EventEnvelope<'a, P: Serialize + ?Sized> {
    /// Event name.
    pub event: &'a str,
    /// Opaque payload, serialized as-is.
    pub payload: &'a P,
    /// User who triggered the event, if known.
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<&'a str>,
}

impl<'a, P: Serialize + ?Sized> EventEnvelope<'a, P> {
    /// Create an envelope with no originating user.
    pub fn new(event: &'a str, payload: &'a P) -> Self {
        Self {
            event,
            payload,
            user_id: None,
        }
    }

    /// Attach the user who triggered the event.
    #[must_use]
    pub fn with_origin(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Serialize into an immutable, shareable [`Frame`].
    pub fn encode(&self) -> Result<Frame, HubError> {
        serde_json::to_string(self)
            .map(Frame::from)
            .map_err(|source| HubError::Serialization {
                event: self.event.to_owned(),
                source,
            })
    }
}

/// Owned form of the wire envelope, for consumers parsing frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Event name.
    pub event: String,
    /// Payload as arbitrary JSON.
    pub payload: serde_json::Value,
    /// User who triggered the event.
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One serialized envelope. Cloning shares the underlying text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Arc<str>);

impl Frame {
    /// The JSON text of this frame.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of live references to this frame's text.
    #[must_use]
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// A [`Bytes`] view of the text that shares this frame's allocation.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from_owner(SharedText(Arc::clone(&self.0)))
    }
}

struct SharedText(Arc<str>);

impl AsRef<[u8]> for SharedText {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
