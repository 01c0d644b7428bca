//! The publish surface request handlers call after committing a mutation.
//!
//! Every call serializes the envelope once, fans the resulting frame out
//! against the registry's current membership and returns. Nothing here
//! waits on a client; delivery is at-most-once and unacknowledged.

use std::sync::Arc;

use dominate_core::errors::HubError;
use dominate_core::events::{EventEnvelope, Frame};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::metrics::{WS_PUBLISH_FAILURES_TOTAL, WS_PUBLISHED_TOTAL};
use crate::websocket::registry::{ConnectionRegistry, FanOut};

/// Cheap-clone handle for publishing events to connected clients.
#[derive(Clone)]
pub struct Publisher {
    registry: Arc<ConnectionRegistry>,
}

impl Publisher {
    /// Create a publisher over a registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver an event to every connected client.
    ///
    /// Returns how many mailboxes received it. A payload that cannot be
    /// serialized is dropped, logged and returned as
    /// [`HubError::Serialization`]; callers are free to ignore it.
    pub fn broadcast<P>(&self, event: impl AsRef<str>, payload: &P) -> Result<FanOut, HubError>
    where
        P: Serialize + ?Sized,
    {
        let event = event.as_ref();
        let frame = encode(EventEnvelope::new(event, payload))?;
        let sent = self.registry.broadcast_frame(&frame);
        record(event, "broadcast", sent);
        Ok(sent)
    }

    /// Like [`broadcast`](Self::broadcast), tagging the envelope with the
    /// user who triggered the change (`userId` on the wire).
    pub fn broadcast_from<P>(
        &self,
        origin: &str,
        event: impl AsRef<str>,
        payload: &P,
    ) -> Result<FanOut, HubError>
    where
        P: Serialize + ?Sized,
    {
        let event = event.as_ref();
        let frame = encode(EventEnvelope::new(event, payload).with_origin(origin))?;
        let sent = self.registry.broadcast_frame(&frame);
        record(event, "broadcast", sent);
        Ok(sent)
    }

    /// Deliver an event to every connection of one identity.
    ///
    /// Zero matching connections is not an error.
    pub fn send_to_user<P>(
        &self,
        identity: &str,
        event: impl AsRef<str>,
        payload: &P,
    ) -> Result<FanOut, HubError>
    where
        P: Serialize + ?Sized,
    {
        let event = event.as_ref();
        let frame = encode(EventEnvelope::new(event, payload))?;
        let sent = self.registry.send_frame_to(identity, &frame);
        debug!(identity, "targeted publish");
        record(event, "user", sent);
        Ok(sent)
    }

    /// Number of connected clients. May be momentarily stale.
    pub fn count(&self) -> usize {
        self.registry.count()
    }

    /// The registry this publisher fans out through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

fn encode<P: Serialize + ?Sized>(envelope: EventEnvelope<'_, P>) -> Result<Frame, HubError> {
    envelope.encode().inspect_err(|err| {
        warn!(event = envelope.event, error = %err, "dropping unserializable event");
        counter!(WS_PUBLISH_FAILURES_TOTAL).increment(1);
    })
}

fn record(event: &str, scope: &'static str, sent: FanOut) {
    counter!(WS_PUBLISHED_TOTAL, "scope" => scope).increment(1);
    debug!(
        event,
        scope,
        recipients = sent.recipients,
        evicted = sent.evicted,
        "published event"
    );
}
