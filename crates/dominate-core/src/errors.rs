//! Error hierarchy for the realtime hub.
//!
//! Every failure the hub can hit is handled locally: a connection is torn
//! down, or a publish is dropped and logged. [`HubError`] exists so those
//! decisions are made on typed values and reported with stable labels
//! ([`HubError::kind`]) in logs and metrics.

use std::time::Duration;

use thiserror::Error;

/// Failure classes of the realtime hub.
#[derive(Debug, Error)]
pub enum HubError {
    /// The HTTP request could not be upgraded; no connection was created.
    #[error("transport upgrade failed: {0}")]
    TransportUpgrade(String),

    /// The envelope could not be serialized; the publish was dropped.
    #[error("failed to serialize `{event}` envelope: {source}")]
    Serialization {
        /// Event name of the dropped publish.
        event: String,
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// The connection's mailbox was saturated; it was forcibly unregistered.
    #[error("connection {connection_id} is a slow consumer (mailbox full)")]
    SlowConsumer {
        /// The evicted connection.
        connection_id: String,
    },

    /// Read or write failure on an active connection.
    #[error("transport I/O error: {0}")]
    TransportIo(String),

    /// Nothing was received within the rolling read deadline.
    #[error("no frame received within {0:?}")]
    ReadTimeout(Duration),
}

impl HubError {
    /// Stable, snake-case label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransportUpgrade(_) => "transport_upgrade",
            Self::Serialization { .. } => "serialization",
            Self::SlowConsumer { .. } => "slow_consumer",
            Self::TransportIo(_) => "transport_io",
            Self::ReadTimeout(_) => "read_timeout",
        }
    }
}
