//! The two halves of a live connection.
//!
//! The inbound pump only watches for liveness and peer close; application
//! payloads from clients are ignored. The outbound pump drains the mailbox
//! onto the wire and sends periodic Pings. Both are generic over the
//! transport so they can run against in-memory channels.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes};
use dominate_core::errors::HubError;
use dominate_core::events::Frame;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::connection::ClientConnection;

/// Timers shared by both pumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PumpTiming {
    /// Interval between Ping frames.
    pub ping_interval: Duration,
    /// Rolling read deadline, reset by every inbound frame.
    pub read_deadline: Duration,
    /// Upper bound on a single write.
    pub write_timeout: Duration,
}

/// Why a pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// The peer sent Close or the stream ended.
    PeerClosed,
    /// The mailbox was closed (unregistered, evicted or shutting down).
    MailboxClosed,
    /// The sibling pump stopped first.
    Cancelled,
    /// Transport failure or deadline.
    Failed(HubError),
}

impl PumpExit {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::MailboxClosed => "mailbox_closed",
            Self::Cancelled => "cancelled",
            Self::Failed(err) => err.kind(),
        }
    }
}

/// Drain inbound frames until close, failure, deadline or cancellation.
///
/// Every frame (text, binary, ping, pong) refreshes the deadline.
pub async fn run_inbound<S, E>(
    mut stream: S,
    conn: &ClientConnection,
    read_deadline: Duration,
    cancel: &CancellationToken,
) -> PumpExit
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return PumpExit::Cancelled,
            next = timeout(read_deadline, stream.next()) => next,
        };
        match next {
            Err(_) => return PumpExit::Failed(HubError::ReadTimeout(read_deadline)),
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return PumpExit::PeerClosed,
            Ok(Some(Err(e))) => return PumpExit::Failed(HubError::TransportIo(e.to_string())),
            Ok(Some(Ok(msg))) => {
                trace!(kind = message_kind(&msg), "inbound frame");
                conn.mark_alive();
            }
        }
    }
}

/// Write mailbox frames and heartbeats until the mailbox closes, a write
/// fails or the pump is cancelled.
///
/// A closed mailbox is flushed first, then a Close frame is sent.
pub async fn run_outbound<S>(
    mut sink: S,
    mut mailbox: mpsc::Receiver<Frame>,
    timing: PumpTiming,
    cancel: &CancellationToken,
) -> PumpExit
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = interval(timing.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    let _ = ping.tick().await;

    loop {
        let outgoing = tokio::select! {
            () = cancel.cancelled() => return PumpExit::Cancelled,
            frame = mailbox.recv() => match frame {
                Some(frame) => match Utf8Bytes::try_from(frame.to_bytes()) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        return PumpExit::Failed(HubError::TransportIo(format!(
                            "frame is not valid UTF-8: {e}"
                        )));
                    }
                },
                None => {
                    if let Err(exit) = write(&mut sink, Message::Close(None), timing.write_timeout).await {
                        return exit;
                    }
                    return PumpExit::MailboxClosed;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new().into()),
        };
        if let Err(exit) = write(&mut sink, outgoing, timing.write_timeout).await {
            return exit;
        }
    }
}

async fn write<S>(sink: &mut S, msg: Message, limit: Duration) -> Result<(), PumpExit>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(limit, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PumpExit::Failed(HubError::TransportIo(e.to_string()))),
        Err(_) => Err(PumpExit::Failed(HubError::TransportIo(format!(
            "write timed out after {limit:?}"
        )))),
    }
}

fn message_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
    }
}
