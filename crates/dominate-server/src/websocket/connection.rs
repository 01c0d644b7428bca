//! Per-client connection state.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use dominate_core::events::Frame;
use dominate_core::ids::{ConnectionId, Identity};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Upgraded but not yet registered.
    Connecting = 0,
    /// Registered and receiving fan-out.
    Active = 1,
    /// Torn down. Terminal.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }
}

/// Outcome of offering a frame to a connection's mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueue {
    /// The frame is queued for the outbound pump.
    Queued,
    /// The mailbox is at capacity.
    Full,
    /// The mailbox was closed or its receiver is gone.
    Closed,
}

/// A connected WebSocket client.
///
/// The outbound pump owns the receiving half of the mailbox; this struct
/// keeps the only sender. Closing drops that sender, so nothing can be
/// written to the mailbox afterwards.
pub struct ClientConnection {
    id: ConnectionId,
    identity: Identity,
    mailbox: Mutex<Option<mpsc::Sender<Frame>>>,
    state: AtomicU8,
    /// When this connection was established.
    pub connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped_frames: AtomicU64,
}

impl ClientConnection {
    /// Create a connection around an existing mailbox sender.
    pub fn new(id: ConnectionId, identity: Identity, tx: mpsc::Sender<Frame>) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity,
            mailbox: Mutex::new(Some(tx)),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Create a connection with a fresh id and a mailbox of `capacity`.
    ///
    /// Returns the receiving half for the outbound pump.
    pub fn open(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(ConnectionId::new(), identity, tx), rx)
    }

    /// Unique connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Caller-supplied identity (not unique across connections).
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Move `Connecting -> Active`. Returns `false` from any other state.
    pub(crate) fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Close the mailbox and mark the connection `Closed`.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub(crate) fn close(&self) -> bool {
        let sender = self.mailbox.lock().take();
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
        sender.is_some()
    }

    /// Offer a frame without waiting. Failures bump the drop counter.
    pub fn try_enqueue(&self, frame: Frame) -> Enqueue {
        let outcome = match self.mailbox.lock().as_ref() {
            None => Enqueue::Closed,
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => Enqueue::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
            },
        };
        if outcome != Enqueue::Queued {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Frames that could not be enqueued for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record inbound activity (any frame, including Pong).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or since connecting).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("dropped_frames", &self.drop_count())
            .finish_non_exhaustive()
    }
}
