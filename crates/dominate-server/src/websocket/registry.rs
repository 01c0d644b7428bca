//! The authoritative membership set of live connections.
//!
//! Registration, removal and fan-out all run under one mutex, so every
//! publish is delivered against a single consistent snapshot: a connection
//! registered after the lock is released never sees that frame, and a
//! removed connection never receives anything further.
//!
//! Mailboxes are bounded. A connection whose mailbox is full (or whose pump
//! has gone) when a frame is offered is evicted inside the same critical
//! section. Publishers never wait on a client.
//!
//! [`ConnectionRegistry::close_all`] is terminal: once it runs, every later
//! registration is refused.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dominate_core::errors::HubError;
use dominate_core::events::Frame;
use dominate_core::ids::{ConnectionId, Identity};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, Enqueue};
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_SLOW_CONSUMER_EVICTIONS_TOTAL};

/// Result of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FanOut {
    /// Mailboxes the frame was enqueued on.
    pub recipients: usize,
    /// Connections evicted because the frame could not be enqueued.
    pub evicted: usize,
}

/// Cumulative registry counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Currently registered connections.
    pub active: usize,
    /// Successful registrations since start.
    pub registered_total: u64,
    /// Frames enqueued across all fan-outs.
    pub frames_enqueued: u64,
    /// Frames that could not be enqueued.
    pub frames_dropped: u64,
    /// Connections evicted as slow consumers.
    pub slow_consumer_evictions: u64,
}

#[derive(Default)]
struct Membership {
    conns: HashMap<ConnectionId, Arc<ClientConnection>>,
    closing: bool,
}

/// Membership set of all active connections.
pub struct ConnectionRegistry {
    members: Mutex<Membership>,
    active: AtomicUsize,
    registered_total: AtomicU64,
    frames_enqueued: AtomicU64,
    frames_dropped: AtomicU64,
    evictions: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Membership::default()),
            active: AtomicUsize::new(0),
            registered_total: AtomicU64::new(0),
            frames_enqueued: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Add a connection and mark it active.
    ///
    /// Refuses (returns `false`) a connection that is already registered or
    /// has been closed, and every connection once [`close_all`](Self::close_all)
    /// has run. A connection refused for that reason is closed.
    pub fn register(&self, conn: &Arc<ClientConnection>) -> bool {
        let mut members = self.members.lock();
        if members.closing {
            drop(members);
            let _ = conn.close();
            debug!(connection_id = %conn.id(), "registration refused, registry closed");
            return false;
        }
        if members.conns.contains_key(conn.id()) || !conn.activate() {
            drop(members);
            debug!(connection_id = %conn.id(), state = ?conn.state(), "registration refused");
            return false;
        }
        let _ = members.conns.insert(conn.id().clone(), Arc::clone(conn));
        let _ = self.active.fetch_add(1, Ordering::Relaxed);
        let _ = self.registered_total.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove a connection and close its mailbox.
    ///
    /// Idempotent: returns `false` without side effects when the connection
    /// is not registered.
    pub fn unregister(&self, conn: &ClientConnection) -> bool {
        let mut members = self.members.lock();
        if members.conns.remove(conn.id()).is_none() {
            return false;
        }
        let _ = self.active.fetch_sub(1, Ordering::Relaxed);
        let _ = conn.close();
        true
    }

    /// Enqueue `frame` on every registered connection.
    pub fn broadcast_frame(&self, frame: &Frame) -> FanOut {
        self.fan_out(frame, |_| true)
    }

    /// Enqueue `frame` on every registered connection of `identity`.
    pub fn send_frame_to(&self, identity: &str, frame: &Frame) -> FanOut {
        self.fan_out(frame, |conn| conn.identity() == identity)
    }

    fn fan_out(&self, frame: &Frame, matches: impl Fn(&ClientConnection) -> bool) -> FanOut {
        let mut members = self.members.lock();
        let mut result = FanOut::default();
        let mut saturated = Vec::new();

        for conn in members.conns.values().filter(|c| matches(c)) {
            match conn.try_enqueue(frame.clone()) {
                Enqueue::Queued => result.recipients += 1,
                Enqueue::Full | Enqueue::Closed => saturated.push(conn.id().clone()),
            }
        }

        let evicted: Vec<Arc<ClientConnection>> = saturated
            .iter()
            .filter_map(|id| members.conns.remove(id))
            .collect();
        for conn in &evicted {
            let _ = self.active.fetch_sub(1, Ordering::Relaxed);
            let _ = conn.close();
        }
        result.evicted = evicted.len();
        drop(members);

        for conn in &evicted {
            let err = HubError::SlowConsumer {
                connection_id: conn.id().to_string(),
            };
            warn!(
                connection_id = %conn.id(),
                identity = %conn.identity(),
                dropped_frames = conn.drop_count(),
                error = %err,
                "evicting slow consumer"
            );
        }

        let _ = self
            .frames_enqueued
            .fetch_add(result.recipients as u64, Ordering::Relaxed);
        if result.evicted > 0 {
            let evicted = result.evicted as u64;
            let _ = self.frames_dropped.fetch_add(evicted, Ordering::Relaxed);
            let _ = self.evictions.fetch_add(evicted, Ordering::Relaxed);
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(evicted);
            counter!(WS_SLOW_CONSUMER_EVICTIONS_TOTAL).increment(evicted);
        }
        result
    }

    /// Number of registered connections.
    ///
    /// Read from an atomic, not under the membership lock.
    pub fn count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Registered connections for one identity.
    pub fn identity_count(&self, identity: &str) -> usize {
        self.members
            .lock()
            .conns
            .values()
            .filter(|c| c.identity() == identity)
            .count()
    }

    /// Distinct identities with at least one registered connection.
    pub fn identities(&self) -> usize {
        self.members
            .lock()
            .conns
            .values()
            .map(|c| c.identity())
            .collect::<HashSet<&Identity>>()
            .len()
    }

    /// Whether a connection id is currently registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.lock().conns.contains_key(id)
    }

    /// Whether [`close_all`](Self::close_all) has run.
    pub fn is_closed(&self) -> bool {
        self.members.lock().closing
    }

    /// Snapshot of cumulative counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.count(),
            registered_total: self.registered_total.load(Ordering::Relaxed),
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            slow_consumer_evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Unregister every connection, closing each mailbox, and refuse all
    /// later registrations.
    ///
    /// Each outbound pump drains what is already queued, sends a Close frame
    /// and exits. Returns how many connections were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut members = self.members.lock();
            members.closing = true;
            self.active.store(0, Ordering::Relaxed);
            members.conns.drain().map(|(_, conn)| conn).collect()
        };
        for conn in &drained {
            let _ = conn.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "closed all connections");
        }
        drained.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::websocket::connection::ConnectionState;

    fn make_connection(identity: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Frame>) {
        make_connection_with_capacity(identity, 32)
    }

    fn make_connection_with_capacity(
        identity: &str,
        capacity: usize,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Frame>) {
        let (conn, rx) = ClientConnection::open(Identity::from(identity), capacity);
        (Arc::new(conn), rx)
    }

    fn frame(text: &str) -> Frame {
        Frame::from(text)
    }

    #[test]
    fn register_activates_and_counts() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection("u1");
        assert!(registry.register(&conn));
        assert_eq!(conn.state(), ConnectionState::Active);
        assert_eq!(registry.count(), 1);
        assert!(registry.contains(conn.id()));
    }

    #[test]
    fn duplicate_registration_refused() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection("u1");
        assert!(registry.register(&conn));
        assert!(!registry.register(&conn));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister_twice_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection("a");
        assert!(registry.register(&conn));
        assert!(registry.unregister(&conn));
        assert!(!registry.unregister(&conn));
        assert_eq!(registry.count(), 0);
        assert!(conn.is_closed());
    }

    #[test]
    fn unregister_unknown_connection_leaves_it_open() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection("a");
        assert!(!registry.unregister(&conn));
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn closed_connection_never_re_registers() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection("a");
        assert!(registry.register(&conn));
        assert!(registry.unregister(&conn));
        assert!(!registry.register(&conn));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn unregister_closes_mailbox() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = make_connection("a");
        assert!(registry.register(&conn));
        assert!(registry.unregister(&conn));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn broadcast_reaches_every_member_once() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = make_connection("u1");
        let (b, mut rx_b) = make_connection("u2");
        assert!(registry.register(&a));
        assert!(registry.register(&b));

        let sent = registry.broadcast_frame(&frame("x"));
        assert_eq!(sent, FanOut { recipients: 2, evicted: 0 });
        assert_eq!(rx_a.try_recv().unwrap().as_str(), "x");
        assert_eq!(rx_b.try_recv().unwrap().as_str(), "x");
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_shares_one_frame() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = make_connection("u1");
        let (b, mut rx_b) = make_connection("u2");
        assert!(registry.register(&a));
        assert!(registry.register(&b));

        let original = frame("shared");
        let _ = registry.broadcast_frame(&original);
        let got_a = rx_a.try_recv().unwrap();
        let _got_b = rx_b.try_recv().unwrap();
        assert_eq!(got_a.share_count(), 3);
        assert_eq!(original.share_count(), 3);
    }

    #[test]
    fn late_registration_misses_earlier_broadcast() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = make_connection("u1");
        assert!(registry.register(&a));
        let _ = registry.broadcast_frame(&frame("first"));

        let (late, mut rx_late) = make_connection("u2");
        assert!(registry.register(&late));
        assert_eq!(rx_a.try_recv().unwrap().as_str(), "first");
        assert!(rx_late.try_recv().is_err());
    }

    #[test]
    fn send_to_identity_hits_all_its_connections_and_no_others() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = make_connection("u1");
        let (b, mut rx_b) = make_connection("u1");
        let (c, mut rx_c) = make_connection("u2");
        for conn in [&a, &b, &c] {
            assert!(registry.register(conn));
        }

        let sent = registry.send_frame_to("u1", &frame("note"));
        assert_eq!(sent.recipients, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn send_to_unknown_identity_is_empty() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = make_connection("u1");
        assert!(registry.register(&a));
        assert_eq!(registry.send_frame_to("nobody", &frame("x")), FanOut::default());
    }

    #[test]
    fn saturated_mailbox_is_evicted() {
        let registry = ConnectionRegistry::new();
        let (slow, _rx_slow) = make_connection_with_capacity("slow", 2);
        let (fast, mut rx_fast) = make_connection_with_capacity("fast", 2);
        assert!(registry.register(&slow));
        assert!(registry.register(&fast));

        for i in 0..2 {
            let sent = registry.broadcast_frame(&frame(&format!("f{i}")));
            assert_eq!(sent.recipients, 2);
            let _ = rx_fast.try_recv().unwrap();
        }

        let sent = registry.broadcast_frame(&frame("overflow"));
        assert_eq!(sent, FanOut { recipients: 1, evicted: 1 });
        assert!(slow.is_closed());
        assert_eq!(slow.drop_count(), 1);
        assert_eq!(registry.count(), 1);
        assert!(!registry.contains(slow.id()));

        // Subsequent broadcasts skip the evicted connection entirely.
        let sent = registry.broadcast_frame(&frame("after"));
        assert_eq!(sent, FanOut { recipients: 1, evicted: 0 });
        assert_eq!(slow.drop_count(), 1);

        let stats = registry.stats();
        assert_eq!(stats.slow_consumer_evictions, 1);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_enqueued, 6);
    }

    #[test]
    fn eviction_is_logged_at_warn() {
        let (logs, _guard) = dominate_core::logging::capture_logs();
        let registry = ConnectionRegistry::new();
        let (slow, _rx) = make_connection_with_capacity("slow", 1);
        assert!(registry.register(&slow));
        let _ = registry.broadcast_frame(&frame("a"));
        let _ = registry.broadcast_frame(&frame("b"));

        let events = logs.matching("evicting slow consumer");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, tracing::Level::WARN);
        assert_eq!(events[0].field("identity"), Some("slow"));
    }

    #[test]
    fn eviction_is_logged_after_the_lock_is_released() {
        use std::sync::atomic::AtomicBool;

        use tracing_subscriber::layer::{Context, SubscriberExt};

        struct LockObserver {
            registry: Arc<ConnectionRegistry>,
            warned: Arc<AtomicBool>,
            lock_free: Arc<AtomicBool>,
        }

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LockObserver {
            fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
                if *event.metadata().level() == tracing::Level::WARN {
                    self.warned.store(true, Ordering::SeqCst);
                    let free = self.registry.members.try_lock().is_some();
                    self.lock_free.store(free, Ordering::SeqCst);
                }
            }
        }

        let registry = Arc::new(ConnectionRegistry::new());
        let warned = Arc::new(AtomicBool::new(false));
        let lock_free = Arc::new(AtomicBool::new(false));
        let subscriber = tracing_subscriber::registry().with(LockObserver {
            registry: Arc::clone(&registry),
            warned: Arc::clone(&warned),
            lock_free: Arc::clone(&lock_free),
        });

        tracing::subscriber::with_default(subscriber, || {
            let (slow, _rx) = make_connection_with_capacity("slow", 1);
            assert!(registry.register(&slow));
            let _ = registry.broadcast_frame(&frame("a"));
            assert_eq!(registry.broadcast_frame(&frame("b")).evicted, 1);
        });

        assert!(warned.load(Ordering::SeqCst));
        assert!(lock_free.load(Ordering::SeqCst));
    }

    #[test]
    fn gone_receiver_is_evicted() {
        let registry = ConnectionRegistry::new();
        let (conn, rx) = make_connection("u1");
        assert!(registry.register(&conn));
        drop(rx);
        let sent = registry.broadcast_frame(&frame("x"));
        assert_eq!(sent, FanOut { recipients: 0, evicted: 1 });
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn presence_queries() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = make_connection("u1");
        let (b, _rb) = make_connection("u1");
        let (c, _rc) = make_connection("anonymous");
        for conn in [&a, &b, &c] {
            assert!(registry.register(conn));
        }
        assert_eq!(registry.identity_count("u1"), 2);
        assert_eq!(registry.identity_count("u9"), 0);
        assert_eq!(registry.identities(), 2);
        assert_eq!(registry.stats().registered_total, 3);
    }

    #[tokio::test]
    async fn close_all_empties_and_closes() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = make_connection("u1");
        let (b, mut rx_b) = make_connection("u2");
        assert!(registry.register(&a));
        assert!(registry.register(&b));
        let _ = registry.broadcast_frame(&frame("bye"));

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.count(), 0);
        assert!(a.is_closed() && b.is_closed());
        assert_eq!(rx_a.recv().await.unwrap().as_str(), "bye");
        assert!(rx_a.recv().await.is_none());
        assert_eq!(rx_b.recv().await.unwrap().as_str(), "bye");
        assert!(rx_b.recv().await.is_none());
        assert!(!registry.unregister(&a));
        assert_eq!(registry.close_all(), 0);
    }

    #[tokio::test]
    async fn close_all_refuses_later_registrations() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.is_closed());
        assert_eq!(registry.close_all(), 0);
        assert!(registry.is_closed());

        let (late, mut rx) = make_connection("u1");
        assert!(!registry.register(&late));
        assert_eq!(late.state(), ConnectionState::Closed);
        assert!(rx.recv().await.is_none());
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.stats().registered_total, 0);
        assert_eq!(registry.broadcast_frame(&frame("x")), FanOut::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_and_broadcast_see_consistent_snapshots() {
        const FRAMES: usize = 200;
        const JOINERS: usize = 4;
        const PER_JOINER: usize = 25;

        let registry = Arc::new(ConnectionRegistry::new());

        let joiners: Vec<_> = (0..JOINERS)
            .map(|j| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let mut mailboxes = Vec::new();
                    for _ in 0..PER_JOINER {
                        let (conn, rx) = make_connection_with_capacity(&format!("u{j}"), FRAMES);
                        assert!(registry.register(&conn));
                        mailboxes.push(rx);
                        tokio::task::yield_now().await;
                    }
                    mailboxes
                })
            })
            .collect();

        let publisher = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let mut delivered = 0;
                for seq in 0..FRAMES {
                    delivered += registry.broadcast_frame(&Frame::from(seq.to_string())).recipients;
                    tokio::task::yield_now().await;
                }
                delivered
            })
        };

        let delivered = publisher.await.unwrap();
        let mut received = 0;
        for joiner in joiners {
            for mut rx in joiner.await.unwrap() {
                let mut seqs = Vec::new();
                while let Ok(frame) = rx.try_recv() {
                    seqs.push(frame.as_str().parse::<usize>().unwrap());
                }
                received += seqs.len();
                // A member sees every frame published after it joined, in order.
                if let Some(&first) = seqs.first() {
                    assert_eq!(seqs, (first..FRAMES).collect::<Vec<_>>());
                }
            }
        }

        assert_eq!(received, delivered);
        assert_eq!(registry.count(), JOINERS * PER_JOINER);
        assert_eq!(registry.stats().frames_dropped, 0);
        assert_eq!(registry.stats().frames_enqueued, delivered as u64);
    }

    mod proptests {
        use std::collections::HashSet;

        use proptest::prelude::*;

        use super::*;

        #[derive(Clone, Debug)]
        enum Op {
            Register(usize),
            Unregister(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0..6usize).prop_map(Op::Register),
                (0..6usize).prop_map(Op::Unregister),
            ]
        }

        proptest! {
            #[test]
            fn count_tracks_effective_registrations(ops in proptest::collection::vec(op(), 0..64)) {
                let registry = ConnectionRegistry::new();
                let conns: Vec<_> = (0..6).map(|i| make_connection(&format!("u{}", i % 2))).collect();
                let mut registered = HashSet::new();
                let mut closed = HashSet::new();

                for op in ops {
                    match op {
                        Op::Register(i) => {
                            let expected = !registered.contains(&i) && !closed.contains(&i);
                            prop_assert_eq!(registry.register(&conns[i].0), expected);
                            if expected {
                                let _ = registered.insert(i);
                            }
                        }
                        Op::Unregister(i) => {
                            let expected = registered.remove(&i);
                            prop_assert_eq!(registry.unregister(&conns[i].0), expected);
                            if expected {
                                let _ = closed.insert(i);
                            }
                        }
                    }
                    prop_assert_eq!(registry.count(), registered.len());
                }
            }
        }
    }
}
