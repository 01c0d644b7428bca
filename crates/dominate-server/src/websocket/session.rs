//! Connection lifecycle: from a freshly upgraded transport to teardown.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use dominate_core::errors::HubError;
use dominate_core::events::Frame;
use futures::{Sink, Stream};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::connection::ClientConnection;
use super::pumps::{PumpExit, PumpTiming, run_inbound, run_outbound};
use super::registry::ConnectionRegistry;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Run one connection until either pump stops.
///
/// 1. Registers the connection (`Connecting -> Active`)
/// 2. Spawns the outbound pump, runs the inbound pump on this task
/// 3. When either pump stops, cancels the other
/// 4. Unregisters (idempotent, the connection may already be evicted)
///
/// Returns the exit of whichever pump stopped first, or `None` if the
/// registry refused the connection.
#[instrument(skip_all, fields(connection_id = %conn.id(), identity = %conn.identity()))]
pub async fn run_session<Si, St, E>(
    sink: Si,
    stream: St,
    conn: Arc<ClientConnection>,
    mailbox: mpsc::Receiver<Frame>,
    registry: Arc<ConnectionRegistry>,
    timing: PumpTiming,
) -> Option<PumpExit>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    if !registry.register(&conn) {
        warn!("connection refused by registry");
        return None;
    }

    info!(connections = registry.count(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let cancel = CancellationToken::new();
    let outbound = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let exit = run_outbound(sink, mailbox, timing, &cancel).await;
            cancel.cancel();
            exit
        }
    });

    let inbound_exit = run_inbound(stream, &conn, timing.read_deadline, &cancel).await;
    cancel.cancel();
    let _ = registry.unregister(&conn);

    let outbound_exit = match outbound.await {
        Ok(exit) => exit,
        Err(e) => PumpExit::Failed(HubError::TransportIo(format!("outbound pump failed: {e}"))),
    };
    let first = match inbound_exit {
        PumpExit::Cancelled => outbound_exit,
        exit => exit,
    };

    let duration = conn.age();
    match &first {
        PumpExit::Failed(err) => warn!(
            reason = first.label(),
            error = %err,
            dropped_frames = conn.drop_count(),
            duration_secs = duration.as_secs_f64(),
            "client disconnected"
        ),
        _ => info!(
            reason = first.label(),
            dropped_frames = conn.drop_count(),
            duration_secs = duration.as_secs_f64(),
            "client disconnected"
        ),
    }
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => first.label()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(duration.as_secs_f64());

    Some(first)
}
