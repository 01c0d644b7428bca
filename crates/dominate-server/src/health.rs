//! `/health` and `/api/online` response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// Distinct identities online.
    pub identities: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    connections: usize,
    identities: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        started_at,
        connections,
        identities,
    }
}

/// Presence response for `/api/online`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OnlineResponse {
    /// Registered WebSocket connections.
    pub count: usize,
}
