//! The `GET /ws` transport adapter.
//!
//! Upgrades the request, reads the caller-supplied identity from the
//! `user_id` query parameter and hands the socket to
//! [`run_session`](super::session::run_session).

use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use dominate_core::errors::HubError;
use dominate_core::ids::Identity;
use futures::StreamExt;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use super::session::run_session;
use crate::metrics::WS_UPGRADE_FAILURES_TOTAL;
use crate::server::AppState;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Opaque identity; missing or empty means `"anonymous"`.
    pub user_id: Option<String>,
}

impl ConnectParams {
    /// Resolve the identity this connection will be grouped under.
    pub fn identity(&self) -> Identity {
        Identity::from_param(self.user_id.as_deref())
    }
}

/// Upgrade handler for `/ws`.
///
/// A request that is not a valid upgrade is rejected before any connection
/// exists. A failure after the handshake was accepted is logged and counted.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            let err = HubError::TransportUpgrade(rejection.body_text());
            warn!(error = %err, status = %rejection.status(), "rejected websocket upgrade");
            counter!(WS_UPGRADE_FAILURES_TOTAL, "stage" => "handshake").increment(1);
            return rejection.into_response();
        }
    };

    let identity = params.identity();
    debug!(%identity, "upgrading websocket");
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|error: axum::Error| {
            let err = HubError::TransportUpgrade(error.to_string());
            warn!(error = %err, "websocket upgrade failed");
            counter!(WS_UPGRADE_FAILURES_TOTAL, "stage" => "upgrade").increment(1);
        })
        .on_upgrade(move |socket| handle_socket(socket, identity, state))
}

async fn handle_socket(socket: WebSocket, identity: Identity, state: AppState) {
    let (sink, stream) = socket.split();
    let (conn, mailbox) = ClientConnection::open(identity, state.config.mailbox_capacity);
    let _ = run_session(
        sink,
        stream,
        Arc::new(conn),
        mailbox,
        Arc::clone(&state.registry),
        state.config.timing(),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_user_id_is_anonymous() {
        let params = ConnectParams::default();
        assert!(params.identity().is_anonymous());
    }

    #[test]
    fn empty_user_id_is_anonymous() {
        let params = ConnectParams {
            user_id: Some(String::new()),
        };
        assert_eq!(params.identity().as_str(), "anonymous");
    }

    #[test]
    fn user_id_becomes_identity() {
        let params: ConnectParams = serde_json::from_str(r#"{"user_id":"u42"}"#).unwrap();
        assert_eq!(params.identity().as_str(), "u42");
    }
}
