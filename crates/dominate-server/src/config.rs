//! Server configuration.

use std::time::Duration;

use dominate_settings::DominateSettings;

use crate::websocket::pumps::PumpTiming;

/// Runtime configuration for [`DominateServer`](crate::server::DominateServer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Capacity of each connection's outbound mailbox.
    pub mailbox_capacity: usize,
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Rolling read deadline, refreshed by any inbound frame.
    pub read_deadline: Duration,
    /// Upper bound on a single outbound write.
    pub write_timeout: Duration,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for background tasks.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            mailbox_capacity: 256,
            ping_interval: Duration::from_secs(30),
            read_deadline: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_message_size: 512 * 1024,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &DominateSettings) -> Self {
        let hub = &settings.hub;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            mailbox_capacity: hub.mailbox_capacity,
            ping_interval: hub.ping_interval(),
            read_deadline: hub.read_deadline(),
            write_timeout: hub.write_timeout(),
            max_message_size: hub.max_message_bytes,
            shutdown_timeout: hub.shutdown_timeout(),
        }
    }

    /// Timers handed to each connection's pumps.
    pub fn timing(&self) -> PumpTiming {
        PumpTiming {
            ping_interval: self.ping_interval,
            read_deadline: self.read_deadline,
            write_timeout: self.write_timeout,
        }
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
