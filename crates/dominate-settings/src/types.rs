//! Settings types.
//!
//! All structs use camelCase JSON keys and `#[serde(default)]`, so a settings
//! file only needs to name the values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DominateSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Realtime hub tuning.
    pub hub: HubSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for DominateSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "dominate".to_string(),
            server: ServerSettings::default(),
            hub: HubSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl DominateSettings {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.hub.validate()
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Realtime hub tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Capacity of each connection's outbound mailbox.
    pub mailbox_capacity: usize,
    /// Interval between server Ping frames, in milliseconds.
    pub ping_interval_ms: u64,
    /// Rolling read deadline, in milliseconds. Must exceed the ping interval.
    pub read_deadline_ms: u64,
    /// Per-frame write timeout, in milliseconds.
    pub write_timeout_ms: u64,
    /// Largest inbound message accepted, in bytes.
    pub max_message_bytes: usize,
    /// Time allowed for graceful shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            ping_interval_ms: 30_000,
            read_deadline_ms: 60_000,
            write_timeout_ms: 10_000,
            max_message_bytes: 512 * 1024,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl HubSettings {
    /// Ping interval as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Read deadline as a [`Duration`].
    pub fn read_deadline(&self) -> Duration {
        Duration::from_millis(self.read_deadline_ms)
    }

    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Shutdown timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(SettingsError::invalid(
                "hub.mailboxCapacity",
                "must be at least 1",
            ));
        }
        let durations = [
            ("hub.pingIntervalMs", self.ping_interval_ms),
            ("hub.readDeadlineMs", self.read_deadline_ms),
            ("hub.writeTimeoutMs", self.write_timeout_ms),
            ("hub.shutdownTimeoutMs", self.shutdown_timeout_ms),
        ];
        if let Some(&(key, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(SettingsError::invalid(key, "must be positive"));
        }
        // A deadline at or below the ping interval tears down healthy peers.
        if self.read_deadline_ms <= self.ping_interval_ms {
            return Err(SettingsError::invalid(
                "hub.readDeadlineMs",
                format!(
                    "{} must exceed hub.pingIntervalMs ({})",
                    self.read_deadline_ms, self.ping_interval_ms
                ),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(SettingsError::invalid(
                "hub.maxMessageBytes",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Log verbosity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything.
    Trace,
    /// Fan-out summaries and pump exits.
    Debug,
    /// Connects, disconnects, startup.
    #[default]
    Info,
    /// Evictions, dropped publishes.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parse a case-insensitive level name.
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (overridden by `RUST_LOG`).
    pub level: LogLevel,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_defaults() {
        let hub = HubSettings::default();
        assert_eq!(hub.mailbox_capacity, 256);
        assert_eq!(hub.ping_interval(), Duration::from_secs(30));
        assert_eq!(hub.read_deadline(), Duration::from_secs(60));
        assert_eq!(hub.write_timeout(), Duration::from_secs(10));
        assert_eq!(hub.max_message_bytes, 524_288);
        assert_eq!(hub.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(HubSettings::default()).unwrap();
        assert_eq!(json["mailboxCapacity"], 256);
        assert_eq!(json["readDeadlineMs"], 60_000);
        assert!(json.get("mailbox_capacity").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: DominateSettings =
            serde_json::from_str(r#"{"hub":{"mailboxCapacity":8}}"#).unwrap();
        assert_eq!(settings.hub.mailbox_capacity, 8);
        assert_eq!(settings.hub.ping_interval_ms, 30_000);
        assert_eq!(settings.server, ServerSettings::default());
    }

    #[test]
    fn zero_capacity_rejected() {
        let hub = HubSettings {
            mailbox_capacity: 0,
            ..HubSettings::default()
        };
        let err = hub.validate().unwrap_err();
        assert!(err.to_string().contains("mailboxCapacity"));
    }

    #[test]
    fn deadline_must_exceed_ping_interval() {
        let hub = HubSettings {
            ping_interval_ms: 60_000,
            read_deadline_ms: 60_000,
            ..HubSettings::default()
        };
        let err = hub.validate().unwrap_err();
        assert!(err.to_string().contains("readDeadlineMs"));
    }

    #[test]
    fn zero_ping_interval_rejected() {
        let hub = HubSettings {
            ping_interval_ms: 0,
            ..HubSettings::default()
        };
        assert_eq!(hub.validate().unwrap_err().key(), Some("hub.pingIntervalMs"));
    }

    #[test]
    fn every_zero_duration_is_rejected_by_key() {
        let cases = [
            (
                HubSettings {
                    read_deadline_ms: 0,
                    ..HubSettings::default()
                },
                "hub.readDeadlineMs",
            ),
            (
                HubSettings {
                    write_timeout_ms: 0,
                    ..HubSettings::default()
                },
                "hub.writeTimeoutMs",
            ),
            (
                HubSettings {
                    shutdown_timeout_ms: 0,
                    ..HubSettings::default()
                },
                "hub.shutdownTimeoutMs",
            ),
        ];
        for (hub, key) in cases {
            assert_eq!(hub.validate().unwrap_err().key(), Some(key));
        }
    }

    #[test]
    fn log_level_parse() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::Error.as_filter_str(), "error");
    }

    #[test]
    fn log_level_serde_lowercase() {
        let json = serde_json::to_string(&LogLevel::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
    }
}
