//! Settings types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl ParleySettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if self.server.max_line_length == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxLineLength must be at least 1".into(),
            ));
        }
        if let Some(line_port) = self.server.line_port {
            if line_port != 0 && line_port == self.server.port {
                return Err(SettingsError::InvalidValue(format!(
                    "server.linePort {line_port} collides with server.port"
                )));
            }
        }
        Ok(())
    }
}

/// Listener and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket listener port (`0` to auto-assign).
    pub port: u16,
    /// Line relay listener port. Disabled when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_port: Option<u16>,
    /// Outbound messages buffered per connection. A peer whose queue fills up
    /// is disconnected.
    pub max_send_queue: usize,
    /// Longest accepted line in bytes: handshake lines on the WebSocket port
    /// and chat lines on the line port.
    pub max_line_length: usize,
    /// Per-read deadline in milliseconds. Reads block forever when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

impl ServerSettings {
    /// The read deadline as a [`Duration`].
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            line_port: None,
            max_send_queue: 256,
            max_line_length: 8192,
            read_timeout_ms: None,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, coloured when attached to a terminal.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter. `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
