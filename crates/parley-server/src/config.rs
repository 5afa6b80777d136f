//! Server configuration.

use std::time::Duration;

use parley_settings::ServerSettings;

use crate::deadline::ReadDeadline;

/// Runtime configuration for the relay.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// WebSocket port (default `0` for auto-assign).
    pub port: u16,
    /// Line relay port. No line listener when `None`.
    pub line_port: Option<u16>,
    /// Outbound queue capacity per connection.
    pub max_send_queue: usize,
    /// Longest handshake or chat line accepted, in bytes.
    pub max_line_length: usize,
    /// Deadline applied to every socket read.
    pub read_timeout: Option<Duration>,
}

impl ServerConfig {
    /// The read deadline applied to every connection.
    pub fn read_deadline(&self) -> ReadDeadline {
        ReadDeadline::new(self.read_timeout)
    }

    /// `host:port` for the WebSocket listener.
    pub fn websocket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:port` for the line listener, when enabled.
    pub fn line_addr(&self) -> Option<String> {
        self.line_port.map(|port| format!("{}:{port}", self.host))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            line_port: None,
            max_send_queue: 256,
            max_line_length: 8192,
            read_timeout: None,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            line_port: settings.line_port,
            max_send_queue: settings.max_send_queue,
            max_line_length: settings.max_line_length,
            read_timeout: settings.read_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_with_auto_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert!(cfg.line_port.is_none());
        assert!(cfg.read_timeout.is_none());
    }

    #[test]
    fn from_settings() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 9000,
            line_port: Some(9001),
            max_send_queue: 8,
            max_line_length: 1024,
            read_timeout_ms: Some(500),
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.websocket_addr(), "0.0.0.0:9000");
        assert_eq!(cfg.line_addr().as_deref(), Some("0.0.0.0:9001"));
        assert_eq!(cfg.max_send_queue, 8);
        assert_eq!(cfg.max_line_length, 1024);
        assert_eq!(cfg.read_timeout, Some(Duration::from_millis(500)));
    }

    #[test]
    fn no_line_addr_without_line_port() {
        assert!(ServerConfig::default().line_addr().is_none());
    }
}
