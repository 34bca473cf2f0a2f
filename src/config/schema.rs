//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files and
//! default every field, so a partial file (or none at all) is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default limit for WebSocket frames. Upgrades are not handled by the
/// engine but the limit is carried for embedders that do.
pub const DEFAULT_MAX_WEBSOCKET_FRAME_SIZE: usize = 65536;

/// Root configuration file layout.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HttpConfig {
    /// Server settings.
    pub server: ServerOptions,

    /// Client settings.
    pub client: ClientOptions,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Port to bind; 0 picks a free port.
    pub port: u16,

    /// TLS settings.
    pub tls: TlsOptions,

    /// Compress responses when the client accepts it.
    pub compression_supported: bool,

    pub max_websocket_frame_size: usize,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Largest accepted request head in bytes.
    pub max_header_size: usize,

    /// Allow several requests per connection.
    pub keep_alive: bool,

    /// Close connections idle for longer than this.
    pub idle_timeout_secs: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: TlsOptions::default(),
            compression_supported: false,
            max_websocket_frame_size: DEFAULT_MAX_WEBSOCKET_FRAME_SIZE,
            max_connections: 10_000,
            max_header_size: 8192,
            keep_alive: true,
            idle_timeout_secs: 60,
        }
    }
}

impl ServerOptions {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Host used for relative request URIs.
    pub default_host: String,

    /// Port used for relative request URIs.
    pub default_port: u16,

    /// TLS settings.
    pub tls: TlsOptions,

    /// Advertise and decode gzip/deflate responses.
    pub try_use_compression: bool,

    pub max_websocket_frame_size: usize,

    /// Time allowed for response headers to arrive, per request.
    pub request_timeout_ms: Option<u64>,

    /// Connection establishment timeout (TCP + TLS).
    pub connect_timeout_ms: u64,

    /// Reuse connections for subsequent requests.
    pub keep_alive: bool,

    /// Largest accepted response head in bytes.
    pub max_header_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_host: "localhost".to_string(),
            default_port: 80,
            tls: TlsOptions::default(),
            try_use_compression: false,
            max_websocket_frame_size: DEFAULT_MAX_WEBSOCKET_FRAME_SIZE,
            request_timeout_ms: None,
            connect_timeout_ms: 60_000,
            keep_alive: true,
            max_header_size: 8192,
        }
    }
}

impl ClientOptions {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// TLS material for one side of a connection.
///
/// The key store is a PEM file holding the certificate chain followed by
/// the private key; the trust store is a PEM file of trusted certificates.
/// Passwords are kept with the paths; PEM material is read unencrypted.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsOptions {
    /// Use TLS on this side.
    pub enabled: bool,

    pub key_store_path: Option<String>,

    pub key_store_password: Option<String>,

    pub trust_store_path: Option<String>,

    pub trust_store_password: Option<String>,

    /// Server only: reject peers without a trusted client certificate.
    pub client_auth_required: bool,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_compression_and_cap_frames() {
        let server = ServerOptions::default();
        assert!(!server.compression_supported);
        assert_eq!(server.max_websocket_frame_size, 65536);

        let client = ClientOptions::default();
        assert!(!client.try_use_compression);
        assert_eq!(client.max_websocket_frame_size, 65536);
        assert_eq!(client.request_timeout(), None);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: HttpConfig = toml::from_str(
            r#"
            [server]
            port = 9090
            compression_supported = true

            [server.tls]
            enabled = true
            key_store_path = "server-keystore.pem"
            client_auth_required = true

            [client]
            request_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert!(config.server.compression_supported);
        assert!(config.server.tls.client_auth_required);
        assert_eq!(config.server.max_header_size, 8192);
        assert_eq!(config.client.request_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.observability.log_level, "info");
    }
}
