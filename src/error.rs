//! Error taxonomy for the engine.
//!
//! # Design Decisions
//! - One top-level `Error` that every public operation returns
//! - Framing and form-decoding failures keep their own enums so the codec
//!   and multipart modules stay independent of the transport
//! - Every error reaches exactly one place: a returned `Result` or the
//!   server's exception handler

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::loader::ConfigError;
use crate::http::codec::ProtocolError;
use crate::http::multipart::MultipartError;

/// Errors produced by the server, the client and their connections.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The peer failed the TLS handshake (e.g. no trusted certificate
    /// under mutual authentication).
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(#[source] io::Error),

    /// Key store or trust store material could not be loaded.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Malformed request/status line, header block or chunk syntax.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No response headers arrived within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A file handed to `send_file` does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Malformed multipart or url-encoded body.
    #[error(transparent)]
    Multipart(#[from] MultipartError),

    /// An operation was invoked in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("invalid uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The peer closed the connection before the message completed.
    #[error("connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_includes_duration() {
        let err = Error::Timeout(Duration::from_millis(5));
        assert_eq!(err.to_string(), "request timed out after 5ms");
    }
}
