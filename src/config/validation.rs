//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that TLS settings name the material they need
//! - Validate value ranges (limits > 0, known log level)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HttpConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::{HttpConfig, TlsOptions};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn validate_tls(prefix: &str, tls: &TlsOptions, server: bool, errors: &mut Vec<ValidationError>) {
    if !tls.enabled {
        return;
    }
    if server && tls.key_store_path.is_none() {
        errors.push(ValidationError::new(
            format!("{}.key_store_path", prefix),
            "required when TLS is enabled",
        ));
    }
    if tls.trust_store_path.is_none() && (!server || tls.client_auth_required) {
        errors.push(ValidationError::new(
            format!("{}.trust_store_path", prefix),
            if server {
                "required when client_auth_required is set"
            } else {
                "required when TLS is enabled"
            },
        ));
    }
}

pub fn validate_config(config: &HttpConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let server = &config.server;
    if server.host.trim().is_empty() {
        errors.push(ValidationError::new("server.host", "must not be empty"));
    }
    if server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be greater than 0"));
    }
    if server.max_header_size < 64 {
        errors.push(ValidationError::new("server.max_header_size", "must be at least 64 bytes"));
    }
    if server.max_websocket_frame_size == 0 {
        errors.push(ValidationError::new(
            "server.max_websocket_frame_size",
            "must be greater than 0",
        ));
    }
    validate_tls("server.tls", &server.tls, true, &mut errors);

    let client = &config.client;
    if client.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("client.connect_timeout_ms", "must be greater than 0"));
    }
    if client.request_timeout_ms == Some(0) {
        errors.push(ValidationError::new("client.request_timeout_ms", "must be greater than 0"));
    }
    if client.max_websocket_frame_size == 0 {
        errors.push(ValidationError::new(
            "client.max_websocket_frame_size",
            "must be greater than 0",
        ));
    }
    validate_tls("client.tls", &client.tls, false, &mut errors);

    let level = config.observability.log_level.to_ascii_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", config.observability.log_level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
