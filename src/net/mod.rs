//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake, mutual auth)
//!     → transport.rs (plain/TLS stream, read/write split)
//!     → connection.rs (ids, live connection tracking)
//!     → Hand off to HTTP layer
//!
//! Outgoing client connection
//!     → TcpStream::connect
//!     → tls.rs (optional handshake, client certificate)
//!     → transport.rs
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - TLS is optional and handled transparently behind `Transport`
//! - A failed handshake closes the connection before any HTTP parsing

pub mod connection;
pub mod listener;
pub mod tls;
pub mod transport;

pub use transport::{Inbound, Outbound, Transport};
