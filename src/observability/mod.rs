//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with key=value fields (connection ids, peers,
//!       methods, statuses, errors)
//!
//! Consumers:
//!     → logging.rs installs the subscriber (stdout, filtered by level)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Connection id flows through every event of a connection
//! - The library never installs a subscriber itself; binaries do

pub mod logging;
