//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     close() or signal → Stop accepting → Close idle connections → Drain busy ones
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Draining has a limit: connections still busy after it are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
