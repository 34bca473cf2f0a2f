//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HttpConfig (validated)
//!     → ServerOptions / ClientOptions handed to HttpServer / HttpClient
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Options can also be built in code; servers and clients expose fluent
//!   setters for the flags embedders usually flip

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ClientOptions;
pub use schema::HttpConfig;
pub use schema::ObservabilityConfig;
pub use schema::ServerOptions;
pub use schema::TlsOptions;
