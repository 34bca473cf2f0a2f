//! Embeddable HTTP/1.1 server and client engine.
//!
//! Servers dispatch every request to one async handler; clients issue
//! requests with arbitrary verbs. Both sides speak plain TCP or TLS (with
//! mutual authentication), stream bodies with chunked transfer and
//! trailers, and optionally compress content. Servers decode multipart and
//! url-encoded forms and serve files.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::{ClientOptions, HttpConfig, ServerOptions, TlsOptions};
pub use error::{Error, Result};
pub use http::{
    Body, Buffer, ClientRequest, ClientResponse, FormStream, HeaderSet, HttpClient, HttpServer,
    ListeningServer, Method, ServerRequest, ServerResponse, Upload, Version,
};
pub use lifecycle::Shutdown;
