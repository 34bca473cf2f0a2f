//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Server:
//!     TCP/TLS connection
//!         → server.rs (accept, handshake, read request head)
//!         → codec.rs (framing)
//!         → request.rs + body.rs (message model, streamed body)
//!         → multipart.rs (form decoding, on request)
//!         → user handler
//!         → response.rs (headers, chunked/trailers, send_file)
//!
//! Client:
//!     client.rs (resolve origin, connect or reuse)
//!         → codec.rs (request head, chunked body)
//!         → response head → body.rs (streamed, decompressed)
//! ```

pub mod body;
pub mod buffer;
pub mod client;
pub mod codec;
pub mod compression;
pub mod headers;
pub mod method;
pub mod mime;
pub mod multipart;
pub mod request;
pub mod response;
pub mod server;

pub use body::{Body, PauseHandle};
pub use buffer::Buffer;
pub use client::{ClientRequest, ClientResponse, HttpClient};
pub use headers::HeaderSet;
pub use method::{Method, Version};
pub use multipart::{FormStream, Upload};
pub use request::ServerRequest;
pub use response::ServerResponse;
pub use server::{HttpServer, ListeningServer};
