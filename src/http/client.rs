//! HTTP/1.1 client.
//!
//! # Responsibilities
//! - Resolve a request URI to an origin and a request target
//! - Connect (plain or TLS with optional client certificate) or reuse an
//!   idle keep-alive connection
//! - Stream the request body, fixed-length or chunked
//! - Enforce the request timeout up to the arrival of response headers
//! - Stream the response body and return the connection to the pool
//!
//! # Design Decisions
//! - The timeout clock starts at the first network activity of a request
//!   and stops once the response head is parsed; on expiry the connection
//!   is dropped, so a late response can never be observed
//! - A connection goes back to the pool only after its response body has
//!   been read to the end

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::http::body::{Body, PauseHandle, Released};
use crate::http::buffer::Buffer;
use crate::http::codec::{
    encode_chunk, encode_last_chunk, encode_request_head, is_keep_alive, parse_response_head,
    response_body_kind, BodyDecoder, BodyKind, ProtocolError, ResponseHead,
};
use crate::http::compression::{ContentCoding, Decompressor, ACCEPT_ENCODING};
use crate::http::headers::HeaderSet;
use crate::http::method::{Method, Version};
use crate::net::{tls, Inbound, Outbound, Transport};

/// Idle connections kept per origin.
const MAX_IDLE_PER_ORIGIN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Origin {
    host: String,
    port: u16,
    tls: bool,
}

impl Origin {
    fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

struct Connection {
    inbound: Inbound,
    outbound: Outbound,
}

impl Connection {
    /// Whether the peer has closed or sent unsolicited bytes while idle.
    fn is_stale(&mut self) -> bool {
        if self.inbound.has_buffered() {
            return true;
        }
        match self.inbound.fill().now_or_never() {
            None => false,
            Some(_) => true,
        }
    }
}

#[derive(Default)]
struct ClientShared {
    idle: Mutex<HashMap<Origin, Vec<Connection>>>,
    connector: Mutex<Option<TlsConnector>>,
}

impl ClientShared {
    fn checkout(&self, origin: &Origin) -> Option<Connection> {
        let mut idle = self.idle.lock().ok()?;
        let connections = idle.get_mut(origin)?;
        while let Some(mut conn) = connections.pop() {
            if !conn.is_stale() {
                return Some(conn);
            }
        }
        None
    }

    fn checkin(&self, origin: Origin, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            let connections = idle.entry(origin).or_default();
            if connections.len() < MAX_IDLE_PER_ORIGIN {
                connections.push(conn);
            }
        }
    }

    fn connector(&self, options: &ClientOptions) -> Result<TlsConnector> {
        let mut cached = self
            .connector
            .lock()
            .map_err(|_| Error::InvalidState("TLS connector lock poisoned"))?;
        if let Some(connector) = cached.as_ref() {
            return Ok(connector.clone());
        }
        let connector = tls::connector(&options.tls)?;
        *cached = Some(connector.clone());
        Ok(connector)
    }
}

/// HTTP client. Cheap to clone; clones share idle connections.
#[derive(Clone)]
pub struct HttpClient {
    options: ClientOptions,
    shared: Arc<ClientShared>,
}

impl HttpClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            shared: Arc::new(ClientShared::default()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Change options. Idle connections and cached TLS material are
    /// discarded.
    pub fn options_mut(&mut self) -> &mut ClientOptions {
        self.shared = Arc::new(ClientShared::default());
        &mut self.options
    }

    pub fn set_try_use_compression(&mut self, enabled: bool) -> &mut Self {
        self.options.try_use_compression = enabled;
        self
    }

    pub fn is_try_use_compression(&self) -> bool {
        self.options.try_use_compression
    }

    pub fn set_max_websocket_frame_size(&mut self, size: usize) -> &mut Self {
        self.options.max_websocket_frame_size = size;
        self
    }

    pub fn max_websocket_frame_size(&self) -> usize {
        self.options.max_websocket_frame_size
    }

    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.options.request_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Start a request. Absolute URIs pick their own origin and are sent in
    /// absolute form; relative ones go to the configured default host.
    pub fn request(&self, method: Method, uri: &str) -> Result<ClientRequest> {
        let (origin, target) = self.resolve(uri)?;
        let mut headers = HeaderSet::new();
        headers.set("Host", origin.host_header());
        Ok(ClientRequest {
            client: self.clone(),
            method,
            target,
            origin,
            headers,
            chunked: false,
            timeout: self.options.request_timeout(),
            deadline: None,
            conn: None,
            framing: None,
            failed: false,
        })
    }

    pub fn get(&self, uri: &str) -> Result<ClientRequest> {
        self.request(Method::Get, uri)
    }

    pub fn post(&self, uri: &str) -> Result<ClientRequest> {
        self.request(Method::Post, uri)
    }

    pub fn put(&self, uri: &str) -> Result<ClientRequest> {
        self.request(Method::Put, uri)
    }

    pub fn delete(&self, uri: &str) -> Result<ClientRequest> {
        self.request(Method::Delete, uri)
    }

    pub fn head(&self, uri: &str) -> Result<ClientRequest> {
        self.request(Method::Head, uri)
    }

    /// Send a bodiless GET right away.
    pub async fn get_now(&self, uri: &str) -> Result<ClientResponse> {
        self.get(uri)?.end().await
    }

    /// Drop every idle connection.
    pub fn close(&self) {
        if let Ok(mut idle) = self.shared.idle.lock() {
            idle.clear();
        }
    }

    fn resolve(&self, uri: &str) -> Result<(Origin, String)> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        if uri.starts_with('/') || uri == "*" {
            let origin = Origin {
                host: self.options.default_host.clone(),
                port: self.options.default_port,
                tls: self.options.tls.enabled,
            };
            return Ok((origin, uri.to_string()));
        }

        let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
        let tls = match url.scheme() {
            "https" => true,
            "http" => self.options.tls.enabled,
            _ => return Err(invalid("unsupported scheme")),
        };
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;
        Ok((Origin { host, port, tls }, uri.to_string()))
    }

    async fn connect(&self, origin: &Origin) -> Result<Connection> {
        if let Some(conn) = self.shared.checkout(origin) {
            tracing::trace!(host = %origin.host, port = origin.port, "Reusing idle connection");
            return Ok(conn);
        }

        let stream = tokio::time::timeout(
            self.options.connect_timeout(),
            TcpStream::connect((origin.host.as_str(), origin.port)),
        )
        .await
        .map_err(|_| Error::Timeout(self.options.connect_timeout()))??;
        stream.set_nodelay(true)?;

        let transport = if origin.tls {
            let connector = self.shared.connector(&self.options)?;
            let name = tls::server_name(&origin.host)?;
            let handshake = connector.connect(name, stream);
            let stream = tokio::time::timeout(self.options.connect_timeout(), handshake)
                .await
                .map_err(|_| Error::Timeout(self.options.connect_timeout()))?
                .map_err(Error::TlsHandshake)?;
            Transport::from(stream)
        } else {
            Transport::Plain(stream)
        };

        tracing::debug!(
            host = %origin.host,
            port = origin.port,
            tls = origin.tls,
            "Client connection established"
        );
        let (inbound, outbound) = transport.split();
        Ok(Connection { inbound, outbound })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestFraming {
    Length { remaining: u64 },
    Chunked,
}

/// A request being written.
pub struct ClientRequest {
    client: HttpClient,
    method: Method,
    target: String,
    origin: Origin,
    headers: HeaderSet,
    chunked: bool,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    conn: Option<Connection>,
    framing: Option<RequestFraming>,
    failed: bool,
}

/// Run `fut`, failing with `Timeout` once `deadline` passes.
async fn within<T, F>(deadline: Option<(Instant, Duration)>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match deadline {
        Some((at, limit)) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}

impl ClientRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderSet {
        &mut self.headers
    }

    pub fn put_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    pub fn set_chunked(&mut self, chunked: bool) -> &mut Self {
        if self.framing.is_none() {
            self.chunked = chunked;
        }
        self
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Fail the request if no response headers arrive within `timeout`.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Write body bytes, connecting and sending the headers first if needed.
    pub async fn write(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let result = self.write_bytes(data.as_ref()).await;
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// Finish the request and wait for the response head.
    pub async fn end(mut self) -> Result<ClientResponse> {
        let result = self.finish().await;
        if let Err(err) = &result {
            if matches!(err, Error::Timeout(_)) {
                tracing::warn!(
                    method = %self.method,
                    uri = %self.target,
                    error = %err,
                    "Request timed out"
                );
            }
            self.fail();
        }
        result
    }

    /// Write `data` and finish. Sets Content-Length when the headers are
    /// still pending and the request is not chunked.
    pub async fn end_with(mut self, data: impl AsRef<[u8]>) -> Result<ClientResponse> {
        let data = data.as_ref();
        if self.framing.is_none() && !self.chunked && !self.headers.contains("content-length") {
            self.headers.set("Content-Length", data.len().to_string());
        }
        if !data.is_empty() {
            self.write(data).await?;
        }
        self.end().await
    }

    fn fail(&mut self) {
        self.failed = true;
        self.conn = None;
    }

    fn deadline(&mut self) -> Option<(Instant, Duration)> {
        let limit = self.timeout?;
        let at = *self.deadline.get_or_insert_with(|| Instant::now() + limit);
        Some((at, limit))
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.failed {
            return Err(Error::InvalidState("request already failed"));
        }
        let deadline = self.deadline();
        let mut out = Vec::new();
        let framing = self.begin(&mut out, false)?;

        match framing {
            RequestFraming::Chunked => encode_chunk(&mut out, data),
            RequestFraming::Length { remaining } => {
                let len = data.len() as u64;
                if len > remaining {
                    return Err(Error::InvalidState("body exceeds Content-Length"));
                }
                self.framing = Some(RequestFraming::Length {
                    remaining: remaining - len,
                });
                out.extend_from_slice(data);
            }
        }
        within(deadline, self.send(out)).await
    }

    async fn finish(&mut self) -> Result<ClientResponse> {
        if self.failed {
            return Err(Error::InvalidState("request already failed"));
        }
        let deadline = self.deadline();
        let mut out = Vec::new();
        match self.begin(&mut out, true)? {
            RequestFraming::Chunked => encode_last_chunk(&mut out, &HeaderSet::new())?,
            RequestFraming::Length { remaining: 0 } => {}
            RequestFraming::Length { .. } => {
                return Err(Error::InvalidState("request body shorter than Content-Length"))
            }
        }

        within(deadline, async {
            self.send(out).await?;
            self.read_head().await
        })
        .await
    }

    /// Current framing, appending the request head to `out` the first time.
    fn begin(&mut self, out: &mut Vec<u8>, ending: bool) -> Result<RequestFraming> {
        if let Some(framing) = self.framing {
            return Ok(framing);
        }
        let options = &self.client.options;

        let framing = if self.chunked {
            self.headers.remove("content-length");
            self.headers.set("Transfer-Encoding", "chunked");
            RequestFraming::Chunked
        } else {
            match self.headers.get("content-length") {
                Some(value) => RequestFraming::Length {
                    remaining: value
                        .trim()
                        .parse()
                        .map_err(|_| Error::InvalidState("Content-Length is not a number"))?,
                },
                None if ending => RequestFraming::Length { remaining: 0 },
                None => {
                    return Err(Error::InvalidState(
                        "set Content-Length or chunked mode before writing a body",
                    ))
                }
            }
        };

        if options.try_use_compression && !self.headers.contains("accept-encoding") {
            self.headers.set("Accept-Encoding", ACCEPT_ENCODING);
        }
        if !options.keep_alive {
            self.headers.set("Connection", "close");
        }

        encode_request_head(out, &self.method, &self.target, &self.headers)?;
        self.framing = Some(framing);
        Ok(framing)
    }

    async fn send(&mut self, out: Vec<u8>) -> Result<()> {
        if self.conn.is_none() {
            self.conn = Some(self.client.connect(&self.origin).await?);
        }
        let conn = self.conn.as_mut().ok_or(Error::ConnectionClosed)?;
        if !out.is_empty() {
            conn.outbound.write_all(&out).await?;
            conn.outbound.flush().await?;
        }
        Ok(())
    }

    async fn read_head(&mut self) -> Result<ClientResponse> {
        let max_header_size = self.client.options.max_header_size;
        let conn = self.conn.as_mut().ok_or(Error::ConnectionClosed)?;

        let head = loop {
            match parse_response_head(conn.inbound.buffer_mut(), max_header_size)? {
                // Interim responses carry no body.
                Some(head) if (100..200).contains(&head.status) && head.status != 101 => continue,
                Some(head) => break head,
                None => {
                    if conn.inbound.fill().await? == 0 {
                        return Err(if conn.inbound.has_buffered() {
                            ProtocolError::UnexpectedEof.into()
                        } else {
                            Error::ConnectionClosed
                        });
                    }
                }
            }
        };

        let conn = self.conn.take().ok_or(Error::ConnectionClosed)?;
        self.build_response(head, conn)
    }

    fn build_response(&self, head: ResponseHead, conn: Connection) -> Result<ClientResponse> {
        let options = &self.client.options;
        let kind = response_body_kind(&self.method, head.status, &head.headers)?;
        let tunnel = self.method == Method::Connect && (200..300).contains(&head.status);
        let reusable = options.keep_alive
            && is_keep_alive(head.version, &head.headers)
            && kind != BodyKind::CloseDelimited
            && !tunnel;

        let Connection { inbound, outbound } = conn;
        let mut body = if reusable {
            let (tx, rx) = oneshot::channel::<Released>();
            let shared = Arc::clone(&self.client.shared);
            let origin = self.origin.clone();
            tokio::spawn(async move {
                if let Ok(released) = rx.await {
                    if released.is_complete() {
                        shared.checkin(
                            origin,
                            Connection {
                                inbound: released.inbound,
                                outbound,
                            },
                        );
                    }
                }
            });
            Body::new(inbound, BodyDecoder::new(kind), Some(tx))
        } else {
            drop(outbound);
            Body::new(inbound, BodyDecoder::new(kind), None)
        };

        if options.try_use_compression {
            if let Some(coding) = ContentCoding::from_content_encoding(&head.headers) {
                body = body.with_decompressor(Decompressor::new(coding));
            }
        }

        tracing::debug!(
            method = %self.method,
            uri = %self.target,
            status = head.status,
            "Response received"
        );

        Ok(ClientResponse {
            status: head.status,
            status_message: head.reason,
            version: head.version,
            headers: head.headers,
            body,
        })
    }
}

/// A response whose body is still on the wire.
pub struct ClientResponse {
    status: u16,
    status_message: String,
    version: Version,
    headers: HeaderSet,
    body: Body,
}

impl ClientResponse {
    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderSet {
        &mut self.headers
    }

    /// Trailers; populated once a chunked body has been read to the end.
    pub fn trailers(&self) -> &HeaderSet {
        self.body.trailers()
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub async fn chunk(&mut self) -> Result<Option<bytes::Bytes>> {
        self.body.chunk().await
    }

    /// Read the rest of the body.
    pub async fn body(&mut self) -> Result<Buffer> {
        self.body.buffer().await
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.body.pause_handle()
    }
}

impl std::fmt::Debug for ClientResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .finish()
    }
}
