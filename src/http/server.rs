//! HTTP/1.1 server.
//!
//! # Responsibilities
//! - Bind the listener and run the accept loop
//! - Perform the TLS handshake when configured
//! - Parse request heads and dispatch each request to the handler
//! - Keep connections alive across sequential requests
//! - Report connection-level failures to the exception handler
//!
//! # Design Decisions
//! - One task per connection and one per dispatched request
//! - The connection lends its read side to the request body and its write
//!   side to the response, and waits for both back before reading the
//!   next request, so exchanges on a connection never overlap
//! - Unread request bodies are drained up to a limit, beyond that the
//!   connection is closed instead

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerOptions;
use crate::error::{Error, Result};
use crate::http::body::Body;
use crate::http::codec::{
    encode_response_head, is_keep_alive, parse_request_head, request_body_kind, BodyDecoder,
    BodyKind, Decoded, ProtocolError, RequestHead,
};
use crate::http::compression::ContentCoding;
use crate::http::headers::HeaderSet;
use crate::http::method::{reason_phrase, Version};
use crate::http::request::{ConnectionInfo, ServerRequest};
use crate::http::response::{Completion, ServerResponse};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::connection::{ConnectionId, ConnectionTracker};
use crate::net::listener::{Accepted, Listener, ListenerError};
use crate::net::{tls, Inbound, Outbound, Transport};

/// Most unread request body bytes discarded to keep a connection alive.
const MAX_DRAIN: usize = 256 * 1024;

/// How long `ListeningServer::close` waits for live connections.
const CLOSE_DRAIN_LIMIT: Duration = Duration::from_secs(5);

/// Pause after an accept failure that is not specific to one connection,
/// e.g. running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub type RequestHandler = Arc<dyn Fn(ServerRequest) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ExceptionHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Server builder: options plus handlers.
pub struct HttpServer {
    options: ServerOptions,
    handler: Option<RequestHandler>,
    exception_handler: Option<ExceptionHandler>,
}

impl HttpServer {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            handler: None,
            exception_handler: None,
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ServerOptions {
        &mut self.options
    }

    pub fn set_compression_supported(&mut self, supported: bool) -> &mut Self {
        self.options.compression_supported = supported;
        self
    }

    pub fn is_compression_supported(&self) -> bool {
        self.options.compression_supported
    }

    pub fn set_max_websocket_frame_size(&mut self, size: usize) -> &mut Self {
        self.options.max_websocket_frame_size = size;
        self
    }

    pub fn max_websocket_frame_size(&self) -> usize {
        self.options.max_websocket_frame_size
    }

    /// Register the handler every request is dispatched to.
    pub fn request_handler<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |req| Box::pin(handler(req))));
        self
    }

    /// Register a handler for failures no request handler can see:
    /// handshake failures and malformed requests.
    pub fn exception_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    /// Bind `host:port` and start serving. Port 0 picks a free port.
    pub async fn listen(&self, port: u16, host: &str) -> Result<ListeningServer> {
        let handler = self
            .handler
            .clone()
            .ok_or(Error::InvalidState("no request handler registered"))?;

        let acceptor = if self.options.tls.enabled {
            Some(tls::acceptor(&self.options.tls)?)
        } else {
            None
        };

        let listener = Listener::bind(host, port, self.options.max_connections)
            .await
            .map_err(|err| match err {
                ListenerError::Bind { addr, source } => Error::Bind { addr, source },
                ListenerError::Accept(source) => Error::Io(source),
                ListenerError::Closed => Error::ConnectionClosed,
            })?;
        let local_addr = listener.local_addr()?;

        let ctx = Arc::new(ServerContext {
            options: self.options.clone(),
            handler,
            exception_handler: self.exception_handler.clone(),
            acceptor,
            tracker: listener.tracker(),
            shutdown: Shutdown::new(),
        });

        tracing::info!(
            address = %local_addr,
            tls = ctx.acceptor.is_some(),
            client_auth_required = self.options.tls.client_auth_required,
            compression = self.options.compression_supported,
            "HTTP server listening"
        );

        let shutdown = ctx.shutdown.subscribe();
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&ctx), shutdown));

        Ok(ListeningServer {
            local_addr,
            ctx,
            accept_task: Some(accept_task),
        })
    }
}

/// A bound, running server. Dropping it stops accepting connections.
pub struct ListeningServer {
    local_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    accept_task: Option<JoinHandle<()>>,
}

impl ListeningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> u64 {
        self.ctx.tracker.live()
    }

    /// Stop accepting, close idle connections and wait for busy ones.
    ///
    /// Returns whether every connection closed in time.
    pub async fn close(mut self) -> bool {
        self.ctx.shutdown.trigger();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        let drained = self.ctx.tracker.drained(CLOSE_DRAIN_LIMIT).await;
        tracing::info!(
            address = %self.local_addr,
            drained,
            "HTTP server closed"
        );
        drained
    }
}

impl Drop for ListeningServer {
    fn drop(&mut self) {
        self.ctx.shutdown.trigger();
    }
}

struct ServerContext {
    options: ServerOptions,
    handler: RequestHandler,
    exception_handler: Option<ExceptionHandler>,
    acceptor: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
}

impl ServerContext {
    fn report(&self, connection_id: ConnectionId, err: Error) {
        tracing::warn!(connection_id = %connection_id, error = %err, "Connection error");
        if let Some(handler) = &self.exception_handler {
            handler(err);
        }
    }
}

async fn accept_loop(listener: Listener, ctx: Arc<ServerContext>, mut shutdown: ShutdownSignal) {
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            accepted = listener.accept() => match accepted {
                Ok(Accepted { stream, remote, slot }) => {
                    let conn_ctx = Arc::clone(&ctx);
                    let conn_shutdown = ctx.shutdown.subscribe();
                    tokio::spawn(async move {
                        serve_connection(conn_ctx, stream, remote, slot.id(), conn_shutdown).await;
                        drop(slot);
                    });
                }
                Err(ListenerError::Closed) => break,
                Err(err) => {
                    tracing::error!(error = %err, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    tracing::debug!("Accept loop stopped");
}

async fn serve_connection(
    ctx: Arc<ServerContext>,
    stream: TcpStream,
    remote: SocketAddr,
    id: ConnectionId,
    mut shutdown: ShutdownSignal,
) {
    let local = match stream.local_addr() {
        Ok(addr) => addr,
        Err(err) => {
            ctx.report(id, err.into());
            return;
        }
    };

    let transport = match &ctx.acceptor {
        Some(acceptor) => {
            let handshake = acceptor.accept(stream);
            match tokio::time::timeout(ctx.options.idle_timeout(), handshake).await {
                Ok(Ok(stream)) => Transport::from(stream),
                Ok(Err(err)) => {
                    ctx.report(id, Error::TlsHandshake(err));
                    return;
                }
                Err(_) => {
                    let err = io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out");
                    ctx.report(id, Error::TlsHandshake(err));
                    return;
                }
            }
        }
        None => Transport::Plain(stream),
    };

    let info = ConnectionInfo {
        local,
        remote,
        tls: transport.is_tls(),
    };
    tracing::debug!(connection_id = %id, peer_addr = %remote, tls = info.tls, "Connection open");

    let (mut inbound, mut outbound) = transport.split();

    loop {
        let head = match read_request_head(&ctx, &mut inbound, &mut shutdown).await {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(err) => {
                if let Error::Protocol(proto) = &err {
                    let status = match proto {
                        ProtocolError::HeadTooLarge(_) => 431,
                        _ => 400,
                    };
                    let _ = write_status_only(&mut outbound, Version::Http11, status).await;
                }
                ctx.report(id, err);
                break;
            }
        };

        let kind = match request_body_kind(&head.headers) {
            Ok(kind) => kind,
            Err(err) => {
                let _ = write_status_only(&mut outbound, head.version, 400).await;
                ctx.report(id, err.into());
                break;
            }
        };

        if head.version == Version::Http11
            && kind != BodyKind::Empty
            && head.headers.has_token("expect", "100-continue")
        {
            if let Err(err) = send_continue(&mut outbound).await {
                ctx.report(id, err.into());
                break;
            }
        }

        let keep_alive = ctx.options.keep_alive && is_keep_alive(head.version, &head.headers);
        let coding = if ctx.options.compression_supported {
            ContentCoding::negotiate(&head.headers)
        } else {
            None
        };

        tracing::debug!(
            connection_id = %id,
            method = %head.method,
            uri = %head.target,
            "Dispatching request"
        );

        let (body_tx, body_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        let version = head.version;
        let body = Body::new(inbound, BodyDecoder::new(kind), Some(body_tx));
        let response = ServerResponse::new(
            outbound,
            head.method.clone(),
            version,
            keep_alive,
            coding,
            response_tx,
        );
        let request = ServerRequest::new(
            head.method,
            head.target,
            version,
            head.headers,
            info,
            body,
            response,
        );
        tokio::spawn((ctx.handler)(request));

        let Ok(outcome) = response_rx.await else {
            break;
        };
        let Some(mut returned) = outcome.outbound else {
            break;
        };
        let reuse = match outcome.completion {
            Completion::Ended { keep_alive } => keep_alive,
            Completion::Unsent => {
                tracing::warn!(connection_id = %id, "Request dropped without a response");
                let _ = write_status_only(&mut returned, version, 500).await;
                false
            }
            Completion::Aborted => false,
        };
        if !reuse {
            let _ = returned.shutdown().await;
            break;
        }
        outbound = returned;

        let Ok(released) = body_rx.await else {
            break;
        };
        if released.poisoned {
            break;
        }
        inbound = released.inbound;
        if !released.decoder.is_finished() {
            match drain_body(&ctx, &mut inbound, released.decoder).await {
                Ok(true) => {}
                Ok(false) => {
                    let _ = outbound.shutdown().await;
                    break;
                }
                Err(err) => {
                    ctx.report(id, err);
                    let _ = outbound.shutdown().await;
                    break;
                }
            }
        }
    }

    tracing::debug!(connection_id = %id, "Connection done");
}

/// Wait for the next request head. `Ok(None)` means the connection should
/// close quietly: the peer left, went idle, or the server is shutting down.
async fn read_request_head(
    ctx: &ServerContext,
    inbound: &mut Inbound,
    shutdown: &mut ShutdownSignal,
) -> Result<Option<RequestHead>> {
    loop {
        if let Some(head) = parse_request_head(inbound.buffer_mut(), ctx.options.max_header_size)? {
            return Ok(Some(head));
        }
        tokio::select! {
            _ = shutdown.triggered() => return Ok(None),
            read = tokio::time::timeout(ctx.options.idle_timeout(), inbound.fill()) => match read {
                Err(_) => return Ok(None),
                Ok(Ok(0)) if inbound.has_buffered() => {
                    return Err(ProtocolError::UnexpectedEof.into())
                }
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err.into()),
            },
        }
    }
}

/// Discard the rest of a request body the handler did not read.
///
/// `Ok(false)` means the body was abandoned (too large or the peer went
/// idle) and the connection must close without reuse.
async fn drain_body(
    ctx: &ServerContext,
    inbound: &mut Inbound,
    mut decoder: BodyDecoder,
) -> Result<bool> {
    let mut drained = 0;
    loop {
        match decoder.decode(inbound.buffer_mut())? {
            Decoded::Data(data) => {
                drained += data.len();
                if drained > MAX_DRAIN {
                    tracing::debug!(drained, "Unread request body too large, closing");
                    return Ok(false);
                }
            }
            Decoded::Done(_) => return Ok(true),
            Decoded::NeedMore => {
                match tokio::time::timeout(ctx.options.idle_timeout(), inbound.fill()).await {
                    Ok(Ok(0)) => return Err(ProtocolError::UnexpectedEof.into()),
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => return Err(err.into()),
                    Err(_) => {
                        tracing::debug!("Idle while draining request body, closing");
                        return Ok(false);
                    }
                }
            }
        }
    }
}

async fn send_continue(outbound: &mut Outbound) -> std::io::Result<()> {
    outbound.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
    outbound.flush().await
}

/// Bodiless response that also closes the connection.
async fn write_status_only(outbound: &mut Outbound, version: Version, status: u16) -> Result<()> {
    let mut headers = HeaderSet::new();
    headers.set("Content-Length", "0");
    headers.set("Connection", "close");
    let mut out = Vec::new();
    encode_response_head(&mut out, version, status, reason_phrase(status), &headers)?;
    outbound.write_all(&out).await?;
    outbound.flush().await?;
    Ok(())
}
