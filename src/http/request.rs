//! Inbound request as seen by a server handler.
//!
//! # Responsibilities
//! - Expose the parsed request line and headers
//! - Derive path, query and decoded query parameters from the target
//! - Own the request body and the response that answers it
//! - Decode form bodies when the handler opts in

use std::net::SocketAddr;

use url::Url;

use crate::error::Result;
use crate::http::body::{Body, PauseHandle};
use crate::http::buffer::Buffer;
use crate::http::headers::HeaderSet;
use crate::http::method::{Method, Version};
use crate::http::multipart::{FormEncoding, FormStream};
use crate::http::response::ServerResponse;

/// Connection facts a request carries along.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionInfo {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub tls: bool,
}

/// A request being served.
pub struct ServerRequest {
    method: Method,
    uri: String,
    path: String,
    query: Option<String>,
    version: Version,
    headers: HeaderSet,
    connection: ConnectionInfo,
    body: Body,
    pause: PauseHandle,
    expect_multipart: bool,
    response: ServerResponse,
}

/// Split a request target into path and raw query.
fn split_target(target: &str) -> (String, Option<String>) {
    if let Ok(url) = Url::parse(target) {
        if url.has_host() {
            return (url.path().to_string(), url.query().map(str::to_string));
        }
    }
    let target = target.split('#').next().unwrap_or_default();
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    }
}

impl ServerRequest {
    pub(crate) fn new(
        method: Method,
        uri: String,
        version: Version,
        headers: HeaderSet,
        connection: ConnectionInfo,
        body: Body,
        response: ServerResponse,
    ) -> Self {
        let (path, query) = split_target(&uri);
        let pause = body.pause_handle();
        Self {
            method,
            uri,
            path,
            query,
            version,
            headers,
            connection,
            body,
            pause,
            expect_multipart: false,
            response,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target exactly as received, origin-form or absolute.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Decoded query parameters.
    pub fn params(&self) -> HeaderSet {
        self.query
            .as_deref()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default()
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

    /// Host the request was addressed to, from the target or `Host`.
    pub fn host(&self) -> Option<String> {
        if let Ok(url) = Url::parse(&self.uri) {
            if let Some(host) = url.host_str() {
                return Some(match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                });
            }
        }
        self.headers.get("host").map(str::to_string)
    }

    /// The request target in absolute form.
    pub fn absolute_uri(&self) -> String {
        if Url::parse(&self.uri).map(|u| u.has_host()).unwrap_or(false) {
            return self.uri.clone();
        }
        let scheme = if self.connection.tls { "https" } else { "http" };
        let host = self
            .host()
            .unwrap_or_else(|| self.connection.local.to_string());
        format!("{}://{}{}", scheme, host, self.uri)
    }

    pub fn local_address(&self) -> SocketAddr {
        self.connection.local
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote
    }

    pub fn is_ssl(&self) -> bool {
        self.connection.tls
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Take the body out, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, Body::empty())
    }

    /// Read the whole body.
    pub async fn body_bytes(&mut self) -> Result<Buffer> {
        self.body.buffer().await
    }

    /// Stop delivering body bytes, wherever the body has been moved to.
    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Opt in to form decoding; `form` returns `None` until this is set.
    pub fn set_expect_multipart(&mut self, expect: bool) -> &mut Self {
        self.expect_multipart = expect;
        self
    }

    pub fn is_expect_multipart(&self) -> bool {
        self.expect_multipart
    }

    /// Form decoder over the body, if form decoding was requested and the
    /// content type is a form encoding. Takes the body.
    pub fn form(&mut self) -> Result<Option<FormStream>> {
        if !self.expect_multipart {
            return Ok(None);
        }
        let Some(content_type) = self.headers.get("content-type") else {
            return Ok(None);
        };
        let Some(encoding) = FormEncoding::from_content_type(content_type)? else {
            return Ok(None);
        };
        Ok(Some(FormStream::new(self.take_body(), encoding)))
    }

    pub fn response(&self) -> &ServerResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ServerResponse {
        &mut self.response
    }
}

impl std::fmt::Debug for ServerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("remote", &self.connection.remote)
            .finish()
    }
}
