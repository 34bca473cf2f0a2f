//! Server-side response writer.
//!
//! # Responsibilities
//! - Hold status, headers and trailers until the first byte goes out
//! - Frame the body: Content-Length, chunked with trailers, or
//!   close-delimited for HTTP/1.0 peers
//! - Never write body bytes for HEAD and CONNECT
//! - Stream files from disk, with a not-found fallback
//! - Hand the connection's write side back when finished
//!
//! # Design Decisions
//! - Headers are written lazily, on first `write` or on `end`
//! - Writing a body without Content-Length or chunked mode is rejected,
//!   the recipient would have no way to find its end
//! - A body shorter than its Content-Length closes the connection

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::http::codec::{encode_chunk, encode_last_chunk, encode_response_head};
use crate::http::compression::{Compressor, ContentCoding};
use crate::http::headers::HeaderSet;
use crate::http::method::{reason_phrase, Method, Version};
use crate::http::mime;
use crate::net::Outbound;

const FILE_CHUNK: usize = 64 * 1024;

/// How the response ended, reported to the connection that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Ended { keep_alive: bool },
    /// Dropped before anything was written.
    Unsent,
    /// Dropped or closed mid-body.
    Aborted,
}

pub(crate) struct ResponseOutcome {
    pub outbound: Option<Outbound>,
    pub completion: Completion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// No body bytes may be sent.
    Suppressed,
    Length { remaining: u64 },
    Chunked,
    CloseDelimited,
}

/// Response to a `ServerRequest`.
pub struct ServerResponse {
    outbound: Option<Outbound>,
    on_complete: Option<oneshot::Sender<ResponseOutcome>>,
    method: Method,
    version: Version,
    status: u16,
    status_message: Option<String>,
    headers: HeaderSet,
    trailers: HeaderSet,
    chunked: bool,
    keep_alive: bool,
    coding: Option<ContentCoding>,
    compressor: Option<Compressor>,
    framing: Option<Framing>,
    ended: bool,
}

impl ServerResponse {
    pub(crate) fn new(
        outbound: Outbound,
        method: Method,
        version: Version,
        keep_alive: bool,
        coding: Option<ContentCoding>,
        on_complete: oneshot::Sender<ResponseOutcome>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            on_complete: Some(on_complete),
            method,
            version,
            status: 200,
            status_message: None,
            headers: HeaderSet::new(),
            trailers: HeaderSet::new(),
            chunked: false,
            keep_alive,
            coding,
            compressor: None,
            framing: None,
            ended: false,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn set_status_code(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    /// Custom status message, or the standard reason phrase.
    pub fn status_message(&self) -> &str {
        self.status_message
            .as_deref()
            .unwrap_or_else(|| reason_phrase(self.status))
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.status_message = Some(message.into());
        self
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

    /// Trailers sent after a chunked body; ignored otherwise.
    pub fn trailers(&self) -> &HeaderSet {
        &self.trailers
    }

    pub fn trailers_mut(&mut self) -> &mut HeaderSet {
        &mut self.trailers
    }

    pub fn put_trailer(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.trailers.set(name, value);
        self
    }

    /// Switch chunked transfer on or off. Has no effect once the headers
    /// have been written.
    pub fn set_chunked(&mut self, chunked: bool) -> &mut Self {
        if self.headers_written() {
            tracing::warn!("set_chunked after headers were written is ignored");
        } else {
            self.chunked = chunked;
        }
        self
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn headers_written(&self) -> bool {
        self.framing.is_some()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Write body bytes, sending the headers first if needed.
    pub async fn write(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.write_bytes(data.as_ref()).await
    }

    /// Finish the response.
    pub async fn end(&mut self) -> Result<()> {
        if self.ended {
            return Err(Error::InvalidState("response already ended"));
        }
        let mut out = Vec::new();
        let framing = self.begin(&mut out, true)?;

        match framing {
            Framing::Chunked => {
                if let Some(compressor) = self.compressor.take() {
                    encode_chunk(&mut out, &compressor.finish()?);
                }
                encode_last_chunk(&mut out, &self.trailers)?;
            }
            Framing::CloseDelimited => {
                if let Some(compressor) = self.compressor.take() {
                    out.extend_from_slice(&compressor.finish()?);
                }
                self.keep_alive = false;
            }
            Framing::Length { remaining } if remaining > 0 => {
                tracing::warn!(
                    missing = remaining,
                    "Response ended short of its Content-Length, closing connection"
                );
                self.keep_alive = false;
            }
            Framing::Length { .. } | Framing::Suppressed => {}
        }

        self.send(&out).await?;
        self.ended = true;
        self.complete(Completion::Ended {
            keep_alive: self.keep_alive,
        });
        Ok(())
    }

    /// Write `data` and finish. Sets Content-Length when the headers are
    /// still pending and the response is not chunked.
    pub async fn end_with(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let data = data.as_ref();
        if !self.headers_written() && !self.chunked && !self.headers.contains("content-length") {
            self.headers.set("Content-Length", data.len().to_string());
        }
        if !data.is_empty() {
            self.write_bytes(data).await?;
        }
        self.end().await
    }

    /// Send a file as the body. `Content-Type` follows the extension.
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match open_file(path).await? {
            Some((file, len)) => self.stream_file(path, file, len).await,
            None => Err(Error::FileNotFound(path.to_path_buf())),
        }
    }

    /// Send `path`, or `not_found` with status 404 when `path` is missing.
    pub async fn send_file_or(
        &mut self,
        path: impl AsRef<Path>,
        not_found: impl AsRef<Path>,
    ) -> Result<()> {
        let path = path.as_ref();
        if let Some((file, len)) = open_file(path).await? {
            return self.stream_file(path, file, len).await;
        }
        tracing::debug!(path = %path.display(), "File not found, sending fallback");
        self.set_status_code(404);
        self.send_file(not_found).await
    }

    /// Close the connection without finishing the exchange.
    pub async fn close(&mut self) {
        if let Some(mut outbound) = self.outbound.take() {
            let _ = outbound.shutdown().await;
        }
        self.ended = true;
        self.complete(Completion::Aborted);
    }

    async fn stream_file(&mut self, path: &Path, mut file: File, len: u64) -> Result<()> {
        if self.headers_written() {
            return Err(Error::InvalidState("headers already written"));
        }
        self.headers.set("Content-Type", mime::from_path(path));
        if !self.chunked {
            self.headers.set("Content-Length", len.to_string());
        }

        if !self.body_suppressed() {
            let mut buf = vec![0u8; FILE_CHUNK];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                self.write_bytes(&buf[..n]).await?;
            }
        }
        self.end().await
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.ended {
            return Err(Error::InvalidState("response already ended"));
        }
        let mut out = Vec::new();
        let framing = self.begin(&mut out, false)?;

        match framing {
            Framing::Suppressed => {}
            Framing::Chunked | Framing::CloseDelimited => {
                let data = match self.compressor.as_mut() {
                    Some(compressor) => compressor.compress(data)?,
                    None => bytes::Bytes::copy_from_slice(data),
                };
                if framing == Framing::Chunked {
                    encode_chunk(&mut out, &data);
                } else {
                    out.extend_from_slice(&data);
                }
            }
            Framing::Length { remaining } => {
                let len = data.len() as u64;
                if len > remaining {
                    self.keep_alive = false;
                    return Err(Error::InvalidState("body exceeds Content-Length"));
                }
                self.framing = Some(Framing::Length {
                    remaining: remaining - len,
                });
                out.extend_from_slice(data);
            }
        }

        self.send(&out).await
    }

    fn body_suppressed(&self) -> bool {
        self.method.suppresses_response_body()
            || (100..200).contains(&self.status)
            || self.status == 204
            || self.status == 304
    }

    /// Current framing, appending the head to `out` if it has not been
    /// written yet.
    fn begin(&mut self, out: &mut Vec<u8>, ending: bool) -> Result<Framing> {
        if let Some(framing) = self.framing {
            return Ok(framing);
        }

        let framing = if self.body_suppressed() {
            if self.method == Method::Connect {
                self.headers.remove("transfer-encoding");
                if !(200..300).contains(&self.status) && !self.headers.contains("content-length") {
                    self.headers.set("Content-Length", "0");
                }
            }
            Framing::Suppressed
        } else {
            if let Some(coding) = self.coding {
                if !self.headers.contains("content-encoding") {
                    self.headers.set("Content-Encoding", coding.as_str());
                    self.headers.add("Vary", "Accept-Encoding");
                    self.compressor = Some(Compressor::new(coding));
                    self.chunked = true;
                }
            }
            if self.chunked {
                self.headers.remove("content-length");
                if self.version == Version::Http11 {
                    self.headers.set("Transfer-Encoding", "chunked");
                    Framing::Chunked
                } else {
                    self.headers.remove("transfer-encoding");
                    self.keep_alive = false;
                    Framing::CloseDelimited
                }
            } else {
                match self.headers.get("content-length") {
                    Some(value) => {
                        let remaining = value
                            .trim()
                            .parse()
                            .map_err(|_| Error::InvalidState("Content-Length is not a number"))?;
                        Framing::Length { remaining }
                    }
                    None if ending => {
                        self.headers.set("Content-Length", "0");
                        Framing::Length { remaining: 0 }
                    }
                    None => {
                        return Err(Error::InvalidState(
                            "set Content-Length or chunked mode before writing a body",
                        ))
                    }
                }
            }
        };

        if !self.keep_alive {
            self.headers.set("Connection", "close");
        } else if self.version == Version::Http10 {
            self.headers.set("Connection", "keep-alive");
        }

        let reason = self.status_message().to_string();
        encode_response_head(out, self.version, self.status, &reason, &self.headers)?;
        self.framing = Some(framing);
        Ok(framing)
    }

    async fn send(&mut self, out: &[u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        let outbound = self.outbound.as_mut().ok_or(Error::ConnectionClosed)?;
        let result = async {
            outbound.write_all(out).await?;
            outbound.flush().await
        }
        .await;
        if let Err(err) = result {
            self.keep_alive = false;
            return Err(err.into());
        }
        Ok(())
    }

    fn complete(&mut self, completion: Completion) {
        if let Some(tx) = self.on_complete.take() {
            let _ = tx.send(ResponseOutcome {
                outbound: self.outbound.take(),
                completion,
            });
        }
    }
}

impl Drop for ServerResponse {
    fn drop(&mut self) {
        let completion = if self.headers_written() {
            Completion::Aborted
        } else {
            Completion::Unsent
        };
        self.complete(completion);
    }
}

impl std::fmt::Debug for ServerResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerResponse")
            .field("status", &self.status)
            .field("chunked", &self.chunked)
            .field("headers_written", &self.headers_written())
            .field("ended", &self.ended)
            .finish()
    }
}

/// Open a regular file; `None` when it does not exist or is not a file.
async fn open_file(path: &Path) -> Result<Option<(File, u64)>> {
    match File::open(path).await {
        Ok(file) => {
            let metadata = file.metadata().await?;
            if metadata.is_file() {
                Ok(Some((file, metadata.len())))
            } else {
                Ok(None)
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
