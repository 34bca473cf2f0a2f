//! Pull-based message bodies.
//!
//! # Responsibilities
//! - Deliver body bytes chunk by chunk, then end exactly once
//! - Read from the socket only when the consumer asks for more, so a slow
//!   or paused consumer pushes back on the peer
//! - Hand the connection's read side back once the body is done with it
//!
//! # Design Decisions
//! - A body owns the read half of its connection while it is live; the
//!   owner of the connection gets it back through a oneshot on completion
//!   or drop, together with the decoder so unread bytes can be drained
//! - Pausing gates delivery; nothing is read while paused

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{oneshot, watch};

use crate::error::{Error, Result};
use crate::http::buffer::Buffer;
use crate::http::codec::{BodyDecoder, BodyKind, Decoded};
use crate::http::compression::Decompressor;
use crate::http::headers::HeaderSet;
use crate::net::Inbound;

/// Read side of a connection returned by a finished or dropped body.
pub struct Released {
    pub inbound: Inbound,
    /// Decoder state at release; unfinished if the body was not fully read.
    pub decoder: BodyDecoder,
    /// A framing error was seen; the connection cannot be reused.
    pub poisoned: bool,
}

impl Released {
    pub fn is_complete(&self) -> bool {
        self.decoder.is_finished() && !self.poisoned
    }
}

/// Cloneable switch for pausing body delivery from outside the reader.
#[derive(Clone)]
pub struct PauseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl PauseHandle {
    pub fn pause(&self) {
        self.tx.send_replace(true);
    }

    pub fn resume(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Streaming body of an inbound request or response.
pub struct Body {
    inbound: Option<Inbound>,
    decoder: BodyDecoder,
    decompressor: Option<Decompressor>,
    trailers: HeaderSet,
    ended: bool,
    poisoned: bool,
    pause: PauseHandle,
    resumed: watch::Receiver<bool>,
    on_release: Option<oneshot::Sender<Released>>,
}

impl Body {
    pub(crate) fn new(
        inbound: Inbound,
        decoder: BodyDecoder,
        on_release: Option<oneshot::Sender<Released>>,
    ) -> Self {
        let (tx, resumed) = watch::channel(false);
        let mut body = Self {
            inbound: Some(inbound),
            decoder,
            decompressor: None,
            trailers: HeaderSet::new(),
            ended: false,
            poisoned: false,
            pause: PauseHandle { tx: Arc::new(tx) },
            resumed,
            on_release,
        };
        if body.decoder.is_finished() {
            body.release();
        }
        body
    }

    /// A body with no bytes and no connection behind it.
    pub fn empty() -> Self {
        let (tx, resumed) = watch::channel(false);
        Self {
            inbound: None,
            decoder: BodyDecoder::new(BodyKind::Empty),
            decompressor: None,
            trailers: HeaderSet::new(),
            ended: false,
            poisoned: false,
            pause: PauseHandle { tx: Arc::new(tx) },
            resumed,
            on_release: None,
        }
    }

    pub(crate) fn with_decompressor(mut self, decompressor: Decompressor) -> Self {
        self.decompressor = Some(decompressor);
        self
    }

    /// Next chunk of body bytes, or `None` once the body has ended.
    ///
    /// Waits while the body is paused.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        let mut resumed = self.resumed.clone();
        let _ = resumed.wait_for(|paused| !*paused).await;

        loop {
            if self.ended {
                return Ok(None);
            }
            let Some(inbound) = self.inbound.as_mut() else {
                return self.end();
            };

            let step = match self.decoder.decode(inbound.buffer_mut()) {
                Ok(step) => step,
                Err(err) => return Err(self.fail(err.into())),
            };
            match step {
                Decoded::Data(data) => {
                    let data = match self.decompressor.as_mut() {
                        Some(decompressor) => match decompressor.decompress(&data) {
                            Ok(out) => out,
                            Err(err) => return Err(self.fail(err.into())),
                        },
                        None => data,
                    };
                    if !data.is_empty() {
                        return Ok(Some(data));
                    }
                }
                Decoded::NeedMore => match inbound.fill().await {
                    Ok(0) => match self.decoder.decode_eof() {
                        Ok(Decoded::Done(trailers)) => {
                            self.trailers = trailers;
                            return self.end();
                        }
                        Ok(_) => {}
                        Err(err) => return Err(self.fail(err.into())),
                    },
                    Ok(_) => {}
                    Err(err) => return Err(self.fail(err.into())),
                },
                Decoded::Done(trailers) => {
                    self.trailers = trailers;
                    return self.end();
                }
            }
        }
    }

    /// Read the rest of the body into a `Buffer`.
    pub async fn buffer(&mut self) -> Result<Buffer> {
        let mut buffer = Buffer::new();
        while let Some(chunk) = self.chunk().await? {
            buffer.append_bytes(&chunk);
        }
        Ok(buffer)
    }

    /// Trailers received after a chunked body; empty until the body ends.
    pub fn trailers(&self) -> &HeaderSet {
        &self.trailers
    }

    /// Whether the end of the body has been delivered.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    fn end(&mut self) -> Result<Option<Bytes>> {
        self.ended = true;
        self.release();
        if let Some(decompressor) = self.decompressor.take() {
            let tail = decompressor.finish()?;
            if !tail.is_empty() {
                return Ok(Some(tail));
            }
        }
        Ok(None)
    }

    fn fail(&mut self, err: Error) -> Error {
        self.poisoned = true;
        self.ended = true;
        self.release();
        err
    }

    fn release(&mut self) {
        let Some(inbound) = self.inbound.take() else {
            return;
        };
        if let Some(tx) = self.on_release.take() {
            let decoder = std::mem::replace(&mut self.decoder, BodyDecoder::new(BodyKind::Empty));
            let _ = tx.send(Released {
                inbound,
                decoder,
                poisoned: self.poisoned,
            });
        }
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("ended", &self.ended)
            .field("paused", &self.is_paused())
            .field("attached", &self.inbound.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    use crate::net::Transport;

    async fn pipe() -> (Inbound, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (inbound, _outbound) = Transport::Plain(stream).split();
        (inbound, peer)
    }

    #[tokio::test]
    async fn reads_chunked_body_with_trailers() {
        let (inbound, mut peer) = pipe().await;
        peer.write_all(b"5\r\nhello\r\n6\r\n world\r\n0\r\nX-Sum: 11\r\n\r\n")
            .await
            .unwrap();

        let (tx, rx) = oneshot::channel();
        let mut body = Body::new(inbound, BodyDecoder::new(BodyKind::Chunked), Some(tx));
        let buffer = body.buffer().await.unwrap();

        assert_eq!(buffer.as_bytes(), b"hello world");
        assert_eq!(body.trailers().get("x-sum"), Some("11"));
        assert!(body.is_ended());
        assert!(body.chunk().await.unwrap().is_none());
        assert!(rx.await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn drop_returns_unfinished_decoder() {
        let (inbound, mut peer) = pipe().await;
        peer.write_all(b"abc").await.unwrap();

        let (tx, rx) = oneshot::channel();
        let mut body = Body::new(inbound, BodyDecoder::new(BodyKind::Length(10)), Some(tx));
        assert_eq!(body.chunk().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        drop(body);

        let released = rx.await.unwrap();
        assert!(!released.is_complete());
        assert!(!released.poisoned);
    }

    #[tokio::test]
    async fn early_close_is_an_error() {
        let (inbound, mut peer) = pipe().await;
        peer.write_all(b"abc").await.unwrap();
        drop(peer);

        let mut body = Body::new(inbound, BodyDecoder::new(BodyKind::Length(10)), None);
        assert!(body.chunk().await.unwrap().is_some());
        assert!(body.chunk().await.is_err());
    }

    #[tokio::test]
    async fn paused_body_delivers_nothing_until_resumed() {
        let (inbound, mut peer) = pipe().await;
        peer.write_all(b"data").await.unwrap();

        let mut body = Body::new(inbound, BodyDecoder::new(BodyKind::Length(4)), None);
        let handle = body.pause_handle();
        body.pause();
        assert!(handle.is_paused());

        let stalled = tokio::time::timeout(Duration::from_millis(50), body.chunk()).await;
        assert!(stalled.is_err());

        handle.resume();
        assert_eq!(body.chunk().await.unwrap().unwrap(), Bytes::from_static(b"data"));
        assert!(body.chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_body_ends_immediately() {
        let mut body = Body::empty();
        assert!(body.chunk().await.unwrap().is_none());
        assert!(body.trailers().is_empty());
    }
}
