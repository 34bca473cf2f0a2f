//! HTTP/1.1 message framing.
//!
//! # Responsibilities
//! - Parse request/status lines and header blocks (via `httparse`)
//! - Decide how a message body is delimited
//! - Incrementally decode `Content-Length` and chunked bodies, trailers included
//! - Encode heads, chunks and the terminal chunk with trailers
//!
//! # Design Decisions
//! - Sans-io: every function works on a `BytesMut` read buffer or a `Vec<u8>`
//!   write buffer; the connection layer owns the sockets
//! - Decoding hands out slices of the read buffer without copying
//! - A partial head larger than the configured limit is a framing error

use std::io::Write;

use bytes::{Buf, Bytes, BytesMut};

use crate::http::headers::HeaderSet;
use crate::http::method::{Method, Version};

const MAX_HEADERS: usize = 100;
const CRLF: &[u8] = b"\r\n";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Parse(#[from] httparse::Error),

    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("invalid content length")]
    InvalidContentLength,

    #[error("unsupported transfer encoding")]
    UnsupportedTransferEncoding,

    #[error("invalid chunk size")]
    InvalidChunkSize,

    #[error("invalid chunk suffix")]
    InvalidChunkSuffix,

    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    #[error("connection closed before message was complete")]
    UnexpectedEof,
}

/// Parsed request line and header block.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request target exactly as received (origin or absolute form).
    pub target: String,
    pub version: Version,
    pub headers: HeaderSet,
}

/// Parsed status line and header block.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub version: Version,
    pub headers: HeaderSet,
}

pub(crate) fn collect_headers(raw: &[httparse::Header<'_>]) -> HeaderSet {
    raw.iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect()
}

/// Try to parse a request head from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; on success the head bytes
/// are consumed from `buf`.
pub fn parse_request_head(
    buf: &mut BytesMut,
    max_head_size: usize,
) -> Result<Option<RequestHead>, ProtocolError> {
    let (size, head) = {
        let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut raw);
        let size = match req.parse(&buf[..])? {
            httparse::Status::Complete(size) => size,
            httparse::Status::Partial => {
                if buf.len() > max_head_size {
                    return Err(ProtocolError::HeadTooLarge(max_head_size));
                }
                return Ok(None);
            }
        };

        let method = req.method.unwrap_or_default();
        let method: Method = method
            .parse()
            .map_err(|_| ProtocolError::InvalidMethod(method.to_string()))?;

        let head = RequestHead {
            method,
            target: req.path.unwrap_or("/").to_string(),
            version: Version::from_minor(req.version.unwrap_or(1)),
            headers: collect_headers(req.headers),
        };
        (size, head)
    };

    if size > max_head_size {
        return Err(ProtocolError::HeadTooLarge(max_head_size));
    }

    buf.advance(size);
    Ok(Some(head))
}

/// Try to parse a response head from the front of `buf`.
pub fn parse_response_head(
    buf: &mut BytesMut,
    max_head_size: usize,
) -> Result<Option<ResponseHead>, ProtocolError> {
    let (size, head) = {
        let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut raw);
        let size = match resp.parse(&buf[..])? {
            httparse::Status::Complete(size) => size,
            httparse::Status::Partial => {
                if buf.len() > max_head_size {
                    return Err(ProtocolError::HeadTooLarge(max_head_size));
                }
                return Ok(None);
            }
        };

        let head = ResponseHead {
            status: resp.code.unwrap_or(200),
            reason: resp.reason.unwrap_or("").to_string(),
            version: Version::from_minor(resp.version.unwrap_or(1)),
            headers: collect_headers(resp.headers),
        };
        (size, head)
    };

    buf.advance(size);
    Ok(Some(head))
}

/// How a message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
    /// Body runs until the peer closes (responses only).
    CloseDelimited,
}

fn content_length(headers: &HeaderSet) -> Result<Option<u64>, ProtocolError> {
    let mut length = None;
    for value in headers.get_all("content-length") {
        for part in value.split(',') {
            let parsed: u64 = part
                .trim()
                .parse()
                .map_err(|_| ProtocolError::InvalidContentLength)?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(ProtocolError::InvalidContentLength)
                }
                _ => length = Some(parsed),
            }
        }
    }
    Ok(length)
}

fn is_chunked(headers: &HeaderSet) -> Option<bool> {
    let codings = headers.get_all("transfer-encoding");
    if codings.is_empty() {
        return None;
    }
    let last = codings
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .last();
    Some(matches!(last, Some(c) if c.eq_ignore_ascii_case("chunked")))
}

/// Body framing of an inbound request.
pub fn request_body_kind(headers: &HeaderSet) -> Result<BodyKind, ProtocolError> {
    match is_chunked(headers) {
        Some(true) => return Ok(BodyKind::Chunked),
        Some(false) => return Err(ProtocolError::UnsupportedTransferEncoding),
        None => {}
    }
    Ok(match content_length(headers)? {
        Some(0) | None => BodyKind::Empty,
        Some(len) => BodyKind::Length(len),
    })
}

/// Body framing of an inbound response to a request made with `method`.
pub fn response_body_kind(
    method: &Method,
    status: u16,
    headers: &HeaderSet,
) -> Result<BodyKind, ProtocolError> {
    if *method == Method::Head
        || (*method == Method::Connect && (200..300).contains(&status))
        || (100..200).contains(&status)
        || status == 204
        || status == 304
    {
        return Ok(BodyKind::Empty);
    }
    match is_chunked(headers) {
        Some(true) => return Ok(BodyKind::Chunked),
        Some(false) => return Ok(BodyKind::CloseDelimited),
        None => {}
    }
    Ok(match content_length(headers)? {
        Some(0) => BodyKind::Empty,
        Some(len) => BodyKind::Length(len),
        None => BodyKind::CloseDelimited,
    })
}

/// Whether the connection may carry another message after this one.
///
/// A message framed by both `Transfer-Encoding` and `Content-Length` never
/// is: the length is ignored, but the peer may have meant otherwise.
pub fn is_keep_alive(version: Version, headers: &HeaderSet) -> bool {
    if headers.contains("transfer-encoding") && headers.contains("content-length") {
        return false;
    }
    match version {
        Version::Http11 => !headers.has_token("connection", "close"),
        Version::Http10 => headers.has_token("connection", "keep-alive"),
    }
}

/// Result of one decoding step.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Data(Bytes),
    NeedMore,
    /// Body complete; trailers are empty unless the body was chunked.
    Done(HeaderSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Length(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkCrlf,
    Trailers,
    UntilClose,
    Finished,
}

/// Incremental body decoder.
#[derive(Debug)]
pub struct BodyDecoder {
    state: DecodeState,
}

impl BodyDecoder {
    pub fn new(kind: BodyKind) -> Self {
        let state = match kind {
            BodyKind::Empty | BodyKind::Length(0) => DecodeState::Finished,
            BodyKind::Length(len) => DecodeState::Length(len),
            BodyKind::Chunked => DecodeState::ChunkSize,
            BodyKind::CloseDelimited => DecodeState::UntilClose,
        };
        Self { state }
    }

    pub fn is_finished(&self) -> bool {
        self.state == DecodeState::Finished
    }

    /// Consume as much of `buf` as forms the next body event.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Decoded, ProtocolError> {
        loop {
            match self.state {
                DecodeState::Finished => return Ok(Decoded::Done(HeaderSet::new())),
                DecodeState::Length(remaining) => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let take = remaining.min(buf.len() as u64);
                    let data = buf.split_to(take as usize).freeze();
                    let remaining = remaining - take;
                    self.state = if remaining == 0 {
                        DecodeState::Finished
                    } else {
                        DecodeState::Length(remaining)
                    };
                    return Ok(Decoded::Data(data));
                }
                DecodeState::UntilClose => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    return Ok(Decoded::Data(buf.split().freeze()));
                }
                DecodeState::ChunkSize => match httparse::parse_chunk_size(&buf[..]) {
                    Ok(httparse::Status::Complete((pos, size))) => {
                        buf.advance(pos);
                        self.state = if size == 0 {
                            DecodeState::Trailers
                        } else {
                            DecodeState::ChunkData(size)
                        };
                    }
                    Ok(httparse::Status::Partial) => return Ok(Decoded::NeedMore),
                    Err(_) => return Err(ProtocolError::InvalidChunkSize),
                },
                DecodeState::ChunkData(remaining) => {
                    if buf.is_empty() {
                        return Ok(Decoded::NeedMore);
                    }
                    let take = remaining.min(buf.len() as u64);
                    let data = buf.split_to(take as usize).freeze();
                    let remaining = remaining - take;
                    self.state = if remaining == 0 {
                        DecodeState::ChunkCrlf
                    } else {
                        DecodeState::ChunkData(remaining)
                    };
                    return Ok(Decoded::Data(data));
                }
                DecodeState::ChunkCrlf => {
                    if buf.len() < 2 {
                        return Ok(Decoded::NeedMore);
                    }
                    if &buf[..2] != CRLF {
                        return Err(ProtocolError::InvalidChunkSuffix);
                    }
                    buf.advance(2);
                    self.state = DecodeState::ChunkSize;
                }
                DecodeState::Trailers => {
                    let (pos, trailers) = {
                        let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
                        match httparse::parse_headers(&buf[..], &mut raw)? {
                            httparse::Status::Complete((pos, parsed)) => {
                                (pos, collect_headers(parsed))
                            }
                            httparse::Status::Partial => return Ok(Decoded::NeedMore),
                        }
                    };
                    buf.advance(pos);
                    self.state = DecodeState::Finished;
                    return Ok(Decoded::Done(trailers));
                }
            }
        }
    }

    /// The peer closed the stream; only close-delimited bodies end cleanly.
    pub fn decode_eof(&mut self) -> Result<Decoded, ProtocolError> {
        match self.state {
            DecodeState::UntilClose | DecodeState::Finished => {
                self.state = DecodeState::Finished;
                Ok(Decoded::Done(HeaderSet::new()))
            }
            _ => Err(ProtocolError::UnexpectedEof),
        }
    }
}

fn write_header_lines(dst: &mut Vec<u8>, headers: &HeaderSet) -> Result<(), ProtocolError> {
    for (name, value) in headers {
        let bad_name = name.is_empty()
            || name
                .bytes()
                .any(|b| b == b':' || b.is_ascii_whitespace() || b.is_ascii_control());
        if bad_name {
            return Err(ProtocolError::InvalidHeader(name.to_string()));
        }
        if value.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(ProtocolError::InvalidHeader(name.to_string()));
        }
        dst.extend_from_slice(name.as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(CRLF);
    }
    Ok(())
}

pub fn encode_request_head(
    dst: &mut Vec<u8>,
    method: &Method,
    target: &str,
    headers: &HeaderSet,
) -> Result<(), ProtocolError> {
    if target.bytes().any(|b| b == b' ' || b.is_ascii_control()) {
        return Err(ProtocolError::InvalidHeader(target.to_string()));
    }
    dst.extend_from_slice(method.as_str().as_bytes());
    dst.push(b' ');
    dst.extend_from_slice(target.as_bytes());
    dst.extend_from_slice(b" HTTP/1.1\r\n");
    write_header_lines(dst, headers)?;
    dst.extend_from_slice(CRLF);
    Ok(())
}

pub fn encode_response_head(
    dst: &mut Vec<u8>,
    version: Version,
    status: u16,
    reason: &str,
    headers: &HeaderSet,
) -> Result<(), ProtocolError> {
    if reason.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(ProtocolError::InvalidHeader(reason.to_string()));
    }
    // writing into a Vec cannot fail
    let _ = write!(dst, "{} {} {}\r\n", version.as_str(), status, reason);
    write_header_lines(dst, headers)?;
    dst.extend_from_slice(CRLF);
    Ok(())
}

/// Append one chunk. Empty input writes nothing so it cannot end the body.
pub fn encode_chunk(dst: &mut Vec<u8>, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    let _ = write!(dst, "{:x}\r\n", data.len());
    dst.extend_from_slice(data);
    dst.extend_from_slice(CRLF);
}

/// Append the terminal chunk followed by trailers.
pub fn encode_last_chunk(dst: &mut Vec<u8>, trailers: &HeaderSet) -> Result<(), ProtocolError> {
    dst.extend_from_slice(b"0\r\n");
    write_header_lines(dst, trailers)?;
    dst.extend_from_slice(CRLF);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut BodyDecoder, buf: &mut BytesMut) -> (Vec<u8>, Option<HeaderSet>) {
        let mut body = Vec::new();
        loop {
            match decoder.decode(buf).unwrap() {
                Decoded::Data(data) => body.extend_from_slice(&data),
                Decoded::NeedMore => return (body, None),
                Decoded::Done(trailers) => return (body, Some(trailers)),
            }
        }
    }

    #[test]
    fn request_head_waits_for_blank_line() {
        let mut buf = BytesMut::from(&b"GET /foo?a=1 HTTP/1.1\r\nHost: x\r\n"[..]);
        assert!(parse_request_head(&mut buf, 8192).unwrap().is_none());

        buf.extend_from_slice(b"\r\nrest");
        let head = parse_request_head(&mut buf, 8192).unwrap().unwrap();
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.target, "/foo?a=1");
        assert_eq!(head.version, Version::Http11);
        assert_eq!(head.headers.get("host"), Some("x"));
        assert_eq!(&buf[..], b"rest");
    }

    #[test]
    fn custom_methods_parse() {
        let mut buf = BytesMut::from(&b"PURGE /cache HTTP/1.1\r\n\r\n"[..]);
        let head = parse_request_head(&mut buf, 8192).unwrap().unwrap();
        assert_eq!(head.method, Method::Other("PURGE".into()));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nX-Long: "[..]);
        buf.extend_from_slice(&[b'a'; 200]);
        assert!(matches!(
            parse_request_head(&mut buf, 64),
            Err(ProtocolError::HeadTooLarge(64))
        ));
    }

    #[test]
    fn malformed_request_line_is_an_error() {
        let mut buf = BytesMut::from(&b"GET\x01 / HTTP/1.1\r\n\r\n"[..]);
        assert!(parse_request_head(&mut buf, 8192).is_err());
    }

    #[test]
    fn chunked_body_split_across_reads() {
        let wire = b"5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nTrailer1: v1\r\ntrailer2: v2\r\n\r\n";
        let mut decoder = BodyDecoder::new(BodyKind::Chunked);
        let mut buf = BytesMut::new();
        let mut body = Vec::new();
        let mut trailers = None;

        for byte in wire.iter() {
            buf.extend_from_slice(&[*byte]);
            let (data, done) = decode_all(&mut decoder, &mut buf);
            body.extend_from_slice(&data);
            if done.is_some() {
                trailers = done;
            }
        }

        assert_eq!(body, b"hello world");
        let trailers = trailers.unwrap();
        assert_eq!(trailers.get("trailer1"), Some("v1"));
        assert_eq!(trailers.get("TRAILER2"), Some("v2"));
        assert!(decoder.is_finished());
    }

    #[test]
    fn bad_chunk_syntax_fails() {
        let mut decoder = BodyDecoder::new(BodyKind::Chunked);
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(ProtocolError::InvalidChunkSize)));

        let mut decoder = BodyDecoder::new(BodyKind::Chunked);
        let mut buf = BytesMut::from(&b"1\r\naXX"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Decoded::Data(Bytes::from_static(b"a")));
        assert!(matches!(decoder.decode(&mut buf), Err(ProtocolError::InvalidChunkSuffix)));
    }

    #[test]
    fn length_body_leaves_pipelined_bytes() {
        let mut decoder = BodyDecoder::new(BodyKind::Length(3));
        let mut buf = BytesMut::from(&b"abcGET"[..]);
        let (body, done) = decode_all(&mut decoder, &mut buf);
        assert_eq!(body, b"abc");
        assert!(done.unwrap().is_empty());
        assert_eq!(&buf[..], b"GET");
    }

    #[test]
    fn eof_ends_only_close_delimited_bodies() {
        let mut decoder = BodyDecoder::new(BodyKind::CloseDelimited);
        assert!(matches!(decoder.decode_eof(), Ok(Decoded::Done(_))));

        let mut decoder = BodyDecoder::new(BodyKind::Length(10));
        assert!(matches!(decoder.decode_eof(), Err(ProtocolError::UnexpectedEof)));
    }

    #[test]
    fn body_kinds() {
        let mut headers = HeaderSet::new();
        assert_eq!(request_body_kind(&headers).unwrap(), BodyKind::Empty);

        headers.set("Content-Length", "12");
        assert_eq!(request_body_kind(&headers).unwrap(), BodyKind::Length(12));
        assert_eq!(
            response_body_kind(&Method::Head, 200, &headers).unwrap(),
            BodyKind::Empty
        );
        assert_eq!(
            response_body_kind(&Method::Connect, 200, &headers).unwrap(),
            BodyKind::Empty
        );

        headers.add("Content-Length", "13");
        assert!(request_body_kind(&headers).is_err());

        let mut headers = HeaderSet::new();
        headers.set("Transfer-Encoding", "gzip, chunked");
        assert_eq!(request_body_kind(&headers).unwrap(), BodyKind::Chunked);
        headers.set("Transfer-Encoding", "gzip");
        assert!(request_body_kind(&headers).is_err());
        assert_eq!(
            response_body_kind(&Method::Get, 200, &HeaderSet::new()).unwrap(),
            BodyKind::CloseDelimited
        );
    }

    #[test]
    fn encodes_chunks_and_trailers() {
        let mut out = Vec::new();
        encode_chunk(&mut out, b"hello");
        encode_chunk(&mut out, b"");
        let mut trailers = HeaderSet::new();
        trailers.set("trailer1", "vtrailer1");
        encode_last_chunk(&mut out, &trailers).unwrap();
        assert_eq!(out, b"5\r\nhello\r\n0\r\ntrailer1: vtrailer1\r\n\r\n");
    }

    #[test]
    fn header_injection_is_refused() {
        let mut headers = HeaderSet::new();
        headers.set("x", "a\r\nEvil: 1");
        let mut out = Vec::new();
        assert!(encode_response_head(&mut out, Version::Http11, 200, "OK", &headers).is_err());
    }

    #[test]
    fn keep_alive_rules() {
        let mut headers = HeaderSet::new();
        assert!(is_keep_alive(Version::Http11, &headers));
        assert!(!is_keep_alive(Version::Http10, &headers));
        headers.set("Connection", "close");
        assert!(!is_keep_alive(Version::Http11, &headers));
    }

    #[test]
    fn chunked_with_content_length_closes() {
        let mut headers = HeaderSet::new();
        headers
            .set("Transfer-Encoding", "chunked")
            .set("Content-Length", "5");
        assert_eq!(request_body_kind(&headers).unwrap(), BodyKind::Chunked);
        assert!(!is_keep_alive(Version::Http11, &headers));
    }
}
