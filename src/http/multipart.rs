//! Form body decoding: `multipart/form-data` and
//! `application/x-www-form-urlencoded`.
//!
//! # Responsibilities
//! - Find part boundaries incrementally, across arbitrary chunk splits
//! - Surface file parts as streams and collect scalar fields as attributes
//! - Decode url-encoded bodies into attributes
//!
//! # Design Decisions
//! - `MultipartParser` is sans-io: bytes are pushed in, events are pulled
//!   out, and it only retains enough input to recognise the next boundary
//! - `FormStream` drives the parser from a `Body`, so a file part is read
//!   from the socket only as its consumer asks for it

use bytes::{Buf, Bytes, BytesMut};
use memchr::memmem;

use crate::error::Result;
use crate::http::body::Body;
use crate::http::codec::collect_headers;
use crate::http::headers::HeaderSet;

const MAX_PART_HEADERS: usize = 8 * 1024;
const MAX_ATTRIBUTE_SIZE: usize = 64 * 1024;
const MAX_URLENCODED_SIZE: usize = 1024 * 1024;
const MAX_PART_HEADER_COUNT: usize = 32;

const DEFAULT_PART_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    #[error("multipart content type has no boundary")]
    MissingBoundary,

    #[error("malformed part headers: {0}")]
    MalformedPartHeaders(#[from] httparse::Error),

    #[error("part has no form-data content disposition")]
    MissingContentDisposition,

    #[error("body ended before the closing boundary")]
    UnexpectedEnd,

    #[error("unexpected bytes after boundary delimiter")]
    MalformedDelimiter,

    #[error("part headers too large")]
    PartHeadersTooLarge,

    #[error("form field exceeds {0} bytes")]
    FieldTooLarge(usize),
}

/// Form encodings understood by `FormStream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEncoding {
    Multipart { boundary: String },
    UrlEncoded,
}

impl FormEncoding {
    /// Recognise a form body from its `Content-Type` value.
    pub fn from_content_type(content_type: &str) -> std::result::Result<Option<Self>, MultipartError> {
        let (mime, params) = split_header_params(content_type);
        if mime.eq_ignore_ascii_case("multipart/form-data") {
            let boundary = params
                .into_iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("boundary"))
                .map(|(_, v)| v)
                .filter(|b| !b.is_empty())
                .ok_or(MultipartError::MissingBoundary)?;
            return Ok(Some(FormEncoding::Multipart { boundary }));
        }
        if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            return Ok(Some(FormEncoding::UrlEncoded));
        }
        Ok(None)
    }
}

/// Split `value; k=v; k2="v 2"` into the leading value and its parameters.
pub fn split_header_params(value: &str) -> (String, Vec<(String, String)>) {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    let mut segments = segments.into_iter();
    let head = segments.next().unwrap_or_default().trim().to_string();
    let params = segments
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect();
    (head, params)
}

/// Descriptor of one multipart part.
#[derive(Debug, Clone)]
pub struct PartInfo {
    pub name: String,
    /// Present for file parts.
    pub filename: Option<String>,
    pub content_type: String,
    pub headers: HeaderSet,
}

impl PartInfo {
    fn from_headers(headers: HeaderSet) -> std::result::Result<Self, MultipartError> {
        let disposition = headers
            .get("content-disposition")
            .ok_or(MultipartError::MissingContentDisposition)?;
        let (kind, params) = split_header_params(disposition);
        if !kind.eq_ignore_ascii_case("form-data") {
            return Err(MultipartError::MissingContentDisposition);
        }
        let mut name = None;
        let mut filename = None;
        for (key, value) in params {
            if key.eq_ignore_ascii_case("name") {
                name = Some(value);
            } else if key.eq_ignore_ascii_case("filename") {
                filename = Some(value);
            }
        }
        let name = name.ok_or(MultipartError::MissingContentDisposition)?;
        let content_type = headers
            .get("content-type")
            .unwrap_or(DEFAULT_PART_CONTENT_TYPE)
            .to_string();
        Ok(Self {
            name,
            filename,
            content_type,
            headers,
        })
    }
}

/// Parser output.
#[derive(Debug)]
pub enum Event {
    PartStart(PartInfo),
    Data(Bytes),
    PartEnd,
    /// Closing boundary seen; anything after it is ignored.
    Finished,
    NeedMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    AfterDelimiter,
    PartHeaders,
    PartBody,
    End,
}

/// Incremental multipart/form-data parser.
pub struct MultipartParser {
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    buf: BytesMut,
    state: State,
    received: bool,
    eof: bool,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());
        // The first delimiter has no preceding line break.
        let mut buf = BytesMut::with_capacity(4096);
        buf.extend_from_slice(b"\r\n");
        Self {
            delimiter,
            buf,
            state: State::Preamble,
            received: false,
            eof: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        if !data.is_empty() && self.state != State::End {
            self.received = true;
            self.buf.extend_from_slice(data);
        }
    }

    /// No more input will be pushed.
    pub fn finish_input(&mut self) {
        self.eof = true;
    }

    pub fn next_event(&mut self) -> std::result::Result<Event, MultipartError> {
        loop {
            match self.state {
                State::End => return Ok(Event::Finished),
                State::Preamble => match memmem::find(&self.buf, &self.delimiter) {
                    Some(at) => {
                        self.buf.advance(at + self.delimiter.len());
                        self.state = State::AfterDelimiter;
                    }
                    None => {
                        if self.eof {
                            if !self.received {
                                self.state = State::End;
                                continue;
                            }
                            return Err(MultipartError::UnexpectedEnd);
                        }
                        let keep = self.delimiter.len() - 1;
                        if self.buf.len() > keep {
                            self.buf.advance(self.buf.len() - keep);
                        }
                        return Ok(Event::NeedMore);
                    }
                },
                State::AfterDelimiter => {
                    if self.buf.starts_with(b"--") {
                        self.buf.clear();
                        self.state = State::End;
                        continue;
                    }
                    if self.buf[..] == *b"-" {
                        return self.need_more();
                    }
                    // Only linear whitespace may follow a delimiter.
                    let padding = self
                        .buf
                        .iter()
                        .take_while(|b| matches!(b, b' ' | b'\t'))
                        .count();
                    match &self.buf[padding..] {
                        [b'\r', b'\n', ..] => {
                            self.buf.advance(padding + 2);
                            self.state = State::PartHeaders;
                        }
                        [] | [b'\r'] => return self.need_more(),
                        _ => return Err(MultipartError::MalformedDelimiter),
                    }
                }
                State::PartHeaders => {
                    let parsed = {
                        let mut raw = [httparse::EMPTY_HEADER; MAX_PART_HEADER_COUNT];
                        match httparse::parse_headers(&self.buf[..], &mut raw)? {
                            httparse::Status::Complete((pos, headers)) => {
                                Some((pos, collect_headers(headers)))
                            }
                            httparse::Status::Partial => None,
                        }
                    };
                    match parsed {
                        Some((pos, headers)) => {
                            self.buf.advance(pos);
                            let info = PartInfo::from_headers(headers)?;
                            self.state = State::PartBody;
                            return Ok(Event::PartStart(info));
                        }
                        None => {
                            if self.buf.len() > MAX_PART_HEADERS {
                                return Err(MultipartError::PartHeadersTooLarge);
                            }
                            return self.need_more();
                        }
                    }
                }
                State::PartBody => match memmem::find(&self.buf, &self.delimiter) {
                    Some(0) => {
                        self.buf.advance(self.delimiter.len());
                        self.state = State::AfterDelimiter;
                        return Ok(Event::PartEnd);
                    }
                    Some(at) => return Ok(Event::Data(self.buf.split_to(at).freeze())),
                    None => {
                        // A delimiter may be split across pushes.
                        let safe = self.buf.len().saturating_sub(self.delimiter.len() - 1);
                        if safe > 0 {
                            return Ok(Event::Data(self.buf.split_to(safe).freeze()));
                        }
                        return self.need_more();
                    }
                },
            }
        }
    }

    fn need_more(&self) -> std::result::Result<Event, MultipartError> {
        if self.eof {
            Err(MultipartError::UnexpectedEnd)
        } else {
            Ok(Event::NeedMore)
        }
    }
}

enum Decoder {
    Multipart(MultipartParser),
    UrlEncoded,
}

enum Cursor {
    Idle,
    /// A file part was handed out and may have unread data.
    InUpload,
    Field { name: String, value: Vec<u8> },
    Done,
}

/// Form decoder driving a request body.
///
/// File parts are yielded by `next_upload`; scalar fields are collected
/// and available from `attributes` once the body has been consumed.
pub struct FormStream {
    body: Body,
    decoder: Decoder,
    cursor: Cursor,
    attributes: Vec<(String, String)>,
}

impl FormStream {
    pub fn new(body: Body, encoding: FormEncoding) -> Self {
        let decoder = match encoding {
            FormEncoding::Multipart { boundary } => Decoder::Multipart(MultipartParser::new(&boundary)),
            FormEncoding::UrlEncoded => Decoder::UrlEncoded,
        };
        Self {
            body,
            decoder,
            cursor: Cursor::Idle,
            attributes: Vec::new(),
        }
    }

    /// Next file part, skipping whatever the previous one left unread.
    pub async fn next_upload(&mut self) -> Result<Option<Upload<'_>>> {
        if matches!(self.decoder, Decoder::UrlEncoded) {
            self.read_urlencoded().await?;
            return Ok(None);
        }
        loop {
            if matches!(self.cursor, Cursor::Done) {
                return Ok(None);
            }
            match self.next_event().await? {
                Event::PartStart(info) => {
                    if info.filename.is_some() {
                        self.cursor = Cursor::InUpload;
                        tracing::debug!(
                            name = %info.name,
                            content_type = %info.content_type,
                            "Upload part started"
                        );
                        return Ok(Some(Upload {
                            form: self,
                            info,
                            ended: false,
                        }));
                    }
                    self.cursor = Cursor::Field {
                        name: info.name,
                        value: Vec::new(),
                    };
                }
                Event::Data(data) => {
                    if let Cursor::Field { value, .. } = &mut self.cursor {
                        if value.len() + data.len() > MAX_ATTRIBUTE_SIZE {
                            return Err(MultipartError::FieldTooLarge(MAX_ATTRIBUTE_SIZE).into());
                        }
                        value.extend_from_slice(&data);
                    }
                }
                Event::PartEnd => {
                    if let Cursor::Field { name, value } =
                        std::mem::replace(&mut self.cursor, Cursor::Idle)
                    {
                        self.attributes
                            .push((name, String::from_utf8_lossy(&value).into_owned()));
                    }
                }
                Event::Finished => self.cursor = Cursor::Done,
                Event::NeedMore => {}
            }
        }
    }

    /// Scalar fields decoded so far, in arrival order.
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Consume the rest of the body and return every scalar field.
    pub async fn finish(mut self) -> Result<Vec<(String, String)>> {
        while self.next_upload().await?.is_some() {}
        Ok(self.attributes)
    }

    async fn read_urlencoded(&mut self) -> Result<()> {
        if matches!(self.cursor, Cursor::Done) {
            return Ok(());
        }
        let mut raw = Vec::new();
        while let Some(chunk) = self.body.chunk().await? {
            if raw.len() + chunk.len() > MAX_URLENCODED_SIZE {
                return Err(MultipartError::FieldTooLarge(MAX_URLENCODED_SIZE).into());
            }
            raw.extend_from_slice(&chunk);
        }
        self.attributes
            .extend(url::form_urlencoded::parse(&raw).into_owned());
        self.cursor = Cursor::Done;
        Ok(())
    }

    /// Next parser event, reading from the body whenever the parser needs
    /// more input. Never returns `NeedMore`.
    async fn next_event(&mut self) -> Result<Event> {
        let Decoder::Multipart(parser) = &mut self.decoder else {
            return Ok(Event::Finished);
        };
        loop {
            match parser.next_event()? {
                Event::NeedMore => match self.body.chunk().await? {
                    Some(data) => parser.push(&data),
                    None => parser.finish_input(),
                },
                event => return Ok(event),
            }
        }
    }
}

/// A file part being streamed out of a multipart body.
pub struct Upload<'a> {
    form: &'a mut FormStream,
    info: PartInfo,
    ended: bool,
}

impl Upload<'_> {
    /// Form field name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn filename(&self) -> &str {
        self.info.filename.as_deref().unwrap_or_default()
    }

    pub fn content_type(&self) -> &str {
        &self.info.content_type
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.info.headers
    }

    /// Next chunk of this part's bytes, or `None` at the end of the part.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if self.ended {
            return Ok(None);
        }
        match self.form.next_event().await? {
            Event::Data(data) => Ok(Some(data)),
            _ => {
                self.ended = true;
                self.form.cursor = Cursor::Idle;
                Ok(None)
            }
        }
    }

    /// Read the rest of the part.
    pub async fn buffer(&mut self) -> Result<crate::http::buffer::Buffer> {
        let mut buffer = crate::http::buffer::Buffer::new();
        while let Some(chunk) = self.chunk().await? {
            buffer.append_bytes(&chunk);
        }
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(parser: &mut MultipartParser) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            match parser.next_event().unwrap() {
                Event::PartStart(info) => out.push(format!(
                    "start {} {:?} {}",
                    info.name, info.filename, info.content_type
                )),
                Event::Data(data) => out.push(format!("data {}", String::from_utf8_lossy(&data))),
                Event::PartEnd => out.push("end".into()),
                Event::Finished => {
                    out.push("finished".into());
                    return out;
                }
                Event::NeedMore => return out,
            }
        }
    }

    fn coalesce(events: Vec<String>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for event in events {
            if let (Some(last), Some(data)) = (out.last_mut(), event.strip_prefix("data ")) {
                if last.starts_with("data ") {
                    last.push_str(data);
                    continue;
                }
            }
            out.push(event);
        }
        out
    }

    const BODY: &str = "--XyZ\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"tmp-0.txt\"\r\n\
        Content-Type: image/gif\r\n\
        \r\n\
        Vert.x rocks!\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"note\"\r\n\
        \r\n\
        a\r\nb\r\n\
        --XyZ--\r\n";

    fn expected() -> Vec<String> {
        vec![
            "start file Some(\"tmp-0.txt\") image/gif".to_string(),
            "data Vert.x rocks!".to_string(),
            "end".to_string(),
            "start note None application/octet-stream".to_string(),
            "data a\r\nb".to_string(),
            "end".to_string(),
            "finished".to_string(),
        ]
    }

    #[test]
    fn parses_whole_body() {
        let mut parser = MultipartParser::new("XyZ");
        parser.push(BODY.as_bytes());
        parser.finish_input();
        assert_eq!(coalesce(drain(&mut parser)), expected());
    }

    #[test]
    fn parses_byte_at_a_time() {
        let mut parser = MultipartParser::new("XyZ");
        let mut events = Vec::new();
        for byte in BODY.as_bytes() {
            parser.push(std::slice::from_ref(byte));
            events.extend(drain(&mut parser));
        }
        parser.finish_input();
        events.extend(drain(&mut parser));
        events.dedup_by(|a, b| a == "finished" && b == "finished");
        assert_eq!(coalesce(events), expected());
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut parser = MultipartParser::new("XyZ");
        parser.push(&BODY.as_bytes()[..60]);
        parser.finish_input();
        let err = loop {
            match parser.next_event() {
                Ok(Event::Finished) => panic!("truncated body finished"),
                Ok(_) => continue,
                Err(err) => break err,
            }
        };
        assert!(matches!(err, MultipartError::UnexpectedEnd));
    }

    #[test]
    fn empty_body_is_an_empty_form() {
        let mut parser = MultipartParser::new("XyZ");
        parser.finish_input();
        assert!(matches!(parser.next_event().unwrap(), Event::Finished));
    }

    #[test]
    fn part_without_disposition_is_rejected() {
        let mut parser = MultipartParser::new("b");
        parser.push(b"--b\r\nContent-Type: text/plain\r\n\r\nx\r\n--b--");
        assert!(matches!(
            parser.next_event(),
            Err(MultipartError::MissingContentDisposition)
        ));
    }

    #[test]
    fn delimiter_allows_trailing_whitespace_only() {
        let mut parser = MultipartParser::new("XyZ");
        parser.push(b"--XyZ \t\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--XyZ--");
        parser.finish_input();
        assert_eq!(
            coalesce(drain(&mut parser)),
            vec!["start a None application/octet-stream", "data 1", "end", "finished"]
        );

        let mut parser = MultipartParser::new("XyZ");
        parser.push(b"--XyZgarbage\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--XyZ--");
        assert!(matches!(
            parser.next_event(),
            Err(MultipartError::MalformedDelimiter)
        ));
    }

    #[test]
    fn recognises_form_content_types() {
        assert_eq!(
            FormEncoding::from_content_type("multipart/form-data; boundary=\"a b\"").unwrap(),
            Some(FormEncoding::Multipart {
                boundary: "a b".into()
            })
        );
        assert_eq!(
            FormEncoding::from_content_type("application/x-www-form-urlencoded; charset=utf-8")
                .unwrap(),
            Some(FormEncoding::UrlEncoded)
        );
        assert_eq!(FormEncoding::from_content_type("text/plain").unwrap(), None);
        assert!(matches!(
            FormEncoding::from_content_type("multipart/form-data"),
            Err(MultipartError::MissingBoundary)
        ));
    }

    #[test]
    fn header_params_respect_quotes() {
        let (head, params) =
            split_header_params(r#"form-data; name="a;b"; filename="x \"y\".txt""#);
        assert_eq!(head, "form-data");
        assert_eq!(
            params,
            vec![
                ("name".to_string(), "a;b".to_string()),
                ("filename".to_string(), "x \"y\".txt".to_string()),
            ]
        );
    }
}
