//! Content-coding negotiation and streaming (de)compression.
//!
//! # Design Decisions
//! - Only `gzip` and `deflate`; gzip wins when both are acceptable
//! - Encoders/decoders write into an owned `Vec` that is drained after every
//!   chunk, so compressed bytes stream out as the body is produced

use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::http::headers::HeaderSet;

/// Value a client sends in `Accept-Encoding` when it tries compression.
pub const ACCEPT_ENCODING: &str = "gzip, deflate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Gzip,
    Deflate,
}

impl ContentCoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
        }
    }

    /// Pick a coding the peer accepts, honoring `q=0` exclusions.
    pub fn negotiate(request_headers: &HeaderSet) -> Option<ContentCoding> {
        let mut gzip = false;
        let mut deflate = false;
        for value in request_headers.get_all("accept-encoding") {
            for entry in value.split(',') {
                let mut params = entry.split(';');
                let coding = params.next().unwrap_or("").trim();
                let refused = params.any(|p| {
                    let p = p.trim();
                    p.eq_ignore_ascii_case("q=0") || p.eq_ignore_ascii_case("q=0.0")
                });
                if refused {
                    continue;
                }
                if coding.eq_ignore_ascii_case("gzip") || coding == "*" {
                    gzip = true;
                } else if coding.eq_ignore_ascii_case("deflate") {
                    deflate = true;
                }
            }
        }
        if gzip {
            Some(ContentCoding::Gzip)
        } else if deflate {
            Some(ContentCoding::Deflate)
        } else {
            None
        }
    }

    /// Coding named by a message's `Content-Encoding` header, if supported.
    pub fn from_content_encoding(headers: &HeaderSet) -> Option<ContentCoding> {
        match headers.get("content-encoding").map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip") => {
                Some(ContentCoding::Gzip)
            }
            Some(v) if v.eq_ignore_ascii_case("deflate") => Some(ContentCoding::Deflate),
            _ => None,
        }
    }
}

/// Streaming body compressor.
pub enum Compressor {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
}

impl Compressor {
    pub fn new(coding: ContentCoding) -> Self {
        match coding {
            ContentCoding::Gzip => Compressor::Gzip(GzEncoder::new(Vec::new(), Compression::default())),
            ContentCoding::Deflate => {
                Compressor::Deflate(ZlibEncoder::new(Vec::new(), Compression::default()))
            }
        }
    }

    /// Compress `data`, returning whatever output is ready.
    pub fn compress(&mut self, data: &[u8]) -> io::Result<Bytes> {
        match self {
            Compressor::Gzip(enc) => {
                enc.write_all(data)?;
                enc.flush()?;
                Ok(Bytes::from(std::mem::take(enc.get_mut())))
            }
            Compressor::Deflate(enc) => {
                enc.write_all(data)?;
                enc.flush()?;
                Ok(Bytes::from(std::mem::take(enc.get_mut())))
            }
        }
    }

    /// Flush the stream footer.
    pub fn finish(self) -> io::Result<Bytes> {
        match self {
            Compressor::Gzip(enc) => enc.finish().map(Bytes::from),
            Compressor::Deflate(enc) => enc.finish().map(Bytes::from),
        }
    }
}

/// Streaming body decompressor.
pub enum Decompressor {
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

impl Decompressor {
    pub fn new(coding: ContentCoding) -> Self {
        match coding {
            ContentCoding::Gzip => Decompressor::Gzip(GzDecoder::new(Vec::new())),
            ContentCoding::Deflate => Decompressor::Deflate(ZlibDecoder::new(Vec::new())),
        }
    }

    pub fn decompress(&mut self, data: &[u8]) -> io::Result<Bytes> {
        match self {
            Decompressor::Gzip(dec) => {
                dec.write_all(data)?;
                Ok(Bytes::from(std::mem::take(dec.get_mut())))
            }
            Decompressor::Deflate(dec) => {
                dec.write_all(data)?;
                Ok(Bytes::from(std::mem::take(dec.get_mut())))
            }
        }
    }

    pub fn finish(self) -> io::Result<Bytes> {
        match self {
            Decompressor::Gzip(dec) => dec.finish().map(Bytes::from),
            Decompressor::Deflate(dec) => dec.finish().map(Bytes::from),
        }
    }
}
