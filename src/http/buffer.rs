//! Growable byte buffer.

use std::fmt;
use std::string::FromUtf8Error;

use bytes::{Bytes, BytesMut};

/// Mutable byte sequence used for bodies and body chunks.
///
/// `len()` counts bytes, so text outside the single-byte range grows the
/// buffer by its UTF-8 encoded size. Two buffers are equal iff their bytes are.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Buffer {
    bytes: BytesMut,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-filled buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self {
            bytes: BytesMut::zeroed(len),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
        }
    }

    pub fn append_buffer(&mut self, other: &Buffer) -> &mut Self {
        self.bytes.extend_from_slice(&other.bytes);
        self
    }

    pub fn append_str(&mut self, text: &str) -> &mut Self {
        self.bytes.extend_from_slice(text.as_bytes());
        self
    }

    pub fn append_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(data);
        self
    }

    /// Byte count.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get_byte(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode as UTF-8, failing on invalid sequences.
    pub fn to_utf8(&self) -> Result<String, FromUtf8Error> {
        String::from_utf8(self.bytes.to_vec())
    }

    /// Freeze into an immutable, cheaply cloneable chunk.
    pub fn freeze(self) -> Bytes {
        self.bytes.freeze()
    }
}

/// Lossy UTF-8 decoding.
impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("len", &self.bytes.len()).finish()
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&str> for Buffer {
    fn from(text: &str) -> Self {
        Self {
            bytes: BytesMut::from(text.as_bytes()),
        }
    }
}

impl From<String> for Buffer {
    fn from(text: String) -> Self {
        Self::from(text.into_bytes())
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Self {
            bytes: BytesMut::from(data),
        }
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            bytes: BytesMut::from(&data[..]),
        }
    }
}

impl From<Bytes> for Buffer {
    fn from(data: Bytes) -> Self {
        Self {
            bytes: BytesMut::from(&data[..]),
        }
    }
}

impl From<Buffer> for Bytes {
    fn from(buffer: Buffer) -> Self {
        buffer.freeze()
    }
}
