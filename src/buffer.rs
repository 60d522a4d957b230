// src/buffer.rs

use std::{io::Cursor, sync::Arc};

use crate::fetch::RawPayload;

/// Seekable, read-only view over a fetched payload.
///
/// The bytes are shared with the payload and never mutated; every
/// [`reader`](PayloadBuffer::reader) starts at offset zero, so parsers can
/// re-read headers or a zip central directory without refetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadBuffer {
    bytes: Arc<[u8]>,
}

impl PayloadBuffer {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(self.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Up to the first `n` bytes, for format sniffing.
    pub fn head(&self, n: usize) -> &[u8] {
        &self.bytes[..n.min(self.bytes.len())]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&RawPayload> for PayloadBuffer {
    fn from(payload: &RawPayload) -> Self {
        Self {
            bytes: payload.shared_body(),
        }
    }
}
