//! Frame data structures

use bytes::Bytes;
use std::time::Instant;

/// A compressed frame with its publish metadata
///
/// The payload is an opaque byte blob (normally a JPEG image). Cloning is
/// cheap: the bytes are reference counted and never copied.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Compressed frame data
    data: Bytes,
    /// Version assigned by the buffer on publish (0 = not yet published)
    pub version: u64,
    /// Timestamp assigned by the producer
    pub capture_ts: Instant,
}

impl Frame {
    /// Create a new, unpublished frame
    pub fn new(data: Bytes, capture_ts: Instant) -> Self {
        Self {
            data,
            version: 0,
            capture_ts,
        }
    }

    /// Create a frame from a Vec<u8>, stamped now
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data), Instant::now())
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get data length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if frame is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if the payload starts with a JPEG SOI marker
    pub fn has_jpeg_header(&self) -> bool {
        self.data.len() >= 2 && self.data[0] == 0xFF && self.data[1] == 0xD8
    }
}
