//! # ResyncBuffer - Streaming Buffer with Frame Resynchronization
//!
//! This module provides the byte accumulator the link driver reads into.
//! Serial data from the Module M arrives in arbitrary chunks, possibly with
//! boot noise or a partial frame left over from the previous cycle, so the
//! buffer supports dropping leading garbage until a frame-start marker is
//! found while leaving everything after the marker untouched.
//!
//! Consuming from the front advances a cursor inside a `BytesMut` rather than
//! reslicing into fresh allocations, which keeps the per-tick hot path
//! allocation-free.
//!
//! ## Usage
//!
//! ```rust
//! use modulem_rs::link::buffer::ResyncBuffer;
//!
//! let mut buffer = ResyncBuffer::new();
//! buffer.write(&[0x05, 0x07, 0x2A, b'C']);
//! buffer.trim_to_marker();
//! assert_eq!(buffer.as_slice(), &[0x2A, b'C']);
//! ```

use crate::constants::FRAME_MARKER;
use bytes::{Buf, BytesMut};

/// Append-only byte accumulator with consume-from-front semantics.
///
/// Garbage in front of the frame marker is dropped silently; the caller is
/// responsible for logging discards if it cares.
#[derive(Debug, Default)]
pub struct ResyncBuffer {
    data: BytesMut,
}

impl ResyncBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
        }
    }

    /// Create an empty buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Append newly read bytes to the tail.
    pub fn write(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Drop leading bytes until the buffer is empty or starts with the frame
    /// marker. A lone trailing non-marker byte is dropped as well, since a
    /// single byte that is not the marker cannot begin a frame.
    ///
    /// Returns the number of bytes discarded.
    pub fn trim_to_marker(&mut self) -> usize {
        let skip = self
            .data
            .iter()
            .position(|&b| b == FRAME_MARKER)
            .unwrap_or(self.data.len());
        self.data.advance(skip);
        skip
    }

    /// View the buffered bytes without consuming them.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Remove up to `count` bytes from the front.
    pub fn consume(&mut self, count: usize) {
        self.data.advance(count.min(self.data.len()));
    }

    /// Position of the first occurrence of `pattern`, or `None`.
    pub fn find_pattern(&self, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() || pattern.len() > self.data.len() {
            return None;
        }
        self.data
            .windows(pattern.len())
            .position(|window| window == pattern)
    }

    /// Check whether the buffer starts with the given pattern.
    pub fn starts_with(&self, pattern: &[u8]) -> bool {
        self.data.starts_with(pattern)
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_consume() {
        let mut buffer = ResyncBuffer::new();
        buffer.write(&[1, 2, 3]);
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.is_empty());

        buffer.consume(2);
        assert_eq!(buffer.as_slice(), &[3]);

        buffer.consume(10); // more than available
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_trim_drops_leading_garbage() {
        let mut buffer = ResyncBuffer::new();
        buffer.write(&[0x05, 0x07, FRAME_MARKER, b'C', 0x01]);
        let dropped = buffer.trim_to_marker();
        assert_eq!(dropped, 2);
        assert_eq!(buffer.as_slice(), &[FRAME_MARKER, b'C', 0x01]);
    }

    #[test]
    fn test_trim_keeps_marker_prefixed_data() {
        let mut buffer = ResyncBuffer::new();
        buffer.write(&[FRAME_MARKER, b'C']);
        assert_eq!(buffer.trim_to_marker(), 0);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_trim_clears_lone_non_marker_byte() {
        let mut buffer = ResyncBuffer::new();
        buffer.write(&[0x42]);
        assert_eq!(buffer.trim_to_marker(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_trim_on_empty_buffer() {
        let mut buffer = ResyncBuffer::new();
        assert_eq!(buffer.trim_to_marker(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_pattern_finding() {
        let mut buffer = ResyncBuffer::new();
        buffer.write(&[1, 2, FRAME_MARKER, b'B', 5]);

        assert_eq!(buffer.find_pattern(&[FRAME_MARKER, b'B']), Some(2));
        assert_eq!(buffer.find_pattern(&[9, 8]), None);
        assert!(buffer.starts_with(&[1, 2]));
        assert!(!buffer.starts_with(&[2, 3]));
    }
}
