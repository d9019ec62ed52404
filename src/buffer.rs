//! Growable FIFO byte buffer used for session read and write buffering.
//!
//! Capacity grows in fixed increments. A bounded buffer refuses any write
//! that would take it past its cap; the write is all-or-nothing so buffered
//! content is never truncated or reordered.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, S5bError};

/// FIFO byte store with incremental growth and an optional hard cap.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: BytesMut,
    increment: usize,
    max_size: Option<usize>,
}

impl RingBuffer {
    /// Create an unbounded buffer growing by `increment` bytes.
    pub fn new(increment: usize) -> Self {
        let increment = increment.max(1);
        Self {
            data: BytesMut::with_capacity(increment),
            increment,
            max_size: None,
        }
    }

    /// Create a buffer that never holds more than `max_size` bytes.
    pub fn bounded(increment: usize, max_size: usize) -> Self {
        let mut buffer = Self::new(increment.min(max_size.max(1)));
        buffer.max_size = Some(max_size);
        buffer
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hard cap, if any.
    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Bytes that can still be appended before the cap is hit.
    pub fn available(&self) -> usize {
        match self.max_size {
            Some(max) => max.saturating_sub(self.data.len()),
            None => usize::MAX - self.data.len(),
        }
    }

    /// Append `data`, returning the number of bytes written.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() > self.available() {
            return Err(S5bError::BufferFull {
                requested: data.len(),
                available: self.available(),
            });
        }

        let needed = self.data.len() + data.len();
        if needed > self.data.capacity() {
            // Round the new capacity up to the next increment, clamped to the cap.
            let mut target = needed.div_ceil(self.increment) * self.increment;
            if let Some(max) = self.max_size {
                target = target.min(max);
            }
            self.data.reserve(target - self.data.len());
        }

        self.data.extend_from_slice(data);
        Ok(data.len())
    }

    /// Remove and return up to `max_len` bytes from the front.
    pub fn read(&mut self, max_len: usize) -> Bytes {
        let len = max_len.min(self.data.len());
        self.data.split_to(len).freeze()
    }

    /// Copy up to `max_len` bytes from the front without removing them.
    pub fn peek(&self, max_len: usize) -> Bytes {
        let len = max_len.min(self.data.len());
        Bytes::copy_from_slice(&self.data[..len])
    }

    /// Drop up to `count` bytes from the front.
    pub fn discard(&mut self, count: usize) {
        let len = count.min(self.data.len());
        let _ = self.data.split_to(len);
    }

    /// Remove and return every buffered byte.
    pub fn read_all(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
