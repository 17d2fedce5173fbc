//! Fixed-length, pre-allocated byte buffers for reuse. Their purpose is to minimize
//!  copying and per-I/O-call allocation: sockets read into them, and the stream
//!  writer's send buffer is one of them, compacted in place as sent bytes are
//!  acknowledged. They implement `BufMut` to fit into the `bytes` ecosystem.

use std::fmt::{Debug, Formatter};

use bytes::buf::UninitSlice;

/// A fixed-capacity, dynamically allocated buffer
#[derive(Eq)]
pub struct FixedBuf {
    buf: Vec<u8>,
    len: usize,
}

impl FixedBuf {
    pub fn new(capacity: usize) -> FixedBuf {
        FixedBuf {
            // buffers are reused aggressively, so we trade the one-time cost of
            //  zero-initialization for not having to track initialized ranges
            buf: vec![0; capacity],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// make the entire underlying buffer available through as_mut() etc., e.g. as the
    ///  target of a socket read
    pub fn maximize_len(&mut self) {
        self.len = self.capacity();
    }

    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.capacity());
        self.len = len;
    }

    /// Removes `count` bytes from the front, shifting the remainder to offset 0.
    ///  This is the compaction step behind [acknowledge_sent](crate::stream::writer::MessageStreamWriter::acknowledge_sent):
    ///  a fully drained buffer takes the cheap path of resetting the length.
    pub fn discard_front(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if count >= self.len {
            self.len = 0;
            return;
        }
        self.buf.copy_within(count..self.len, 0);
        self.len -= count;
    }

    /// Convenience for test code: derives the capacity from the initializing slice.
    #[cfg(test)]
    pub fn from_slice(capacity: usize, data: &[u8]) -> FixedBuf {
        let mut result = FixedBuf::new(capacity);
        bytes::BufMut::put_slice(&mut result, data);
        result
    }
}

impl PartialEq for FixedBuf {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}

impl Debug for FixedBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl AsRef<[u8]> for FixedBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl AsMut<[u8]> for FixedBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

unsafe impl bytes::BufMut for FixedBuf {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.len
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.len + cnt <= self.capacity());
        self.len += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.len..])
    }
}
