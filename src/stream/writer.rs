//! The sending half of a message stream: a single contiguous buffer accumulating
//!  fully-framed messages back-to-back, compacted from the front as the transport
//!  confirms bytes as sent.

use std::sync::Mutex;

use anyhow::bail;
use bytes::BufMut;

use crate::buffers::fixed_buffer::FixedBuf;
use crate::message::{encode_frame, TypedMessage};

/// One writer per logical byte stream (one per reliable connection, one per remote
///  endpoint on the unreliable channel).
///
/// All operations share a single mutex, so a producing thread appending frames and
///  the I/O worker flushing / acknowledging can never interleave partially. The
///  invariant is that bytes `[0, len)` always contain only whole frames.
pub struct MessageStreamWriter {
    buf: Mutex<FixedBuf>,
    append_checksum: bool,
}

impl MessageStreamWriter {
    pub fn new(capacity: usize, append_checksum: bool) -> MessageStreamWriter {
        MessageStreamWriter {
            buf: Mutex::new(FixedBuf::new(capacity)),
            append_checksum,
        }
    }

    /// Frames one message and appends it to the buffer tail. Never blocks on I/O;
    ///  fails if the frame does not fit the remaining capacity (the application is
    ///  producing faster than the transport drains).
    pub fn write<T: TypedMessage>(&self, message: &T) -> anyhow::Result<()> {
        let frame = encode_frame(message, self.append_checksum);
        self.write_frame(&frame)
    }

    /// appends an already-framed message (used by the unreliable channel's outgoing
    ///  queue, which frames messages at enqueue time)
    pub fn write_frame(&self, frame: &[u8]) -> anyhow::Result<()> {
        let mut buf = self.buf.lock().unwrap();
        if frame.len() > buf.remaining_mut() {
            bail!(
                "send buffer full: frame of {} bytes does not fit the remaining {} bytes",
                frame.len(),
                buf.remaining_mut()
            );
        }
        buf.put_slice(frame);
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.buf.lock().unwrap().is_empty()
    }

    /// Exposes the current `[0, len)` span to a transmit action without copying.
    ///  The lock is held across the action, so the action must be non-blocking
    ///  (the sockets' send primitives are polls, never waits).
    pub fn with_pending<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let buf = self.buf.lock().unwrap();
        f(buf.as_ref())
    }

    /// Removes a confirmed-sent prefix of `count` bytes by shifting the remainder to
    ///  offset 0. A no-op for `count == 0`; a full drain just resets the length.
    pub fn acknowledge_sent(&self, count: usize) {
        self.buf.lock().unwrap().discard_front(count);
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.buf.lock().unwrap().len()
    }
}
