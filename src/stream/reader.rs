//! The receiving half of a message stream: accumulates raw socket bytes and yields
//!  decoded frames as they become complete. One reader per logical byte stream; the
//!  unreliable channel keeps one per remote endpoint so interleaved datagrams from
//!  different peers can never mix frames.

use bytes::{Buf, BytesMut};
use tracing::warn;

use crate::codec;
use crate::message::MessageContainer;

pub struct MessageStreamReader {
    buf: BytesMut,
    verify_checksum: bool,
}

impl MessageStreamReader {
    pub fn new(verify_checksum: bool) -> MessageStreamReader {
        MessageStreamReader {
            buf: BytesMut::new(),
            verify_checksum,
        }
    }

    /// Copies incoming bytes to the buffer tail. Growth is unbounded; a peer that
    ///  never sends a delimiter will grow this buffer until memory runs out. Callers
    ///  that distrust their peers should disconnect on decode starvation.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decodes the next complete frame, compacting it off the front of the buffer.
    ///
    /// Returns `None` once no complete frame is buffered - callers drain a read burst
    ///  by calling this repeatedly until `None`, and resume after the next `append`.
    ///  Frames failing the checksum (when enabled) or too short to carry a type tag
    ///  are dropped with a warning, and the scan continues with the following frame.
    pub fn decode_next(&mut self) -> Option<MessageContainer> {
        loop {
            let delimiter_index = codec::find_delimiter(&self.buf)?;

            let trailer_len = if self.verify_checksum {
                codec::CHECKSUM_LEN
            }
            else {
                0
            };
            let frame_end = delimiter_index + codec::DELIMITER.len() + trailer_len;
            if self.buf.len() < frame_end {
                // the frame's trailing digest has not fully arrived yet
                return None;
            }

            let mut frame = self.buf.split_to(frame_end);
            let content = frame.split_to(delimiter_index).freeze();
            frame.advance(codec::DELIMITER.len());

            if self.verify_checksum
                && frame.as_ref() != codec::calculate_checksum(&content).as_slice()
            {
                warn!("checksum mismatch - dropping frame of {} bytes", content.len());
                continue;
            }

            if content.len() < codec::TYPE_TAG_LEN {
                warn!("frame too short to carry a type tag - dropping");
                continue;
            }

            let mut content = content;
            let message_type = content.get_u32();
            return Some(MessageContainer::new(message_type, content));
        }
    }

    #[cfg(test)]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}
