//! Primitive byte packing for the wire format: type tag header, frame delimiter
//!  insertion and search, and the optional trailing checksum. All functions are pure
//!  given their byte-buffer arguments; sizing the buffers is the caller's
//!  responsibility.

use bytes::BufMut;
use md5::{Digest, Md5};

/// The frame terminator. Both peers must use the same pattern, so changing it is a
///  wire protocol break. Payload bytes reproducing this pattern corrupt framing
///  (no escaping - see the crate level documentation).
pub const DELIMITER: &[u8] = b"h;'y#@%tf$^bh";

/// serialized size of the message type tag
pub const TYPE_TAG_LEN: usize = size_of::<u32>();

/// serialized size of the optional trailing digest
pub const CHECKSUM_LEN: usize = 16;

/// appends the 4-byte type tag header, returning the number of bytes written
pub fn write_type_tag(buf: &mut impl BufMut, tag: u32) -> usize {
    buf.put_u32(tag);
    TYPE_TAG_LEN
}

/// appends the frame delimiter, returning the number of bytes written
pub fn insert_delimiter(buf: &mut impl BufMut) -> usize {
    buf.put_slice(DELIMITER);
    DELIMITER.len()
}

/// Streaming substring search for the frame delimiter in a byte window.
///
/// The window is scanned in a single pass: every in-flight partial match records its
///  start index and how many pattern bytes it has matched so far, and is advanced (or
///  discarded) per input byte. This avoids re-scanning on near-misses, which matters
///  because the receive buffer is re-searched after every socket read.
pub fn find_delimiter(window: &[u8]) -> Option<usize> {
    find_pattern(window, DELIMITER)
}

struct PartialMatch {
    start: usize,
    matched: usize,
}

fn find_pattern(window: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || window.len() < pattern.len() {
        return None;
    }

    let mut partial_matches: Vec<PartialMatch> = Vec::new();

    for (i, &byte) in window.iter().enumerate() {
        let mut j = 0;
        while j < partial_matches.len() {
            let partial = &mut partial_matches[j];
            if byte == pattern[partial.matched] {
                partial.matched += 1;
                if partial.matched == pattern.len() {
                    return Some(partial.start);
                }
                j += 1;
            }
            else {
                partial_matches.swap_remove(j);
            }
        }

        if byte == pattern[0] {
            if pattern.len() == 1 {
                return Some(i);
            }
            partial_matches.push(PartialMatch { start: i, matched: 1 });
        }
    }

    None
}

/// MD5-class digest over a byte range; deterministic and reproducible across calls
pub fn calculate_checksum(content: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Md5::new();
    hasher.update(content);
    hasher.finalize().into()
}

/// appends the digest of `content` to the buffer, returning the number of bytes written
pub fn append_checksum(buf: &mut impl BufMut, content: &[u8]) -> usize {
    buf.put_slice(&calculate_checksum(content));
    CHECKSUM_LEN
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_write_type_tag() {
        let mut buf = Vec::new();
        assert_eq!(write_type_tag(&mut buf, 0x01020304), TYPE_TAG_LEN);
        assert_eq!(buf, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_insert_delimiter() {
        let mut buf = b"xyz".to_vec();
        assert_eq!(insert_delimiter(&mut buf), DELIMITER.len());
        assert_eq!(&buf[3..], DELIMITER);
    }

    #[rstest]
    #[case::empty(b"")]
    #[case::one_byte(b"h")]
    #[case::shorter_than_delimiter(b"h;'y#@%tf$^b")]
    #[case::no_occurrence(b"this buffer contains no frame boundary at all")]
    #[case::partial_at_end(b"some payload then h;'y#@%tf$")]
    fn test_find_delimiter_absent(#[case] window: &[u8]) {
        assert_eq!(find_delimiter(window), None);
    }

    #[test]
    fn test_find_delimiter_at_every_offset() {
        // planting the delimiter at offset i must yield exactly i, for all offsets
        for i in 0..50 {
            let mut window = vec![b'x'; i];
            window.extend_from_slice(DELIMITER);
            window.extend_from_slice(b"trailing bytes");
            assert_eq!(find_delimiter(&window), Some(i), "offset {}", i);
        }
    }

    #[test]
    fn test_find_delimiter_after_false_start() {
        // a prefix of the delimiter followed by the real thing must not confuse the
        //  partial match tracking
        let mut window = b"h;'y#@".to_vec();
        window.extend_from_slice(DELIMITER);
        assert_eq!(find_delimiter(&window), Some(6));
    }

    #[rstest]
    #[case::single_byte(b"abcabc", b"c", Some(2))]
    #[case::overlapping(b"aaab", b"aab", Some(1))]
    #[case::at_start(b"abab", b"ab", Some(0))]
    #[case::inner_occurrence(b"abab", b"ba", Some(1))]
    #[case::window_too_short(b"ab", b"abc", None)]
    fn test_find_pattern(#[case] window: &[u8], #[case] pattern: &[u8], #[case] expected: Option<usize>) {
        assert_eq!(find_pattern(window, pattern), expected);
    }

    #[test]
    fn test_checksum_deterministic() {
        let content = b"the same bytes every time";
        assert_eq!(calculate_checksum(content), calculate_checksum(content));
        assert_ne!(calculate_checksum(content), calculate_checksum(b"different bytes"));
    }

    #[test]
    fn test_append_checksum() {
        let mut buf = b"abc".to_vec();
        assert_eq!(append_checksum(&mut buf, b"abc"), CHECKSUM_LEN);
        assert_eq!(buf.len(), 3 + CHECKSUM_LEN);
        assert_eq!(&buf[3..], calculate_checksum(b"abc").as_slice());
    }
}
