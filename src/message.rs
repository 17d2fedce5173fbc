//! Typed messages and the decoded-frame container.
//!
//! Application messages are pluggable: anything that is encodable, decodable and
//!  carries a stable numeric type tag can travel over both channels. There is no
//!  registry and no inheritance - the transport only ever looks at the tag.

use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;

use crate::codec;

/// A value that can travel over a channel. Type tags must be unique across the whole
///  message catalog of an application, and stable across versions - they are the only
///  thing the receiving side has for picking the decoder.
pub trait TypedMessage: Send + 'static {
    const MESSAGE_TYPE: u32;

    fn encode(&self, buf: &mut impl BufMut);

    fn decode(buf: &mut impl Buf) -> anyhow::Result<Self>
    where
        Self: Sized;
}

/// One decoded frame: the type tag plus the raw payload bytes. Produced by the stream
///  reader, handed to exactly one listener, and not retained past that callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContainer {
    message_type: u32,
    payload: Bytes,
}

impl MessageContainer {
    pub fn new(message_type: u32, payload: Bytes) -> MessageContainer {
        MessageContainer {
            message_type,
            payload,
        }
    }

    pub fn message_type(&self) -> u32 {
        self.message_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is<T: TypedMessage>(&self) -> bool {
        self.message_type == T::MESSAGE_TYPE
    }

    /// decodes the payload into a typed message. The container's own cursor is not
    ///  consumed, but containers are meant to be parsed at most once.
    pub fn parse<T: TypedMessage>(&self) -> anyhow::Result<T> {
        if !self.is::<T>() {
            return Err(anyhow!(
                "attempting to parse a frame with type tag {} as message type {}",
                self.message_type,
                T::MESSAGE_TYPE
            ));
        }
        let mut cursor = self.payload.clone();
        T::decode(&mut cursor)
    }
}

/// Serializes one message into a complete frame: type tag, payload, delimiter, and
///  (optionally) the trailing digest over tag + payload.
pub fn encode_frame<T: TypedMessage>(message: &T, with_checksum: bool) -> Bytes {
    let mut buf = BytesMut::new();
    codec::write_type_tag(&mut buf, T::MESSAGE_TYPE);
    message.encode(&mut buf);

    let digest = if with_checksum {
        Some(codec::calculate_checksum(&buf))
    }
    else {
        None
    };

    codec::insert_delimiter(&mut buf);
    if let Some(digest) = digest {
        buf.put_slice(&digest);
    }
    buf.freeze()
}

/// socket address serialization shared by messages that carry endpoints (e.g. the NAT
///  identification pair)
pub fn put_end_point(buf: &mut impl BufMut, addr: SocketAddr) {
    match addr {
        SocketAddr::V4(data) => {
            buf.put_u8(4);
            buf.put_u32(data.ip().to_bits());
            buf.put_u16(data.port());
        }
        SocketAddr::V6(data) => {
            buf.put_u8(6);
            buf.put_u128(data.ip().to_bits());
            buf.put_u16(data.port());
        }
    }
}

pub fn try_get_end_point(buf: &mut impl Buf) -> anyhow::Result<SocketAddr> {
    match buf.try_get_u8()? {
        4 => {
            let ip = buf.try_get_u32()?;
            let port = buf.try_get_u16()?;
            Ok(SocketAddr::V4(SocketAddrV4::new(ip.into(), port)))
        }
        6 => {
            let ip = buf.try_get_u128()?;
            let port = buf.try_get_u16()?;
            Ok(SocketAddr::V6(SocketAddrV6::new(ip.into(), port, 0, 0)))
        }
        n => Err(anyhow!("invalid socket address discriminator: {}", n)),
    }
}


#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::test_messages::{Chat, Ping};
    use super::*;

    #[test]
    fn test_container_is() {
        let container = MessageContainer::new(1, Bytes::from_static(b"\0\0\0\x07"));
        assert!(container.is::<Ping>());
        assert!(!container.is::<Chat>());
    }

    #[test]
    fn test_container_parse() {
        let container = MessageContainer::new(1, Bytes::from_static(b"\0\0\0\x07"));
        assert_eq!(container.parse::<Ping>().unwrap(), Ping { seq: 7 });
        assert!(container.parse::<Chat>().is_err());
    }

    #[test]
    fn test_container_parse_truncated() {
        let container = MessageContainer::new(1, Bytes::from_static(b"\0\0"));
        assert!(container.parse::<Ping>().is_err());
    }

    #[rstest]
    #[case::without_checksum(false)]
    #[case::with_checksum(true)]
    fn test_encode_frame(#[case] with_checksum: bool) {
        let frame = encode_frame(&Ping { seq: 0x0a0b0c0d }, with_checksum);

        let content = b"\0\0\0\x01\x0a\x0b\x0c\x0d";
        assert_eq!(&frame[..8], content);
        assert_eq!(&frame[8..8 + codec::DELIMITER.len()], codec::DELIMITER);
        if with_checksum {
            assert_eq!(
                &frame[8 + codec::DELIMITER.len()..],
                codec::calculate_checksum(content).as_slice()
            );
        }
        else {
            assert_eq!(frame.len(), 8 + codec::DELIMITER.len());
        }
    }

    #[rstest]
    #[case::v4("1.2.3.4:5678")]
    #[case::v6("[2001:db8::17]:443")]
    fn test_end_point_round_trip(#[case] addr: &str) {
        let addr = SocketAddr::from_str(addr).unwrap();
        let mut buf = BytesMut::new();
        put_end_point(&mut buf, addr);

        let mut read_buf: &[u8] = &buf;
        assert_eq!(try_get_end_point(&mut read_buf).unwrap(), addr);
        assert!(read_buf.is_empty());
    }

    #[test]
    fn test_end_point_invalid_discriminator() {
        let mut buf: &[u8] = b"\x05\0\0\0\0\0\0";
        assert!(try_get_end_point(&mut buf).is_err());
    }
}
