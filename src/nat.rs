//! The NAT identification handshake messages.
//!
//! A client behind a NAT does not know the address the rest of the world sees for
//!  it. It sends a [NatIdentifierRequest] with the address it observes locally; the
//!  server answers with a [NatIdentifierResponse] carrying the datagram's actual
//!  source address. Comparing the two tells the client whether it is behind a NAT
//!  and which endpoint peers must use to reach it.
//!
//! The request travels over UDP and is typically driven by a
//!  [MessageAckHelper](crate::ack::MessageAckHelper) since neither direction is
//!  guaranteed to arrive.

use std::net::SocketAddr;

use bytes::{Buf, BufMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;

use crate::message::{put_end_point, try_get_end_point, TypedMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatIdentifierRequest {
    /// correlates the handshake with a logical player or session
    pub player_id: u64,
    /// the address the sender sees for itself
    pub local_addr: SocketAddr,
}

impl TypedMessage for NatIdentifierRequest {
    const MESSAGE_TYPE: u32 = 10;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.player_id);
        put_end_point(buf, self.local_addr);
    }

    fn decode(buf: &mut impl Buf) -> anyhow::Result<Self> {
        Ok(NatIdentifierRequest {
            player_id: buf.try_get_u64()?,
            local_addr: try_get_end_point(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatIdentifierResponse {
    pub player_id: u64,
    /// the source address of the request datagram as seen by the responder
    pub observed_addr: SocketAddr,
}

impl TypedMessage for NatIdentifierResponse {
    const MESSAGE_TYPE: u32 = 11;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.player_id);
        put_end_point(buf, self.observed_addr);
    }

    fn decode(buf: &mut impl Buf) -> anyhow::Result<Self> {
        Ok(NatIdentifierResponse {
            player_id: buf.try_get_u64()?,
            observed_addr: try_get_end_point(buf)?,
        })
    }
}
