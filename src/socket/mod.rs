//! Thin, non-blocking wrappers over a TCP stream socket and a UDP datagram socket.
//!  Every send/receive is a readiness poll that returns immediately; the channel
//!  workers supply the scheduling. The trait seams exist to mock the I/O part away
//!  for testing the channel logic.

pub mod tcp;
pub mod udp;

use std::net::SocketAddr;

#[cfg(test)] use mockall::automock;

use crate::buffers::buffer_pool::PooledBuf;

/// Result of one non-blocking socket poll.
#[derive(Debug)]
pub enum IoPoll<T> {
    /// the poll produced data / wrote bytes
    Data(T),
    /// nothing ready right now - try again on a later tick
    WouldBlock,
    /// the socket is closed or disposed; the owning worker should stop driving it
    Disconnected,
}

/// Non-blocking I/O on one connected stream socket. Implemented by
///  [tcp::StreamSocket]; mocked in channel tests.
#[cfg_attr(test, automock)]
pub trait StreamIo: Send + Sync + 'static {
    /// polls for incoming bytes, reading at most one pooled buffer's worth
    fn receive(&self) -> anyhow::Result<IoPoll<PooledBuf>>;

    /// polls for writability and writes as much of `bytes` as the transport accepts
    ///  right now; partial writes are expected and handled by the caller's
    ///  acknowledge step
    fn send(&self, bytes: &[u8]) -> anyhow::Result<IoPoll<usize>>;

    /// idempotent; in-flight receive/send calls complete before the socket goes away
    fn disconnect(&self);

    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Non-blocking I/O on one bound, endpoint-agnostic datagram socket.
#[cfg_attr(test, automock)]
pub trait DatagramIo: Send + Sync + 'static {
    /// polls for one ready datagram, resolving the sender's endpoint
    fn receive(&self) -> anyhow::Result<IoPoll<(PooledBuf, SocketAddr)>>;

    fn send_to(&self, bytes: &[u8], to: SocketAddr) -> anyhow::Result<IoPoll<usize>>;

    /// idempotent close; further receive/send calls observe [IoPoll::Disconnected]
    fn close(&self);

    fn local_addr(&self) -> Option<SocketAddr>;
}
