//! The two channel kinds: a logical duplex message pipe per transport. The reliable
//!  channel binds one reader/writer pair to one connected TCP socket; the unreliable
//!  channel multiplexes per-endpoint reader/writer pairs over a single UDP socket.

pub mod reliable;
pub mod unreliable;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::message::MessageContainer;

/// Which transport a message travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Reliable,
    Unreliable,
}

/// Identity of one reliable channel - a server holds one channel per connected peer,
///  and listener callbacks carry this so the application can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> ChannelId {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        ChannelId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives each decoded frame of a reliable channel, in write order.
///
/// This is a blocking call from the I/O worker's perspective: non-trivial work
///  should be offloaded so a slow listener does not stall I/O for other channels.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReliableChannelListener: Send + Sync + 'static {
    async fn on_message(&self, channel: ChannelId, container: MessageContainer);
}

/// Receives each decoded frame of the unreliable channel together with the endpoint
///  it came from. No ordering guarantee exists across endpoints.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UnreliableChannelListener: Send + Sync + 'static {
    async fn on_message(&self, from: SocketAddr, container: MessageContainer);
}
