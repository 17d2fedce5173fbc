//! A framed message transport for real-time multiplayer games, running over both a
//!  reliable stream socket (TCP) and an unreliable datagram socket (UDP). Client and
//!  server share the same channel implementations; the difference is purely in who
//!  connects and who accepts.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *typed messages* (i.e. application-defined
//!   values with a stable numeric type tag), not streams of bytes
//! * One wire format for both transports, so message catalogs are shared between the
//!   reliable and the unreliable path
//! * Allocation-conscious I/O: sockets read into pooled, fixed-size buffers; send
//!   buffers are pre-allocated and compacted in place rather than reallocated
//! * Background workers drive all socket I/O; application threads only append to
//!   send buffers and receive decoded messages through listener callbacks
//! * Bounded-retry request/response exchanges (e.g. NAT address discovery) are layered
//!   on top of the unreliable channel without interfering with unrelated traffic
//!
//! Explicitly *not* goals: message ordering across the unreliable channel, encryption,
//!  congestion control beyond fixed-interval retry, or any interpretation of message
//!  payloads beyond the type tag.
//!
//! ## Wire format
//!
//! Frames are written back-to-back with no length prefix; the frame boundary is a
//!  fixed, publicly known delimiter pattern that both peers must agree on:
//!
//! ```ascii
//! 0:  message type tag (u32, network byte order)
//! 4:  payload bytes (variable length, defined by the type tag's codec)
//! n:  delimiter (13 bytes, fixed ASCII pattern)
//! n+13: MD5 digest over bytes [0, n) - present only when checksums are enabled
//! ```
//!
//! Payload bytes are opaque to the transport. A payload that happens to contain the
//!  delimiter pattern corrupts framing - the codec does not escape it. This is an
//!  accepted limitation of the wire format, kept for compatibility with existing peers.

pub mod ack;
pub mod buffers;
pub mod channel;
pub mod codec;
pub mod config;
pub mod message;
pub mod nat;
pub mod socket;
pub mod stream;
