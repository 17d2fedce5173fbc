use std::time::Duration;

use anyhow::bail;

use crate::codec;

/// Transport configuration, owned by whoever constructs channels and shared as an
///  `Arc`. Both peers must agree on `append_checksum` since it changes the wire
///  format.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Size of the pooled buffers that sockets read into, and the upper bound for
    ///  a single datagram. The reliable channel reads at most this many bytes per
    ///  worker tick; larger incoming frames simply span several reads.
    pub receive_buffer_size: usize,

    /// Capacity of each stream writer's send buffer. Frames are appended back-to-back
    ///  until the transport confirms bytes as sent; a full buffer rejects further
    ///  writes rather than reallocating.
    pub writer_capacity: usize,

    /// Number of receive buffers kept pooled per socket - buffers in excess of this
    ///  are discarded when returned.
    pub buffer_pool_size: usize,

    /// Interval between I/O worker iterations. Each tick polls sockets non-blocking
    ///  and flushes pending writer bytes, so this bounds added latency in both
    ///  directions.
    pub io_tick_interval: Duration,

    /// Whether frames carry the trailing digest over type tag + payload. This is the
    ///  canonical variant of the wire format; disabling it saves 16 bytes per frame
    ///  and all integrity checking.
    pub append_checksum: bool,

    /// If set, per-endpoint state on the unreliable channel (reader/writer buffers)
    ///  is dropped after this long without traffic. `None` keeps endpoint state for
    ///  the lifetime of the channel, matching the behavior of peers that never evict.
    pub endpoint_idle_timeout: Option<Duration>,

    /// Number of *retries* after the initial send before an ack-helper exchange is
    ///  reported as failed, i.e. at most `ack_max_retries + 1` sends happen.
    pub ack_max_retries: u32,

    pub ack_retry_interval: Duration,
}

impl Default for NetConfig {
    fn default() -> NetConfig {
        NetConfig {
            receive_buffer_size: 8 * 1024,
            writer_capacity: 1024 * 1024,
            buffer_pool_size: 256,
            io_tick_interval: Duration::from_millis(1),
            append_checksum: true,
            endpoint_idle_timeout: None,
            ack_max_retries: 3,
            ack_retry_interval: Duration::from_secs(1),
        }
    }
}

impl NetConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let min_frame = codec::TYPE_TAG_LEN + codec::DELIMITER.len() + codec::CHECKSUM_LEN;
        if self.receive_buffer_size < min_frame {
            bail!(
                "receive buffer size {} is too small to hold even an empty frame ({} bytes)",
                self.receive_buffer_size,
                min_frame
            );
        }
        if self.writer_capacity < self.receive_buffer_size {
            bail!("writer capacity must be at least the receive buffer size");
        }
        if self.io_tick_interval.is_zero() {
            bail!("I/O tick interval must be non-zero");
        }
        Ok(())
    }
}
