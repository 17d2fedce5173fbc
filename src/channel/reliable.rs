//! The reliable channel: one stream reader/writer pair per connected TCP socket,
//!  driven by a single background worker that iterates all live channels once per
//!  tick. The registry of live channels is an explicitly owned object (injected into
//!  whatever starts the worker), not process-wide state, so tests and multi-listener
//!  servers can run independent registries side by side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::{ChannelId, ChannelKind, ReliableChannelListener};
use crate::config::NetConfig;
use crate::message::{MessageContainer, TypedMessage};
use crate::socket::{IoPoll, StreamIo};
use crate::stream::reader::MessageStreamReader;
use crate::stream::writer::MessageStreamWriter;

pub struct ReliableChannel {
    id: ChannelId,
    socket: Arc<dyn StreamIo>,
    reader: Mutex<MessageStreamReader>,
    writer: MessageStreamWriter,
    listener: Arc<dyn ReliableChannelListener>,
}

impl ReliableChannel {
    pub fn new(
        socket: Arc<dyn StreamIo>,
        listener: Arc<dyn ReliableChannelListener>,
        config: &NetConfig,
    ) -> Arc<ReliableChannel> {
        Arc::new(ReliableChannel {
            id: ChannelId::next(),
            socket,
            reader: Mutex::new(MessageStreamReader::new(config.append_checksum)),
            writer: MessageStreamWriter::new(config.writer_capacity, config.append_checksum),
            listener,
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        ChannelKind::Reliable
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.socket.peer_addr()
    }

    /// Frames the message into the send buffer; the background worker transmits it
    ///  on a later tick. Returns immediately.
    pub fn send<T: TypedMessage>(&self, message: &T) -> anyhow::Result<()> {
        self.writer.write(message)
    }

    /// Disconnects the underlying socket. The worker observes the disposed socket on
    ///  its next tick and drops the channel from the registry.
    pub fn close(&self) {
        self.socket.disconnect();
    }

    /// One worker tick: a single receive poll (draining every frame it completed),
    ///  then a flush of pending writer bytes. Returns `false` once the socket is
    ///  disposed and the channel should leave the registry.
    pub(crate) async fn drive_io(&self) -> anyhow::Result<bool> {
        match self.socket.receive()? {
            IoPoll::Data(buf) => {
                let containers = {
                    let mut reader = self.reader.lock().unwrap();
                    reader.append(buf.as_ref());
                    let mut drained = Vec::new();
                    while let Some(container) = reader.decode_next() {
                        drained.push(container);
                    }
                    drained
                };
                self.deliver(containers).await;
            }
            IoPoll::WouldBlock => {}
            IoPoll::Disconnected => return Ok(false),
        }

        if self.writer.has_pending() {
            let sent = self.writer.with_pending(|bytes| self.socket.send(bytes))?;
            match sent {
                IoPoll::Data(num_written) => self.writer.acknowledge_sent(num_written),
                IoPoll::WouldBlock => {}
                IoPoll::Disconnected => return Ok(false),
            }
        }

        Ok(true)
    }

    async fn deliver(&self, containers: Vec<MessageContainer>) {
        for container in containers {
            self.listener.on_message(self.id, container).await;
        }
    }
}

/// The explicitly owned set of live reliable channels plus the worker that drives
///  their I/O. Channels register on connect and deregister on disconnect; the worker
///  iterates a point-in-time snapshot per tick, so registry mutation never races
///  per-channel work.
pub struct ChannelRegistry {
    channels: Mutex<Vec<Arc<ReliableChannel>>>,
    running: AtomicBool,
    tick_interval: Duration,
}

impl ChannelRegistry {
    pub fn new(config: &NetConfig) -> Arc<ChannelRegistry> {
        Arc::new(ChannelRegistry {
            channels: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            tick_interval: config.io_tick_interval,
        })
    }

    pub fn register(&self, channel: Arc<ReliableChannel>) {
        debug!("registering channel {:?}", channel.id());
        self.channels.lock().unwrap().push(channel);
    }

    pub fn deregister(&self, id: ChannelId) {
        debug!("deregistering channel {:?}", id);
        self.channels.lock().unwrap().retain(|ch| ch.id() != id);
    }

    pub fn is_registered(&self, id: ChannelId) -> bool {
        self.channels.lock().unwrap().iter().any(|ch| ch.id() == id)
    }

    /// Starts the background I/O worker. Idempotent - a second call while running is
    ///  a no-op.
    pub fn start_io(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = self.clone();
        tokio::spawn(async move {
            registry.io_loop().await;
        });
    }

    /// Requests the worker to stop. Best-effort: the in-flight iteration completes
    ///  first.
    pub fn stop_io(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn io_loop(self: Arc<Self>) {
        info!("reliable channel I/O worker starting");
        while self.running.load(Ordering::SeqCst) {
            let snapshot: Vec<Arc<ReliableChannel>> = self.channels.lock().unwrap().clone();

            for channel in snapshot {
                match channel.drive_io().await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(
                            "channel {:?} socket disposed - removing from registry",
                            channel.id()
                        );
                        self.deregister(channel.id());
                    }
                    Err(e) => {
                        // transient fault on one channel must not stall the others
                        warn!("I/O error on channel {:?}: {}", channel.id(), e);
                    }
                }
            }

            tokio::time::sleep(self.tick_interval).await;
        }
        info!("reliable channel I/O worker exiting");
    }
}
