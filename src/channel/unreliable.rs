//! The unreliable channel: one endpoint-agnostic UDP socket shared by all peers,
//!  with a lazily created reader/writer pair per remote endpoint. A receive worker
//!  demultiplexes datagrams by sender; a flush worker drains the outgoing queue into
//!  per-endpoint writers and transmits whatever is pending. Frames from different
//!  endpoints can never mix, but nothing is retried or ordered across endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::ack::AckSender;
use crate::buffers::snapshot_map::SnapshotMap;
use crate::channel::{ChannelKind, UnreliableChannelListener};
use crate::config::NetConfig;
use crate::message::{encode_frame, MessageContainer, TypedMessage};
use crate::socket::{DatagramIo, IoPoll};
use crate::stream::reader::MessageStreamReader;
use crate::stream::writer::MessageStreamWriter;

/// per-endpoint transport state, created on first traffic to or from the endpoint
struct PeerState {
    reader: Mutex<MessageStreamReader>,
    writer: MessageStreamWriter,
    last_activity: Mutex<Instant>,
}

impl PeerState {
    fn new(writer_capacity: usize, checksum: bool) -> Arc<PeerState> {
        Arc::new(PeerState {
            reader: Mutex::new(MessageStreamReader::new(checksum)),
            writer: MessageStreamWriter::new(writer_capacity, checksum),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }
}

enum LoopStep {
    /// work was done - poll again right away to drain a burst
    Progress,
    /// nothing ready - sleep one tick
    Idle,
    /// the socket is gone - the worker exits
    Stop,
}

pub struct UnreliableChannel {
    socket: Arc<dyn DatagramIo>,
    peers: SnapshotMap<SocketAddr, Arc<PeerState>>,
    outgoing_tx: UnboundedSender<(SocketAddr, Bytes)>,
    outgoing_rx: Mutex<Option<UnboundedReceiver<(SocketAddr, Bytes)>>>,
    listener: Arc<dyn UnreliableChannelListener>,
    running: AtomicBool,
    io_started: AtomicBool,
    writer_capacity: usize,
    append_checksum: bool,
    tick_interval: Duration,
    idle_timeout: Option<Duration>,
}

impl UnreliableChannel {
    pub fn new(
        socket: Arc<dyn DatagramIo>,
        listener: Arc<dyn UnreliableChannelListener>,
        config: &NetConfig,
    ) -> Arc<UnreliableChannel> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Arc::new(UnreliableChannel {
            socket,
            peers: SnapshotMap::new(),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            listener,
            running: AtomicBool::new(true),
            io_started: AtomicBool::new(false),
            writer_capacity: config.writer_capacity,
            append_checksum: config.append_checksum,
            tick_interval: config.io_tick_interval,
            idle_timeout: config.endpoint_idle_timeout,
        })
    }

    /// Enqueues one message for the given endpoint and returns immediately. The
    ///  flush worker frames nothing here - the message is framed now so retrying
    ///  callers can hold on to the cheap `Bytes` handle instead.
    pub fn send_to<T: TypedMessage>(&self, message: &T, to: SocketAddr) -> anyhow::Result<()> {
        self.send_frame(to, encode_frame(message, self.append_checksum))
    }

    pub fn send_frame(&self, to: SocketAddr, frame: Bytes) -> anyhow::Result<()> {
        self.outgoing_tx
            .send((to, frame))
            .map_err(|_| anyhow!("unreliable channel is shut down"))
    }

    /// Spawns the receive and flush workers. Idempotent; the channel cannot be
    ///  restarted once stopped.
    pub fn start_io(self: &Arc<Self>) {
        if self.io_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let channel = self.clone();
        tokio::spawn(async move {
            channel.receive_loop().await;
        });
        let channel = self.clone();
        tokio::spawn(async move {
            channel.flush_loop().await;
        });
    }

    /// Signals both workers to stop after their in-flight iteration.
    pub fn stop_io(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stops the workers and closes the socket. Idempotent.
    pub fn close(&self) {
        self.stop_io();
        self.socket.close();
    }

    pub fn kind(&self) -> ChannelKind {
        ChannelKind::Unreliable
    }

    pub fn tracked_endpoints(&self) -> usize {
        self.peers.len()
    }

    async fn receive_loop(self: Arc<Self>) {
        info!("unreliable channel receive worker starting");
        while self.running.load(Ordering::SeqCst) {
            match self.drive_receive().await {
                LoopStep::Progress => {}
                LoopStep::Idle => tokio::time::sleep(self.tick_interval).await,
                LoopStep::Stop => break,
            }
        }
        info!("unreliable channel receive worker exiting");
    }

    async fn flush_loop(self: Arc<Self>) {
        let mut outgoing_rx = match self.outgoing_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                warn!("flush worker started twice - ignoring");
                return;
            }
        };

        info!("unreliable channel flush worker starting");
        while self.running.load(Ordering::SeqCst) {
            match self.drive_flush(&mut outgoing_rx) {
                LoopStep::Stop => break,
                _ => tokio::time::sleep(self.tick_interval).await,
            }
        }
        info!("unreliable channel flush worker exiting");
    }

    /// one receive poll: demultiplex a ready datagram into its endpoint's reader and
    ///  deliver every frame that became complete
    async fn drive_receive(&self) -> LoopStep {
        match self.socket.receive() {
            Ok(IoPoll::Data((buf, from))) => {
                let correlation_id = Uuid::new_v4();
                let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
                self.process_datagram(from, buf.as_ref())
                    .instrument(span)
                    .await;
                LoopStep::Progress
            }
            Ok(IoPoll::WouldBlock) => LoopStep::Idle,
            Ok(IoPoll::Disconnected) => {
                debug!("datagram socket closed - stopping receive worker");
                LoopStep::Stop
            }
            Err(e) => {
                error!("socket error: {}", e);
                LoopStep::Idle
            }
        }
    }

    async fn process_datagram(&self, from: SocketAddr, bytes: &[u8]) {
        trace!("received datagram of {} bytes from {:?}", bytes.len(), from);

        let peer = self.peer_state(from);
        let containers = {
            let mut reader = peer.reader.lock().unwrap();
            reader.append(bytes);
            let mut drained = Vec::new();
            while let Some(container) = reader.decode_next() {
                drained.push(container);
            }
            drained
        };
        peer.touch();

        for container in containers {
            self.listener.on_message(from, container).await;
        }
    }

    /// one flush pass: drain the outgoing queue into per-endpoint writers, then
    ///  transmit every writer's pending bytes
    fn drive_flush(&self, outgoing_rx: &mut UnboundedReceiver<(SocketAddr, Bytes)>) -> LoopStep {
        while let Ok((to, frame)) = outgoing_rx.try_recv() {
            let peer = self.peer_state(to);
            if let Err(e) = peer.writer.write_frame(&frame) {
                warn!("dropping outgoing message to {:?}: {}", to, e);
            }
        }

        for (endpoint, peer) in self.peers.snapshot().iter() {
            if !peer.writer.has_pending() {
                continue;
            }
            let result = peer
                .writer
                .with_pending(|bytes| self.socket.send_to(bytes, *endpoint));
            match result {
                Ok(IoPoll::Data(num_written)) => self.on_bytes_written(*endpoint, num_written),
                Ok(IoPoll::WouldBlock) => {}
                Ok(IoPoll::Disconnected) => {
                    debug!("datagram socket closed - stopping flush worker");
                    return LoopStep::Stop;
                }
                Err(e) => warn!("error sending to {:?}: {}", endpoint, e),
            }
        }

        if let Some(timeout) = self.idle_timeout {
            self.sweep_idle(timeout);
        }
        LoopStep::Progress
    }

    fn on_bytes_written(&self, to: SocketAddr, count: usize) {
        match self.peers.get(&to) {
            Some(peer) => {
                peer.writer.acknowledge_sent(count);
                peer.touch();
            }
            None => {
                warn!(
                    "{} bytes written for endpoint {:?} with no tracked writer - ignoring",
                    count, to
                );
            }
        }
    }

    fn peer_state(&self, endpoint: SocketAddr) -> Arc<PeerState> {
        if let Some(peer) = self.peers.get(&endpoint) {
            return peer;
        }

        debug!("first contact with {:?} - initializing endpoint state", endpoint);
        let peer = PeerState::new(self.writer_capacity, self.append_checksum);
        self.peers.update(|map| {
            map.entry(endpoint).or_insert_with(|| peer.clone());
        });
        self.peers
            .get(&endpoint)
            .expect("endpoint state was just inserted")
    }

    /// drops endpoints without traffic for longer than the timeout; endpoints with
    ///  unsent bytes are kept until their writers drain
    fn sweep_idle(&self, timeout: Duration) {
        let stale: Vec<SocketAddr> = self
            .peers
            .snapshot()
            .iter()
            .filter(|(_, peer)| peer.idle_for() > timeout && !peer.writer.has_pending())
            .map(|(endpoint, _)| *endpoint)
            .collect();

        if stale.is_empty() {
            return;
        }

        debug!("evicting {} idle endpoint(s): {:?}", stale.len(), stale);
        self.peers.update(|map| {
            for endpoint in &stale {
                map.remove(endpoint);
            }
        });
    }
}

impl AckSender for UnreliableChannel {
    fn send_frame(&self, to: SocketAddr, frame: Bytes) -> anyhow::Result<()> {
        UnreliableChannel::send_frame(self, to, frame)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use bytes::BufMut;

    use crate::buffers::buffer_pool::{BufferPool, PooledBuf};
    use crate::message::test_messages::{Chat, Ping};

    use super::*;

    struct ScriptedDatagramIo {
        incoming: StdMutex<Vec<(Vec<u8>, SocketAddr)>>,
        sent: StdMutex<Vec<(Vec<u8>, SocketAddr)>>,
        closed: AtomicBool,
        pool: Arc<BufferPool>,
    }

    impl ScriptedDatagramIo {
        fn new(incoming: Vec<(Vec<u8>, SocketAddr)>) -> Arc<ScriptedDatagramIo> {
            Arc::new(ScriptedDatagramIo {
                incoming: StdMutex::new(incoming),
                sent: StdMutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                pool: BufferPool::new(8 * 1024, 4),
            })
        }

        fn sent_datagrams(&self) -> Vec<(Vec<u8>, SocketAddr)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl DatagramIo for ScriptedDatagramIo {
        fn receive(&self) -> anyhow::Result<IoPoll<(PooledBuf, SocketAddr)>> {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(IoPoll::Disconnected);
            }
            let mut incoming = self.incoming.lock().unwrap();
            if incoming.is_empty() {
                return Ok(IoPoll::WouldBlock);
            }
            let (bytes, from) = incoming.remove(0);
            let mut buf = self.pool.rent();
            buf.put_slice(&bytes);
            Ok(IoPoll::Data((buf, from)))
        }

        fn send_to(&self, bytes: &[u8], to: SocketAddr) -> anyhow::Result<IoPoll<usize>> {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(IoPoll::Disconnected);
            }
            self.sent.lock().unwrap().push((bytes.to_vec(), to));
            Ok(IoPoll::Data(bytes.len()))
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn local_addr(&self) -> Option<SocketAddr> {
            Some(SocketAddr::from_str("127.0.0.1:4000").unwrap())
        }
    }

    struct RecordingListener {
        received: StdMutex<Vec<(SocketAddr, MessageContainer)>>,
    }

    impl RecordingListener {
        fn new() -> Arc<RecordingListener> {
            Arc::new(RecordingListener {
                received: StdMutex::new(Vec::new()),
            })
        }

        fn from_endpoint(&self, endpoint: SocketAddr) -> Vec<MessageContainer> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .filter(|(from, _)| *from == endpoint)
                .map(|(_, c)| c.clone())
                .collect()
        }
    }

    #[async_trait]
    impl UnreliableChannelListener for RecordingListener {
        async fn on_message(&self, from: SocketAddr, container: MessageContainer) {
            self.received.lock().unwrap().push((from, container));
        }
    }

    fn ep(s: &str) -> SocketAddr {
        SocketAddr::from_str(s).unwrap()
    }

    async fn drain_receive(channel: &UnreliableChannel) {
        loop {
            match channel.drive_receive().await {
                LoopStep::Progress => {}
                _ => break,
            }
        }
    }

    #[tokio::test]
    async fn test_demux_two_endpoints() {
        // interleaved (and partially split) datagrams from two endpoints must come
        //  out as two independent, internally ordered sequences
        let ep_a = ep("10.0.0.1:1111");
        let ep_b = ep("10.0.0.2:2222");

        let frame_a1 = encode_frame(&Ping { seq: 1 }, true).to_vec();
        let frame_a2 = encode_frame(&Ping { seq: 2 }, true).to_vec();
        let frame_b1 = encode_frame(&Chat { text: "b1".into() }, true).to_vec();

        // a1 split across two datagrams, with b's traffic in between
        let (a1_head, a1_tail) = frame_a1.split_at(7);
        let incoming = vec![
            (a1_head.to_vec(), ep_a),
            (frame_b1.clone(), ep_b),
            (a1_tail.to_vec(), ep_a),
            (frame_a2.clone(), ep_a),
        ];

        let socket = ScriptedDatagramIo::new(incoming);
        let listener = RecordingListener::new();
        let channel =
            UnreliableChannel::new(socket, listener.clone(), &NetConfig::default());

        drain_receive(&channel).await;

        let from_a = listener.from_endpoint(ep_a);
        assert_eq!(from_a.len(), 2);
        assert_eq!(from_a[0].parse::<Ping>().unwrap(), Ping { seq: 1 });
        assert_eq!(from_a[1].parse::<Ping>().unwrap(), Ping { seq: 2 });

        let from_b = listener.from_endpoint(ep_b);
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_b[0].parse::<Chat>().unwrap(), Chat { text: "b1".into() });

        assert_eq!(channel.tracked_endpoints(), 2);
    }

    #[tokio::test]
    async fn test_send_path_flushes_queued_messages() {
        let target = ep("10.0.0.9:9999");
        let socket = ScriptedDatagramIo::new(vec![]);
        let listener = RecordingListener::new();
        let channel =
            UnreliableChannel::new(socket.clone(), listener, &NetConfig::default());

        channel.send_to(&Ping { seq: 5 }, target).unwrap();

        let mut rx = channel.outgoing_rx.lock().unwrap().take().unwrap();
        assert!(matches!(channel.drive_flush(&mut rx), LoopStep::Progress));

        let sent = socket.sent_datagrams();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, target);
        assert_eq!(sent[0].0, encode_frame(&Ping { seq: 5 }, true).to_vec());

        // the writer was acknowledged - nothing left to flush on the next pass
        assert!(matches!(channel.drive_flush(&mut rx), LoopStep::Progress));
        assert_eq!(socket.sent_datagrams().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_write_completion_is_non_fatal() {
        let socket = ScriptedDatagramIo::new(vec![]);
        let channel = UnreliableChannel::new(
            socket,
            RecordingListener::new(),
            &NetConfig::default(),
        );

        // bytes reported for an endpoint we never tracked: logged, not fatal
        channel.on_bytes_written(ep("10.9.9.9:1"), 42);
        assert_eq!(channel.tracked_endpoints(), 0);
    }

    #[tokio::test]
    async fn test_closed_socket_stops_flush() {
        let socket = ScriptedDatagramIo::new(vec![]);
        let channel = UnreliableChannel::new(
            socket.clone(),
            RecordingListener::new(),
            &NetConfig::default(),
        );
        channel.send_to(&Ping { seq: 1 }, ep("10.0.0.1:1")).unwrap();
        socket.close();

        let mut rx = channel.outgoing_rx.lock().unwrap().take().unwrap();
        assert!(matches!(channel.drive_flush(&mut rx), LoopStep::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_endpoints_are_evicted_when_configured() {
        let config = NetConfig {
            endpoint_idle_timeout: Some(Duration::from_secs(30)),
            ..NetConfig::default()
        };
        let frame = encode_frame(&Ping { seq: 1 }, true).to_vec();
        let socket = ScriptedDatagramIo::new(vec![(frame, ep("10.0.0.1:1111"))]);
        let channel = UnreliableChannel::new(socket, RecordingListener::new(), &config);

        drain_receive(&channel).await;
        assert_eq!(channel.tracked_endpoints(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        channel.sweep_idle(Duration::from_secs(30));
        assert_eq!(channel.tracked_endpoints(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_endpoints_retained_without_eviction() {
        let frame = encode_frame(&Ping { seq: 1 }, true).to_vec();
        let socket = ScriptedDatagramIo::new(vec![(frame, ep("10.0.0.1:1111"))]);
        let channel = UnreliableChannel::new(
            socket,
            RecordingListener::new(),
            &NetConfig::default(), // endpoint_idle_timeout: None
        );

        drain_receive(&channel).await;
        tokio::time::advance(Duration::from_secs(3600)).await;

        let mut rx = channel.outgoing_rx.lock().unwrap().take().unwrap();
        channel.drive_flush(&mut rx);
        assert_eq!(channel.tracked_endpoints(), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let socket = ScriptedDatagramIo::new(vec![]);
        let channel = UnreliableChannel::new(
            socket,
            RecordingListener::new(),
            &NetConfig::default(),
        );

        // dropping the receiver is what a finished flush worker does
        channel.outgoing_rx.lock().unwrap().take();

        channel.close();
        // queueing into a closed channel reports the error instead of panicking
        let result = channel.send_to(&Ping { seq: 1 }, ep("10.0.0.1:1"));
        assert!(result.is_err());
    }
}
