//! The reliable transport's socket: a connected TCP stream polled non-blocking in
//!  both directions. Closing takes the stream out of an `RwLock`ed slot, so a close
//!  can never race an in-flight read or write, and a closed socket turns every
//!  further call into a no-op.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::buffers::buffer_pool::{BufferPool, PooledBuf};
use crate::config::NetConfig;
use crate::socket::{IoPoll, StreamIo};

pub struct StreamSocket {
    stream: RwLock<Option<TcpStream>>,
    peer_addr: SocketAddr,
    buffer_pool: Arc<BufferPool>,
}

impl StreamSocket {
    /// client side: connect to a listening server
    pub async fn connect(addr: SocketAddr, config: &NetConfig) -> anyhow::Result<StreamSocket> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("connected to {:?}", addr);
        Ok(Self::wrap(stream, addr, config))
    }

    /// server side: adopt a stream handed out by a `TcpListener`
    pub fn from_accepted(stream: TcpStream, config: &NetConfig) -> anyhow::Result<StreamSocket> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        debug!("accepted connection from {:?}", peer_addr);
        Ok(Self::wrap(stream, peer_addr, config))
    }

    fn wrap(stream: TcpStream, peer_addr: SocketAddr, config: &NetConfig) -> StreamSocket {
        StreamSocket {
            stream: RwLock::new(Some(stream)),
            peer_addr,
            buffer_pool: BufferPool::new(config.receive_buffer_size, config.buffer_pool_size),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.read().unwrap().is_some()
    }
}

impl StreamIo for StreamSocket {
    fn receive(&self) -> anyhow::Result<IoPoll<PooledBuf>> {
        let guard = self.stream.read().unwrap();
        let stream = match guard.as_ref() {
            Some(stream) => stream,
            None => return Ok(IoPoll::Disconnected),
        };

        let mut buf = self.buffer_pool.rent();
        buf.maximize_len();
        match stream.try_read(buf.as_mut()) {
            Ok(0) => {
                debug!("peer {:?} closed the connection", self.peer_addr);
                Ok(IoPoll::Disconnected)
            }
            Ok(num_read) => {
                buf.truncate(num_read);
                Ok(IoPoll::Data(buf))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(IoPoll::WouldBlock),
            Err(e) if is_disconnect(&e) => Ok(IoPoll::Disconnected),
            Err(e) => Err(e.into()),
        }
    }

    fn send(&self, bytes: &[u8]) -> anyhow::Result<IoPoll<usize>> {
        let guard = self.stream.read().unwrap();
        let stream = match guard.as_ref() {
            Some(stream) => stream,
            None => return Ok(IoPoll::Disconnected),
        };

        match stream.try_write(bytes) {
            Ok(num_written) => Ok(IoPoll::Data(num_written)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(IoPoll::WouldBlock),
            Err(e) if is_disconnect(&e) => Ok(IoPoll::Disconnected),
            Err(e) => Err(e.into()),
        }
    }

    fn disconnect(&self) {
        if self.stream.write().unwrap().take().is_some() {
            info!("disconnected from {:?}", self.peer_addr);
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
    )
}
