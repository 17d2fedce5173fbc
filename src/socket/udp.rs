//! The unreliable transport's socket: one bound UDP socket shared by all remote
//!  peers, polled non-blocking. The socket itself is endpoint-agnostic - the
//!  unreliable channel demultiplexes by sender endpoint.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use tokio::net::UdpSocket;
use tracing::info;

use crate::buffers::buffer_pool::{BufferPool, PooledBuf};
use crate::config::NetConfig;
use crate::socket::{DatagramIo, IoPoll};

pub struct DatagramSocket {
    socket: RwLock<Option<UdpSocket>>,
    local_addr: SocketAddr,
    buffer_pool: Arc<BufferPool>,
}

impl DatagramSocket {
    pub async fn bind(addr: SocketAddr, config: &NetConfig) -> anyhow::Result<DatagramSocket> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("listening on {:?}", local_addr);

        Ok(DatagramSocket {
            socket: RwLock::new(Some(socket)),
            local_addr,
            buffer_pool: BufferPool::new(config.receive_buffer_size, config.buffer_pool_size),
        })
    }

    pub fn is_open(&self) -> bool {
        self.socket.read().unwrap().is_some()
    }
}

impl DatagramIo for DatagramSocket {
    fn receive(&self) -> anyhow::Result<IoPoll<(PooledBuf, SocketAddr)>> {
        let guard = self.socket.read().unwrap();
        let socket = match guard.as_ref() {
            Some(socket) => socket,
            None => return Ok(IoPoll::Disconnected),
        };

        let mut buf = self.buffer_pool.rent();
        buf.maximize_len();
        match socket.try_recv_from(buf.as_mut()) {
            Ok((num_read, from)) => {
                buf.truncate(num_read);
                Ok(IoPoll::Data((buf, from)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(IoPoll::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    fn send_to(&self, bytes: &[u8], to: SocketAddr) -> anyhow::Result<IoPoll<usize>> {
        let guard = self.socket.read().unwrap();
        let socket = match guard.as_ref() {
            Some(socket) => socket,
            None => return Ok(IoPoll::Disconnected),
        };

        match socket.try_send_to(bytes, to) {
            Ok(num_written) => Ok(IoPoll::Data(num_written)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(IoPoll::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        if self.socket.write().unwrap().take().is_some() {
            info!("closed datagram socket on {:?}", self.local_addr);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        if self.is_open() {
            Some(self.local_addr)
        }
        else {
            None
        }
    }
}
