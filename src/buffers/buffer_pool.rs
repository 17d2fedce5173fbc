//! A rent/return pool of fixed-size buffers, shared by the sockets that read into
//!  them. Renting hands out a scoped guard that returns the buffer on drop, on every
//!  exit path - so a panicking or early-returning borrower degrades the pool to
//!  allocation but can never leak or corrupt it.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::buffers::fixed_buffer::FixedBuf;

pub struct BufferPool {
    buf_size: usize,
    buffers: Mutex<Vec<FixedBuf>>,
}

impl BufferPool {
    pub fn new(buf_size: usize, max_pool_size: usize) -> Arc<BufferPool> {
        Arc::new(BufferPool {
            buf_size,
            buffers: Mutex::new(Vec::with_capacity(max_pool_size)),
        })
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// Borrows a buffer for the duration of one I/O call. The returned guard hands
    ///  the buffer back when it goes out of scope.
    pub fn rent(self: &Arc<Self>) -> PooledBuf {
        let buf = {
            let mut buffers = self.buffers.lock().unwrap();
            buffers.pop()
        };

        let buf = match buf {
            Some(buf) => {
                trace!("renting buffer from pool");
                buf
            }
            None => {
                debug!("no buffer in pool: creating new buffer");
                FixedBuf::new(self.buf_size)
            }
        };

        PooledBuf {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    fn give_back(&self, mut buffer: FixedBuf) {
        assert_eq!(
            buffer.capacity(),
            self.buf_size,
            "returned buffer does not have the pool's buffer size of {} bytes",
            self.buf_size
        );

        buffer.clear();

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.capacity() > buffers.len() {
            trace!("returning buffer to pool");
            buffers.push(buffer);
        }
        else {
            debug!("pool is full: discarding returned buffer");
        }
    }

    #[cfg(test)]
    pub fn pooled_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

/// scoped borrow of one pooled buffer
pub struct PooledBuf {
    buf: Option<FixedBuf>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuf {
    type Target = FixedBuf;

    fn deref(&self) -> &FixedBuf {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut FixedBuf {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        self.deref().as_ref()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}
