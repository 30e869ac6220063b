//! Reusable copy buffers
//!
//! A [`BufferPool`] hands out fixed-size buffers that return to the pool when
//! the [`PooledBuffer`] guard is dropped. The pool keeps at most `capacity`
//! idle buffers; extra ones are freed on release.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::io::{self, ErrorKind, Read};
use std::ops::{Deref, DerefMut};

/// Size of buffers in the shared pool
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Idle buffers kept by the shared pool
pub const DEFAULT_POOL_CAPACITY: usize = 16;

static SHARED: Lazy<BufferPool> = Lazy::new(|| BufferPool::new(DEFAULT_POOL_CAPACITY));

/// Pool of equally sized byte buffers
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
    capacity: usize,
    buffer_size: usize,
}

impl BufferPool {
    /// Create pool of [`BUFFER_SIZE`] buffers
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_buffer_size(capacity, BUFFER_SIZE)
    }

    /// Create pool with a custom buffer size
    #[must_use]
    pub fn with_buffer_size(capacity: usize, buffer_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            buffer_size,
        }
    }

    /// Process-wide pool
    #[inline]
    #[must_use]
    pub fn shared() -> &'static Self {
        &SHARED
    }

    /// Take a buffer, allocating if none is idle
    #[must_use]
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size].into_boxed_slice());
        PooledBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    /// Idle buffers currently held
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Size of each buffer
    #[inline]
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn release(&self, buf: Box<[u8]>) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }
}

/// Buffer on loan from a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Box<[u8]>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

/// Read once from `src` into `buf`, retrying interrupted reads
///
/// Returns `0` at end of stream.
///
/// # Errors
/// Any read error other than [`ErrorKind::Interrupted`]
pub fn read_some<R>(src: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: Read + ?Sized,
{
    loop {
        match src.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_return_on_drop() {
        let pool = BufferPool::new(2);
        assert_eq!(pool.available(), 0);
        {
            let a = pool.acquire();
            let b = pool.acquire();
            let c = pool.acquire();
            assert_eq!(a.len(), BUFFER_SIZE);
            drop((a, b, c));
        }
        assert_eq!(pool.available(), 2);

        let _reused = pool.acquire();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn read_some_streams_everything() {
        let pool = BufferPool::with_buffer_size(1, 7);
        let data: Vec<u8> = (0..100u8).collect();
        let mut src = data.as_slice();
        let mut out = Vec::new();
        {
            let mut buf = pool.acquire();
            loop {
                let n = read_some(&mut src, &mut buf).unwrap();
                if n == 0 {
                    break;
                }
                assert!(n <= 7);
                out.extend_from_slice(&buf[..n]);
            }
        }
        assert_eq!(out, data);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn shared_pool_uses_default_size() {
        assert_eq!(BufferPool::shared().buffer_size(), BUFFER_SIZE);
    }
}
