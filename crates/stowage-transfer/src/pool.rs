use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::trace;

/// Counters describing how a [`ChunkPool`] has been used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub idle: usize,
}

/// Pool of reusable chunk buffers.
///
/// Every buffer handed out has a length of exactly `chunk_size`. A buffer
/// only comes back through [`release`](Self::release), which its holder calls
/// once the upload that used it has finished, so a buffer is never shared.
/// At most `max_idle` buffers are kept; the rest are freed.
pub struct ChunkPool {
    chunk_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl ChunkPool {
    pub fn new(chunk_size: usize, max_idle: usize) -> Self {
        Self {
            chunk_size,
            max_idle,
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Take an idle buffer or allocate a fresh one.
    pub fn acquire(&self) -> Vec<u8> {
        let reused = self.idle.lock().expect("pool lock poisoned").pop();
        match reused {
            Some(buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                trace!(chunk_size = self.chunk_size, "allocating chunk buffer");
                vec![0u8; self.chunk_size]
            }
        }
    }

    /// Return a buffer. Buffers of the wrong size are dropped.
    pub fn release(&self, buf: Vec<u8>) {
        if buf.len() != self.chunk_size {
            return;
        }
        let mut idle = self.idle.lock().expect("pool lock poisoned");
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            idle: self.idle.lock().expect("pool lock poisoned").len(),
        }
    }
}

impl std::fmt::Debug for ChunkPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPool")
            .field("chunk_size", &self.chunk_size)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_has_chunk_length() {
        let pool = ChunkPool::new(1024, 2);
        assert_eq!(pool.acquire().len(), 1024);
        assert_eq!(pool.stats().allocated, 1);
    }

    #[test]
    fn released_buffer_is_reused() {
        let pool = ChunkPool::new(16, 2);
        let buf = pool.acquire();
        pool.release(buf);
        assert_eq!(pool.stats().idle, 1);

        let _again = pool.acquire();
        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn idle_buffers_are_capped() {
        let pool = ChunkPool::new(8, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn wrong_sized_buffer_is_dropped() {
        let pool = ChunkPool::new(8, 4);
        pool.release(vec![0u8; 3]);
        assert_eq!(pool.stats().idle, 0);
    }
}
