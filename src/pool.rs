//! Size-classed byte buffer pool
//!
//! Buffers are bucketed into 16 power-of-two size classes, class `i` holding
//! buffers with a capacity of exactly `2^i` bytes (1 byte up to 32 KiB). Each
//! class is an independent lock-free `ArrayQueue`, so acquiring and releasing
//! never blocks no matter how many sessions share the pool.
//!
//! A buffer whose capacity is not a power of two was resized by its user and
//! is dropped on release instead of being pooled.
//!
//! # Example
//!
//! ```
//! use socks5d::pool::BufferPool;
//!
//! let pool = BufferPool::new(8);
//! let buf = pool.acquire(100, 0);
//! assert_eq!(buf.len(), 100);
//! assert_eq!(buf.capacity(), 128);
//! drop(buf);
//! assert_eq!(pool.stats().returns, 1);
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

/// Number of size classes
pub const NUM_CLASSES: usize = 16;

/// Capacity of the largest size class
pub const MAX_CLASS_SIZE: usize = 1 << (NUM_CLASSES - 1);

/// Buffers kept per size class by the global pool
pub const DEFAULT_CLASS_DEPTH: usize = 256;

static GLOBAL: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(DEFAULT_CLASS_DEPTH));

/// acquire takes a buffer from the process wide pool
pub fn acquire(size: usize, min_capacity: usize) -> PooledBuf<'static> {
    GLOBAL.acquire(size, min_capacity)
}

/// release hands a buffer back to the process wide pool
pub fn release(buf: Vec<u8>) {
    GLOBAL.release(buf)
}

/// Counters describing how the pool has been used
#[derive(Debug, Default)]
struct PoolStats {
    allocations: AtomicU64,
    reuses: AtomicU64,
    returns: AtomicU64,
    discards: AtomicU64,
}

/// Point in time copy of the pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Buffers freshly allocated because their class was empty
    pub allocations: u64,
    /// Buffers handed out from a class
    pub reuses: u64,
    /// Buffers accepted back into a class
    pub returns: u64,
    /// Buffers dropped on release (bad capacity, oversized, or class full)
    pub discards: u64,
}

/// BufferPool holds one lock-free queue per power-of-two size class
#[derive(Debug)]
pub struct BufferPool {
    classes: Vec<ArrayQueue<Vec<u8>>>,
    stats: PoolStats,
}

impl BufferPool {
    /// new builds a pool keeping up to `depth` idle buffers per class
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            classes: (0..NUM_CLASSES).map(|_| ArrayQueue::new(depth)).collect(),
            stats: PoolStats::default(),
        }
    }

    /// acquire returns a buffer of length `size` whose capacity is the
    /// smallest power of two covering both `size` and `min_capacity`
    pub fn acquire(&self, size: usize, min_capacity: usize) -> PooledBuf<'_> {
        let wanted = size.max(min_capacity);
        let index = class_index(wanted);

        let mut buf = match self.classes.get(index) {
            Some(class) => match class.pop() {
                Some(buf) => {
                    self.stats.reuses.fetch_add(1, Ordering::Relaxed);
                    buf
                }
                None => {
                    self.stats.allocations.fetch_add(1, Ordering::Relaxed);
                    Vec::with_capacity(1 << index)
                }
            },
            // Larger than any class: serve it unpooled
            None => {
                self.stats.allocations.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(wanted.next_power_of_two())
            }
        };

        buf.resize(size, 0);

        PooledBuf {
            buf: Some(buf),
            pool: self,
        }
    }

    /// release resets the buffer length and files it under `log2(capacity)`.
    /// Buffers with any other capacity are dropped
    pub fn release(&self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if !capacity.is_power_of_two() {
            self.stats.discards.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Some(class) = self.classes.get(capacity.trailing_zeros() as usize) else {
            self.stats.discards.fetch_add(1, Ordering::Relaxed);
            return;
        };

        buf.clear();
        match class.push(buf) {
            Ok(()) => self.stats.returns.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.discards.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// stats snapshots the pool counters
    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            allocations: self.stats.allocations.load(Ordering::Relaxed),
            reuses: self.stats.reuses.load(Ordering::Relaxed),
            returns: self.stats.returns.load(Ordering::Relaxed),
            discards: self.stats.discards.load(Ordering::Relaxed),
        }
    }
}

/// class_index returns ceil(log2(n)), with 0 mapped to class 0
fn class_index(n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    if n.is_power_of_two() {
        return n.trailing_zeros() as usize;
    }
    (usize::BITS - n.leading_zeros()) as usize
}

/// PooledBuf is a pooled buffer that goes back to its pool when dropped,
/// including during unwinding
#[derive(Debug)]
pub struct PooledBuf<'a> {
    buf: Option<Vec<u8>>,
    pool: &'a BufferPool,
}

impl PooledBuf<'_> {
    /// into_inner detaches the buffer from the pool. Hand it back with
    /// [`BufferPool::release`] when done
    pub fn into_inner(mut self) -> Vec<u8> {
        self.buf.take().unwrap_or_default()
    }
}

impl Deref for PooledBuf<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        // Only empty after into_inner, which consumes self
        self.buf.as_ref().map_or(&EMPTY, |buf| buf)
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.get_or_insert_with(Vec::new)
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

static EMPTY: Vec<u8> = Vec::new();
