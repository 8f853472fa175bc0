//! Recycle pool for stream buffers
//!
//! The stream's worker thread checks buffers out, the output callback path
//! returns them. Both sides go through one short mutex so the hand-off never
//! waits on decoding. Counters make the steady state observable: once warmed
//! up, `allocations` stops moving and every acquire is a reuse.

use super::buffer::{Buffer, BufferFlags};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Format every pooled buffer shares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per buffer (one packet)
    pub capacity: usize,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub allocations: u64,
    pub reuses: u64,
    pub discards: u64,
    pub free: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    format: Option<PoolFormat>,
    free: Vec<Buffer>,
}

/// Free list of same-format buffers
#[derive(Debug, Default)]
pub struct BufferPool {
    state: Mutex<PoolState>,
    allocations: AtomicU64,
    reuses: AtomicU64,
    discards: AtomicU64,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `format` and make sure `count` buffers are on hand
    ///
    /// Buffers of a previous format are dropped; buffers still in flight
    /// are discarded when they come back.
    pub fn configure(&self, format: PoolFormat, count: usize) {
        let mut state = self.state.lock();
        if state.format != Some(format) {
            let dropped = state.free.len() as u64;
            state.free.clear();
            state.format = Some(format);
            self.discards.fetch_add(dropped, Ordering::Relaxed);
        }
        while state.free.len() < count {
            state.free.push(self.allocate(format));
        }
    }

    pub fn format(&self) -> Option<PoolFormat> {
        self.state.lock().format
    }

    /// Take a buffer, allocating when the free list is empty
    ///
    /// Returns `None` until the pool has a format.
    pub fn acquire(&self) -> Option<Buffer> {
        let mut state = self.state.lock();
        let format = state.format?;
        match state.free.pop() {
            Some(buffer) => {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                Some(buffer)
            }
            None => Some(self.allocate(format)),
        }
    }

    /// Take a buffer only if one is free
    pub fn try_acquire(&self) -> Option<Buffer> {
        let buffer = self.state.lock().free.pop()?;
        self.reuses.fetch_add(1, Ordering::Relaxed);
        Some(buffer)
    }

    /// Return a buffer
    ///
    /// Kept only if it is pool-owned and matches the current format.
    pub fn release(&self, mut buffer: Buffer) {
        let mut state = self.state.lock();
        let keep = buffer.flags().contains(BufferFlags::NO_DELETE)
            && state.format.is_some_and(|f| {
                buffer.has_format(f.sample_rate, f.channels) && buffer.capacity() == f.capacity
            });
        if keep {
            buffer.clear();
            state.free.push(buffer);
        } else {
            drop(state);
            self.discards.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
            free: self.state.lock().free.len(),
        }
    }

    fn allocate(&self, format: PoolFormat) -> Buffer {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Buffer::pooled(format.capacity, format.sample_rate, format.channels)
    }
}
