//! Fixed-capacity pool of reusable frame storage.
//!
//! The pool is the only resource shared between the capture and render
//! contexts. `acquire` never blocks: when all slots are owned it returns
//! [`PoolError::Busy`] and the caller drops the incoming frame. Buffers are
//! returned either explicitly via [`FrameBufferPool::release`] or implicitly
//! when a [`FrameBuffer`] is dropped mid-flight, so a torn-down stage can
//! never leak a slot.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crossbeam::utils::CachePadded;

use crate::error::PoolError;

/// Reusable frame storage with atomic slot accounting.
#[derive(Clone)]
pub struct FrameBufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    slots: Mutex<Vec<Slot>>,
    stats: CachePadded<PoolStats>,
}

enum Slot {
    /// Holds the slot's storage between acquisitions. Contents are whatever
    /// the previous writer left; they are NOT zeroed.
    Free(Vec<u8>),
    Owned,
}

#[derive(Default)]
struct PoolStats {
    acquired: AtomicU64,
    released: AtomicU64,
    rejected: AtomicU64,
    invalid_releases: AtomicU64,
}

/// Exclusive handle to one pool slot's storage.
///
/// Dropping the handle returns the slot to the pool.
pub struct FrameBuffer {
    data: Vec<u8>,
    slot: usize,
    pool: Weak<PoolInner>,
}

impl FrameBufferPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pool capacity must be at least 1");
        let slots = (0..capacity).map(|_| Slot::Free(Vec::new())).collect();
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(slots),
                stats: CachePadded::new(PoolStats::default()),
            }),
        }
    }

    /// Acquire a free slot sized to `len` bytes.
    ///
    /// Returns immediately with [`PoolError::Busy`] when all slots are owned.
    /// Reused storage keeps its previous contents; the consumer must fully
    /// overwrite it.
    pub fn acquire(&self, len: usize) -> Result<FrameBuffer, PoolError> {
        let mut slots = lock(&self.inner.slots);
        for (index, slot) in slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Free(_)) {
                let Slot::Free(mut data) = std::mem::replace(slot, Slot::Owned) else {
                    unreachable!()
                };
                drop(slots);
                if data.len() != len {
                    data.resize(len, 0);
                }
                self.inner.stats.acquired.fetch_add(1, Ordering::Relaxed);
                return Ok(FrameBuffer {
                    data,
                    slot: index,
                    pool: Arc::downgrade(&self.inner),
                });
            }
        }
        drop(slots);
        self.inner.stats.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pool_acquire_rejected").increment(1);
        Err(PoolError::Busy)
    }

    /// Return a buffer to the pool.
    ///
    /// Fails with [`PoolError::InvalidRelease`] if the buffer belongs to a
    /// different pool. Double release is prevented by move semantics.
    pub fn release(&self, mut buf: FrameBuffer) -> Result<(), PoolError> {
        if !std::ptr::eq(buf.pool.as_ptr(), Arc::as_ptr(&self.inner)) {
            self.inner
                .stats
                .invalid_releases
                .fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::InvalidRelease);
        }
        let data = std::mem::take(&mut buf.data);
        let slot = buf.slot;
        // Detach so the handle's Drop does not reclaim a second time.
        buf.pool = Weak::new();
        self.inner.reclaim(slot, data)
    }

    pub fn capacity(&self) -> usize {
        lock(&self.inner.slots).len()
    }

    /// Number of slots currently owned by some stage.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.slots)
            .iter()
            .filter(|s| matches!(s, Slot::Owned))
            .count()
    }

    /// (acquired, released, rejected, invalid_releases)
    pub fn stats(&self) -> (u64, u64, u64, u64) {
        let s = &self.inner.stats;
        (
            s.acquired.load(Ordering::Relaxed),
            s.released.load(Ordering::Relaxed),
            s.rejected.load(Ordering::Relaxed),
            s.invalid_releases.load(Ordering::Relaxed),
        )
    }
}

impl PoolInner {
    fn reclaim(&self, slot: usize, data: Vec<u8>) -> Result<(), PoolError> {
        let mut slots = lock(&self.slots);
        match slots.get(slot) {
            Some(Slot::Owned) => {
                slots[slot] = Slot::Free(data);
                self.stats.released.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            _ => {
                self.stats.invalid_releases.fetch_add(1, Ordering::Relaxed);
                Err(PoolError::InvalidRelease)
            }
        }
    }
}

fn lock(slots: &Mutex<Vec<Slot>>) -> std::sync::MutexGuard<'_, Vec<Slot>> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

impl Deref for FrameBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for FrameBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let _ = pool.reclaim(self.slot, std::mem::take(&mut self.data));
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("slot", &self.slot)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_up_to_capacity_then_busy() {
        let pool = FrameBufferPool::new(2);
        let a = pool.acquire(16).unwrap();
        let b = pool.acquire(16).unwrap();
        assert_eq!(pool.in_flight(), 2);
        assert!(matches!(pool.acquire(16), Err(PoolError::Busy)));
        drop(a);
        drop(b);
    }

    #[test]
    fn release_frees_slot_for_reacquire() {
        let pool = FrameBufferPool::new(1);
        let buf = pool.acquire(8).unwrap();
        pool.release(buf).unwrap();
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.acquire(8).is_ok());
    }

    #[test]
    fn drop_reclaims_slot() {
        let pool = FrameBufferPool::new(1);
        {
            let _buf = pool.acquire(8).unwrap();
            assert_eq!(pool.in_flight(), 1);
        }
        assert_eq!(pool.in_flight(), 0);
        let (acquired, released, _, invalid) = pool.stats();
        assert_eq!(acquired, 1);
        assert_eq!(released, 1);
        assert_eq!(invalid, 0);
    }

    #[test]
    fn release_to_wrong_pool_is_invalid() {
        let pool_a = FrameBufferPool::new(1);
        let pool_b = FrameBufferPool::new(1);
        let buf = pool_a.acquire(8).unwrap();
        assert_eq!(pool_b.release(buf), Err(PoolError::InvalidRelease));
        // The handle was consumed; its Drop still returns the slot to pool_a.
        assert_eq!(pool_a.in_flight(), 0);
    }

    #[test]
    fn reused_buffers_are_not_zeroed() {
        let pool = FrameBufferPool::new(1);
        let mut buf = pool.acquire(4).unwrap();
        buf.copy_from_slice(&[0xAA; 4]);
        pool.release(buf).unwrap();
        let buf = pool.acquire(4).unwrap();
        assert_eq!(&buf[..], &[0xAA; 4]);
    }

    #[test]
    fn resize_on_reacquire_keeps_prefix() {
        let pool = FrameBufferPool::new(1);
        let mut buf = pool.acquire(2).unwrap();
        buf.copy_from_slice(&[1, 2]);
        drop(buf);
        let buf = pool.acquire(4).unwrap();
        assert_eq!(buf.len(), 4);
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn concurrent_acquire_never_exceeds_capacity() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pool = FrameBufferPool::new(3);
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let peak = peak.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Ok(buf) = pool.acquire(64) {
                            peak.fetch_max(pool.in_flight(), Ordering::Relaxed);
                            pool.release(buf).unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(peak.load(Ordering::Relaxed) <= 3);
        assert_eq!(pool.in_flight(), 0);
        let (acquired, released, _, invalid) = pool.stats();
        assert_eq!(acquired, released);
        assert_eq!(invalid, 0);
    }
}
