//! Bounded reuse arena for frame storage.
//!
//! The pool keeps at most `bound` released frames; anything returned past
//! the bound is destroyed immediately, so memory stays bounded even when
//! consumers fall behind the producer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam::utils::CachePadded;
use tracing::debug;

use crate::frame::Frame;

pub const DEFAULT_POOL_SIZE: usize = 3;

#[derive(Default)]
struct Stats {
    acquired: AtomicUsize,
    reused: AtomicUsize,
    destroyed: AtomicUsize,
    alloc_failures: AtomicUsize,
}

pub struct FramePool {
    frames: Mutex<Vec<Frame>>,
    bound: usize,
    stats: CachePadded<Stats>,
}

impl FramePool {
    pub fn new(bound: usize) -> Self {
        Self {
            frames: Mutex::new(Vec::with_capacity(bound)),
            bound,
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Supply a frame with at least `min_bytes` of storage.
    ///
    /// The most recently released frame is preferred; if its allocation is
    /// too small it is pushed to the cold end and fresh storage of exactly
    /// `min_bytes` is allocated. Returns `None` on allocation failure, which
    /// the caller must treat as "drop this frame".
    pub fn acquire(&self, min_bytes: usize) -> Option<Frame> {
        self.stats.acquired.fetch_add(1, Ordering::Relaxed);
        {
            let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(frame) = frames.pop() {
                if frame.capacity() >= min_bytes {
                    self.stats.reused.fetch_add(1, Ordering::Relaxed);
                    return Some(frame);
                }
                // Too small for this stream; park it at the cold end so the
                // next acquire doesn't re-check the same undersized buffer.
                frames.insert(0, frame);
            }
        }
        match Frame::with_capacity(min_bytes) {
            Some(frame) => Some(frame),
            None => {
                self.stats.alloc_failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("pool_alloc_failures").increment(1);
                None
            }
        }
    }

    /// Return a frame to the pool, or destroy its storage when the pool is
    /// already at its bound.
    pub fn release(&self, frame: Frame) {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        if frames.len() < self.bound {
            frames.push(frame);
        } else {
            drop(frames);
            self.stats.destroyed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("pool_frames_destroyed").increment(1);
        }
    }

    /// Allocate `count` buffers of `bytes` up front, once stream geometry is
    /// known, to amortize allocation during steady-state streaming.
    pub fn pre_warm(&self, count: usize, bytes: usize) {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        while frames.len() < count.min(self.bound) {
            match Frame::with_capacity(bytes) {
                Some(frame) => frames.push(frame),
                None => {
                    self.stats.alloc_failures.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
        debug!(occupancy = frames.len(), bytes, "frame pool pre-warmed");
    }

    /// Release all pooled storage (pipeline teardown).
    pub fn drain(&self) {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        self.stats
            .destroyed
            .fetch_add(frames.len(), Ordering::Relaxed);
        frames.clear();
    }

    pub fn occupancy(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// (acquired, reused, destroyed, allocation failures)
    pub fn stats(&self) -> (usize, usize, usize, usize) {
        (
            self.stats.acquired.load(Ordering::Relaxed),
            self.stats.reused.load(Ordering::Relaxed),
            self.stats.destroyed.load(Ordering::Relaxed),
            self.stats.alloc_failures.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupancy_never_exceeds_bound() {
        let pool = FramePool::new(3);
        let frames: Vec<_> = (0..8).filter_map(|_| pool.acquire(128)).collect();
        assert_eq!(frames.len(), 8);
        for frame in frames {
            pool.release(frame);
            assert!(pool.occupancy() <= 3);
        }
        assert_eq!(pool.occupancy(), 3);
    }

    #[test]
    fn reuses_most_recently_released_storage() {
        let pool = FramePool::new(3);
        let frame = pool.acquire(256).unwrap();
        let cap = frame.capacity();
        pool.release(frame);

        let again = pool.acquire(128).unwrap();
        assert!(again.capacity() >= cap);
        let (_, reused, _, _) = pool.stats();
        assert_eq!(reused, 1);
    }

    #[test]
    fn undersized_pooled_frame_triggers_fresh_allocation() {
        let pool = FramePool::new(3);
        let small = pool.acquire(16).unwrap();
        pool.release(small);

        let big = pool.acquire(1024).unwrap();
        assert!(big.capacity() >= 1024);
        // the small frame is still pooled, not leaked
        assert_eq!(pool.occupancy(), 1);
    }

    #[test]
    fn pre_warm_and_drain() {
        let pool = FramePool::new(3);
        pool.pre_warm(3, 512);
        assert_eq!(pool.occupancy(), 3);
        pool.drain();
        assert_eq!(pool.occupancy(), 0);
    }

    #[test]
    fn pre_warm_respects_bound() {
        let pool = FramePool::new(2);
        pool.pre_warm(10, 64);
        assert_eq!(pool.occupancy(), 2);
    }
}
