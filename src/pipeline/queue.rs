//! Fixed-capacity hand-off primitives for the frame pipeline.
//!
//! Both structures share the same contract: producers never block, bounds
//! are hard, displaced frames go back to the pool, and consumers wait on a
//! condition variable that a cooperative stop can wake.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crossbeam::utils::CachePadded;

use crate::frame::Frame;
use crate::pool::FramePool;

#[derive(Default)]
struct Stats {
    pushed: AtomicUsize,
    popped: AtomicUsize,
    dropped: AtomicUsize,
}

struct QueueInner {
    frames: VecDeque<Frame>,
    open: bool,
}

/// Ordered hand-off of at most `capacity` frames for the render loop.
/// When full, the oldest entry is displaced and recycled so the device
/// callback never waits.
pub struct BoundedQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
    capacity: usize,
    stats: CachePadded<Stats>,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity.max(1)),
                open: true,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Insert a frame, displacing and recycling the oldest when full.
    /// If the queue is closed the frame goes straight back to the pool.
    pub fn push(&self, frame: Frame, pool: &FramePool) {
        let displaced = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !inner.open {
                drop(inner);
                pool.release(frame);
                return;
            }
            let displaced = if inner.frames.len() >= self.capacity {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("preview_frames_dropped").increment(1);
                inner.frames.pop_front()
            } else {
                None
            };
            inner.frames.push_back(frame);
            self.stats.pushed.fetch_add(1, Ordering::Relaxed);
            self.ready.notify_one();
            displaced
        };
        if let Some(old) = displaced {
            pool.release(old);
        }
    }

    /// Block until a frame arrives or the queue is closed. A `None` return
    /// means the caller should re-check its running flag.
    pub fn wait_pop(&self) -> Option<Frame> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner = self
            .ready
            .wait_while(inner, |q| q.open && q.frames.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        let frame = inner.frames.pop_front();
        if frame.is_some() {
            self.stats.popped.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Like [`wait_pop`](Self::wait_pop) but gives up after `timeout`, so a
    /// consumer can run periodic bookkeeping while the producer is stalled.
    pub fn wait_pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (mut inner, _timed_out) = self
            .ready
            .wait_timeout_while(inner, timeout, |q| q.open && q.frames.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        let frame = inner.frames.pop_front();
        if frame.is_some() {
            self.stats.popped.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Wake all waiters and refuse further insertions.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.open = false;
        self.ready.notify_all();
    }

    pub fn reopen(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.open = true;
    }

    /// Recycle everything still queued.
    pub fn flush(&self, pool: &FramePool) {
        let drained: Vec<Frame> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.frames.drain(..).collect()
        };
        for frame in drained {
            pool.release(frame);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frames
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (pushed, popped, dropped)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.pushed.load(Ordering::Relaxed),
            self.stats.popped.load(Ordering::Relaxed),
            self.stats.dropped.load(Ordering::Relaxed),
        )
    }
}

struct SlotInner {
    frame: Option<Frame>,
    open: bool,
}

/// Keep-latest mailbox feeding the capture/delivery loop. Publishing
/// replaces and recycles whatever was pending.
pub struct PendingSlot {
    inner: Mutex<SlotInner>,
    ready: Condvar,
    superseded: CachePadded<AtomicUsize>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                frame: None,
                open: true,
            }),
            ready: Condvar::new(),
            superseded: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, frame: Frame, pool: &FramePool) {
        let displaced = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !inner.open {
                drop(inner);
                pool.release(frame);
                return;
            }
            let displaced = inner.frame.replace(frame);
            if displaced.is_some() {
                self.superseded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("capture_frames_superseded").increment(1);
            }
            self.ready.notify_all();
            displaced
        };
        if let Some(old) = displaced {
            pool.release(old);
        }
    }

    pub fn wait_pop(&self) -> Option<Frame> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner = self
            .ready
            .wait_while(inner, |s| s.open && s.frame.is_none())
            .unwrap_or_else(|e| e.into_inner());
        inner.frame.take()
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.open = false;
        self.ready.notify_all();
    }

    pub fn reopen(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.open = true;
    }

    pub fn flush(&self, pool: &FramePool) {
        let frame = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.frame.take()
        };
        if let Some(frame) = frame {
            pool.release(frame);
        }
    }

    pub fn superseded(&self) -> usize {
        self.superseded.load(Ordering::Relaxed)
    }
}

impl Default for PendingSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(seq: u64) -> Frame {
        let mut f = Frame::new(2, 2, PixelFormat::Yuyv, vec![0; 8]);
        f.sequence = seq;
        f
    }

    #[test]
    fn queue_depth_never_exceeds_capacity() {
        let pool = FramePool::new(3);
        let queue = BoundedQueue::new(1);
        for seq in 0..10 {
            queue.push(frame(seq), &pool);
            assert!(queue.len() <= 1);
        }
        let (pushed, _, dropped) = queue.stats();
        assert_eq!(pushed, 10);
        assert_eq!(dropped, 9);
        // the survivor is the newest frame
        assert_eq!(queue.wait_pop().unwrap().sequence, 9);
    }

    #[test]
    fn displaced_frames_return_to_pool() {
        let pool = FramePool::new(3);
        let queue = BoundedQueue::new(1);
        queue.push(frame(0), &pool);
        queue.push(frame(1), &pool);
        assert_eq!(pool.occupancy(), 1);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(BoundedQueue::new(1));
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.wait_pop())
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.close();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn timed_wait_returns_none_on_an_idle_queue() {
        let pool = FramePool::new(3);
        let queue = BoundedQueue::new(1);
        assert!(queue.wait_pop_timeout(Duration::from_millis(20)).is_none());
        queue.push(frame(1), &pool);
        assert_eq!(
            queue
                .wait_pop_timeout(Duration::from_millis(20))
                .unwrap()
                .sequence,
            1
        );
    }

    #[test]
    fn closed_queue_recycles_incoming_frames() {
        let pool = FramePool::new(3);
        let queue = BoundedQueue::new(1);
        queue.close();
        queue.push(frame(0), &pool);
        assert!(queue.is_empty());
        assert_eq!(pool.occupancy(), 1);
    }

    #[test]
    fn slot_keeps_only_the_latest() {
        let pool = FramePool::new(3);
        let slot = PendingSlot::new();
        slot.publish(frame(1), &pool);
        slot.publish(frame(2), &pool);
        slot.publish(frame(3), &pool);
        assert_eq!(slot.superseded(), 2);
        assert_eq!(pool.occupancy(), 2);
        assert_eq!(slot.wait_pop().unwrap().sequence, 3);
    }

    #[test]
    fn slot_close_wakes_waiter() {
        let slot = Arc::new(PendingSlot::new());
        let waiter = {
            let slot = slot.clone();
            std::thread::spawn(move || slot.wait_pop())
        };
        std::thread::sleep(Duration::from_millis(50));
        slot.close();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn ordering_is_preserved_for_retained_frames() {
        let pool = FramePool::new(4);
        let queue = BoundedQueue::new(3);
        for seq in 0..3 {
            queue.push(frame(seq), &pool);
        }
        for seq in 0..3 {
            assert_eq!(queue.wait_pop().unwrap().sequence, seq);
        }
    }
}
