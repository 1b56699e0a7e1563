//! Bounded Receive Queue
//!
//! A fixed-capacity ring of decoded subframes shared between the receive
//! worker (sole producer) and the caller's `recv` path (sole consumer),
//! guarded by one mutex with a condition variable signaling arrivals.
//!
//! The overflow policy is overwrite-oldest: a full ring drops its oldest
//! unread entry rather than blocking the producer, a real-time source
//! must keep draining the transport even when the consumer stalls.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::wire::IqFrame;

/// Ring storage, only ever touched through the owning queue's mutex.
#[derive(Debug)]
pub struct Ring {
    slots: VecDeque<IqFrame>,
    capacity: usize,
}

impl Ring {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries oldest first, the order the consumer drains them in.
    pub fn iter(&self) -> impl Iterator<Item = &IqFrame> {
        self.slots.iter()
    }

    /// Remove and return the oldest entry.
    pub fn pop_oldest(&mut self) -> Option<IqFrame> {
        self.slots.pop_front()
    }

    fn push_evict(&mut self, frame: IqFrame) -> Option<u64> {
        let mut evicted = None;
        if self.slots.len() == self.capacity {
            evicted = self.slots.pop_front().map(|f| f.header.seqnum);
        }
        self.slots.push_back(frame);
        evicted
    }
}

/// The concurrent subframe queue, mutex plus condition variable.
#[derive(Debug)]
pub struct SubframeQueue {
    ring: Mutex<Ring>,
    ready: Condvar,
}

impl SubframeQueue {
    /// Capacity is validated by device configuration before reaching here.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                slots: VecDeque::with_capacity(capacity),
                capacity,
            }),
            ready: Condvar::new(),
        }
    }

    /// Producer side: enqueue, evicting the oldest entry on overflow, and
    /// wake one blocked consumer.
    pub fn push(&self, frame: IqFrame) {
        let mut ring = self.lock();
        if let Some(seqnum) = ring.push_evict(frame) {
            debug!(seqnum, "rx queue full, oldest subframe evicted");
        }
        debug!(queued = ring.len(), "rx subframe queued");
        drop(ring);
        self.ready.notify_one();
    }

    /// Consumer side: take the lock for a scan-and-drain pass.
    pub fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park the consumer until the producer signals a new arrival.
    pub fn wait<'a>(&'a self, guard: MutexGuard<'a, Ring>) -> MutexGuard<'a, Ring> {
        self.ready
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}
