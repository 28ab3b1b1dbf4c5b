//! The gray work list.
//!
//! An unbounded lock-free MPMC queue of Gray objects. The marker pops from it
//! and pushes newly shaded children; mutators push objects shaded by the
//! write barrier. No ordering is guaranteed or required.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::object::{HeapObject, ObjectId};

/// Who shaded an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadeSource {
    /// Root snapshot or termination re-scan.
    Root,
    /// The marker scanning a Gray object.
    Marker,
    /// A mutator write (or allocation) under the write barrier.
    Barrier,
}

/// Queue of Gray objects awaiting a scan.
#[derive(Debug, Default)]
pub struct MarkQueue {
    queue: SegQueue<ObjectId>,
    barrier_shades: AtomicUsize,
    root_shades: AtomicUsize,
}

impl MarkQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shade `object` White → Gray and enqueue it.
    ///
    /// Returns `false` if the object was already Gray or Black. The
    /// compare-and-swap guarantees exactly one enqueue per object per cycle.
    pub fn shade(&self, object: &HeapObject, source: ShadeSource) -> bool {
        if !object.color().shade() {
            return false;
        }
        self.queue.push(object.id());
        match source {
            ShadeSource::Barrier => {
                self.barrier_shades.fetch_add(1, Ordering::Relaxed);
            }
            ShadeSource::Root => {
                self.root_shades.fetch_add(1, Ordering::Relaxed);
            }
            ShadeSource::Marker => {}
        }
        true
    }

    /// Take one Gray object.
    pub fn pop(&self) -> Option<ObjectId> {
        self.queue.pop()
    }

    /// Number of queued objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Objects shaded by the write barrier since the last reset.
    #[must_use]
    pub fn barrier_shades(&self) -> usize {
        self.barrier_shades.load(Ordering::Relaxed)
    }

    /// Objects shaded as roots since the last reset.
    #[must_use]
    pub fn root_shades(&self) -> usize {
        self.root_shades.load(Ordering::Relaxed)
    }

    /// Drop any queued work and zero the counters.
    pub fn reset(&self) {
        while self.queue.pop().is_some() {}
        self.barrier_shades.store(0, Ordering::Relaxed);
        self.root_shades.store(0, Ordering::Relaxed);
    }
}
