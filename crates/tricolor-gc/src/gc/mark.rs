//! The mark phase.
//!
//! Marking drains the [`MarkQueue`]: each popped Gray object has its fields
//! scanned (White children are shaded) and is then blackened. Work is done in
//! slices so the driver can yield between them, and a slice may be spread
//! over several worker threads sharing the queue.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::Backoff;

use crate::color::Color;
use crate::gc::mark_queue::{MarkQueue, ShadeSource};
use crate::heap::Heap;
use crate::object::{HeapObject, ObjectId};

/// Outcome of one marking slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkSliceResult {
    /// The budget ran out with work still queued.
    Pending {
        /// Objects blackened in this slice.
        objects_marked: usize,
        /// Gray objects still queued.
        remaining: usize,
    },
    /// The queue was empty when the slice ended. Marking may still be
    /// incomplete until termination confirms it with mutators stopped.
    Drained {
        /// Objects blackened in this slice.
        objects_marked: usize,
    },
}

impl MarkSliceResult {
    /// Objects blackened in this slice.
    #[must_use]
    pub const fn objects_marked(&self) -> usize {
        match *self {
            Self::Pending { objects_marked, .. } | Self::Drained { objects_marked } => {
                objects_marked
            }
        }
    }
}

/// Scan a Gray object's fields and blacken it.
///
/// Returns `false` if the object was not Gray, which happens only when it
/// was already scanned.
pub fn scan_object(heap: &Heap, queue: &MarkQueue, object: &HeapObject) -> bool {
    let fields = object.read_fields();
    for child in fields.iter().flatten() {
        if let Some(child) = heap.get(*child) {
            queue.shade(&child, ShadeSource::Marker);
        }
    }
    // Blackened while the field lock is held; see `gc::barrier`.
    let blackened = object.color().blacken();
    drop(fields);
    blackened
}

/// Blacken up to `budget` queued objects on the calling thread.
pub fn drain(heap: &Heap, queue: &MarkQueue, budget: usize) -> usize {
    let mut marked = 0;
    while marked < budget {
        let Some(id) = queue.pop() else {
            break;
        };
        if let Some(object) = heap.get(id) {
            if scan_object(heap, queue, &object) {
                marked += 1;
            }
        }
    }
    marked
}

/// Run one marking slice of roughly `budget` objects with `workers` threads.
pub fn mark_slice(heap: &Heap, queue: &MarkQueue, budget: usize, workers: usize) -> MarkSliceResult {
    let objects_marked = if workers <= 1 {
        drain(heap, queue, budget)
    } else {
        drain_parallel(heap, queue, budget, workers)
    };

    if queue.is_empty() {
        MarkSliceResult::Drained { objects_marked }
    } else {
        MarkSliceResult::Pending {
            objects_marked,
            remaining: queue.len(),
        }
    }
}

fn drain_parallel(heap: &Heap, queue: &MarkQueue, budget: usize, workers: usize) -> usize {
    let share = budget.div_ceil(workers);
    let active = AtomicUsize::new(0);
    let marked = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                let backoff = Backoff::new();
                let mut done = 0;
                while done < share {
                    active.fetch_add(1, Ordering::SeqCst);
                    if let Some(id) = queue.pop() {
                        if let Some(object) = heap.get(id) {
                            if scan_object(heap, queue, &object) {
                                done += 1;
                            }
                        }
                        active.fetch_sub(1, Ordering::SeqCst);
                        backoff.reset();
                        continue;
                    }
                    let others = active.fetch_sub(1, Ordering::SeqCst) - 1;
                    // Another worker may still push children.
                    if others == 0 || backoff.is_completed() {
                        break;
                    }
                    backoff.snooze();
                }
                marked.fetch_add(done, Ordering::Relaxed);
            });
        }
    });

    marked.into_inner()
}

/// Find a Black object holding a reference to a White object.
pub fn find_black_to_white(heap: &Heap) -> Option<(ObjectId, ObjectId)> {
    for object in heap.objects() {
        if object.color().load() != Color::Black {
            continue;
        }
        for child in object.references() {
            let white = heap
                .get(child)
                .is_some_and(|c| c.color().load() == Color::White);
            if white {
                return Some((object.id(), child));
            }
        }
    }
    None
}
