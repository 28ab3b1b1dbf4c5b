//! Object storage.
//!
//! The heap is a slab of slots. Each slot holds at most one object and a
//! generation counter; reclaimed slots go back to a free pool and are reused
//! by later allocations. Objects are reference counted internally so that the
//! marker and mutators can work on an object without holding the slab lock.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::color::Color;
use crate::object::{HeapObject, ObjectId};

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<Arc<HeapObject>>,
}

/// Outcome of sweeping one batch of slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepBatch {
    /// Objects reclaimed in this batch.
    pub reclaimed: usize,
    /// Objects retained in this batch.
    pub surviving: usize,
    /// Slots examined.
    pub slots_scanned: usize,
}

/// Index for a slot pushed onto a slab of `len` slots, or `None` once
/// handles can no longer address it.
fn slot_index(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

/// The slab owning every heap object.
#[derive(Debug)]
pub struct Heap {
    slots: RwLock<Vec<Slot>>,
    free: Mutex<Vec<u32>>,
    live: AtomicUsize,
    capacity: AtomicUsize,
    total_allocated: AtomicU64,
    total_reclaimed: AtomicU64,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Heap {
    /// Create an empty heap holding at most `capacity` objects.
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity.unwrap_or(usize::MAX)),
            total_allocated: AtomicU64::new(0),
            total_reclaimed: AtomicU64::new(0),
        }
    }

    /// Change the object capacity. Existing objects are never evicted.
    pub fn set_capacity(&self, capacity: Option<usize>) {
        self.capacity
            .store(capacity.unwrap_or(usize::MAX), Ordering::Release);
    }

    /// Configured capacity, `None` when unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        match self.capacity.load(Ordering::Acquire) {
            usize::MAX => None,
            n => Some(n),
        }
    }

    /// Number of live (not yet reclaimed) objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Returns `true` if the heap holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, occupied or free.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Objects allocated since the heap was created.
    #[must_use]
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated.load(Ordering::Relaxed)
    }

    /// Objects reclaimed since the heap was created.
    #[must_use]
    pub fn total_reclaimed(&self) -> u64 {
        self.total_reclaimed.load(Ordering::Relaxed)
    }

    /// Store a new object, or return `None` if the heap is full.
    pub(crate) fn insert(
        &self,
        fields: Box<[Option<ObjectId>]>,
        color: Color,
        epoch: u64,
    ) -> Option<Arc<HeapObject>> {
        let cap = self.capacity.load(Ordering::Acquire);
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < cap).then_some(n + 1)
            })
            .ok()?;

        // The free pool lock is never held while the slab lock is taken.
        let reused = self.free.lock().pop();

        let mut slots = self.slots.write();
        let index = match reused {
            Some(index) => index,
            None => {
                let Some(index) = slot_index(slots.len()) else {
                    drop(slots);
                    self.live.fetch_sub(1, Ordering::AcqRel);
                    return None;
                };
                slots.push(Slot::default());
                index
            }
        };
        let slot = &mut slots[index as usize];
        let id = ObjectId::new(index, slot.generation);
        let object = Arc::new(HeapObject::new(id, fields, color, epoch));
        slot.object = Some(Arc::clone(&object));
        drop(slots);

        self.total_allocated.fetch_add(1, Ordering::Relaxed);
        Some(object)
    }

    /// Look up a live object.
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<Arc<HeapObject>> {
        let slots = self.slots.read();
        let slot = slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.object.clone()
    }

    /// Returns `true` if `id` names a live object.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        let slots = self.slots.read();
        slots
            .get(id.index())
            .is_some_and(|slot| slot.generation == id.generation() && slot.object.is_some())
    }

    /// Snapshot of every live object.
    #[must_use]
    pub fn objects(&self) -> Vec<Arc<HeapObject>> {
        self.slots
            .read()
            .iter()
            .filter_map(|slot| slot.object.clone())
            .collect()
    }

    /// Reclaim White objects in `range` that were not allocated in `epoch`,
    /// and reset every survivor to White.
    pub(crate) fn sweep_range(&self, range: std::ops::Range<usize>, epoch: u64) -> SweepBatch {
        let mut batch = SweepBatch::default();
        let mut freed = Vec::new();

        let mut slots = self.slots.write();
        let end = range.end.min(slots.len());
        for index in range.start.min(end)..end {
            batch.slots_scanned += 1;
            let slot = &mut slots[index];
            let Some(object) = slot.object.as_ref() else {
                continue;
            };
            let garbage = object.color().load() == Color::White && object.epoch() != epoch;
            if garbage {
                slot.object = None;
                slot.generation = slot.generation.wrapping_add(1);
                #[allow(clippy::cast_possible_truncation)]
                freed.push(index as u32);
                batch.reclaimed += 1;
            } else {
                object.color().store(Color::White);
                batch.surviving += 1;
            }
        }
        drop(slots);

        if !freed.is_empty() {
            self.live.fetch_sub(freed.len(), Ordering::AcqRel);
            self.total_reclaimed
                .fetch_add(freed.len() as u64, Ordering::Relaxed);
            self.free.lock().extend(freed);
        }
        batch
    }

    /// Force every object back to White. Used when a cycle is abandoned.
    pub(crate) fn whiten_all(&self) {
        for slot in self.slots.read().iter() {
            if let Some(object) = &slot.object {
                object.color().store(Color::White);
            }
        }
    }
}
