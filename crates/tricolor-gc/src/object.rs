//! Heap objects and their handles.

use std::fmt;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::color::{AtomicColor, Color};

/// Handle to a heap object.
///
/// A handle names a slot in the heap plus the slot's generation at the time
/// of allocation. Reclaiming an object bumps the generation, so a handle
/// that outlives its object is rejected instead of aliasing whatever is
/// allocated into the slot next.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the heap.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot when this object was allocated.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A node of the managed object graph.
///
/// The field lock is the serialization point between the write barrier and
/// the marker: a mutator holds it (write) across check, shade and store, and
/// the marker holds it (read) across scanning the fields and blackening the
/// object.
#[derive(Debug)]
pub struct HeapObject {
    id: ObjectId,
    color: AtomicColor,
    epoch: u64,
    fields: RwLock<Box<[Option<ObjectId>]>>,
}

impl HeapObject {
    pub(crate) fn new(id: ObjectId, fields: Box<[Option<ObjectId>]>, color: Color, epoch: u64) -> Self {
        Self {
            id,
            color: AtomicColor::new(color),
            epoch,
            fields: RwLock::new(fields),
        }
    }

    /// Handle of this object.
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// The color cell.
    #[must_use]
    pub const fn color(&self) -> &AtomicColor {
        &self.color
    }

    /// Collector epoch at allocation time.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of reference fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.read().len()
    }

    /// Snapshot of the outgoing references.
    #[must_use]
    pub fn references(&self) -> Vec<ObjectId> {
        self.fields.read().iter().flatten().copied().collect()
    }

    pub(crate) fn read_fields(&self) -> RwLockReadGuard<'_, Box<[Option<ObjectId>]>> {
        self.fields.read()
    }

    pub(crate) fn write_fields(&self) -> RwLockWriteGuard<'_, Box<[Option<ObjectId>]>> {
        self.fields.write()
    }
}
