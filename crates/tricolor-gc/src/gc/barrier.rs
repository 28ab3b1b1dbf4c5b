//! The write barrier.
//!
//! While a cycle is marking, every reference store goes through
//! [`write_reference`], which applies a Dijkstra insertion barrier: a White
//! target stored into a Black object is shaded, so the store never creates a
//! Black → White edge. Overwritten targets are not shaded; an object that a
//! mutator moves from the heap into a root is found again when marking
//! termination re-scans the roots.
//!
//! Check, shade and store all happen under the holder's field write lock.
//! The marker takes the read side of the same lock for the whole
//! scan-then-blacken step, so it can never blacken an object from a field
//! snapshot that a concurrent store has already invalidated.

use crate::color::Color;
use crate::error::{GcError, Result};
use crate::gc::mark_queue::{MarkQueue, ShadeSource};
use crate::heap::Heap;
use crate::object::{HeapObject, ObjectId};

/// Store `to` into `from.fields[field]` and return the previous value.
///
/// # Errors
///
/// [`GcError::DanglingReference`] if `to` is not live and
/// [`GcError::FieldOutOfBounds`] if `field` does not exist.
pub fn write_reference(
    heap: &Heap,
    queue: &MarkQueue,
    from: &HeapObject,
    field: usize,
    to: Option<ObjectId>,
    barrier_active: bool,
) -> Result<Option<ObjectId>> {
    let target = match to {
        Some(id) => Some(heap.get(id).ok_or(GcError::DanglingReference(id))?),
        None => None,
    };

    let mut fields = from.write_fields();
    let len = fields.len();
    let slot = fields.get_mut(field).ok_or(GcError::FieldOutOfBounds {
        object: from.id(),
        field,
        len,
    })?;

    if barrier_active && from.color().load() == Color::Black {
        if let Some(target) = &target {
            queue.shade(target, ShadeSource::Barrier);
        }
    }

    Ok(std::mem::replace(slot, to))
}

/// Shade the initial references of an object allocated during marking.
///
/// Such objects are born Black, so their targets need the same treatment as
/// an insertion into a Black holder.
pub fn shade_initial_references(heap: &Heap, queue: &MarkQueue, refs: &[Option<ObjectId>]) {
    for id in refs.iter().flatten() {
        if let Some(target) = heap.get(*id) {
            queue.shade(&target, ShadeSource::Barrier);
        }
    }
}

/// Store without any barrier action.
///
/// Only for tests that need to manufacture a Black → White edge.
#[cfg(any(test, feature = "test-util"))]
pub fn write_reference_unbarriered(
    from: &HeapObject,
    field: usize,
    to: Option<ObjectId>,
) -> Result<Option<ObjectId>> {
    let mut fields = from.write_fields();
    let len = fields.len();
    let slot = fields.get_mut(field).ok_or(GcError::FieldOutOfBounds {
        object: from.id(),
        field,
        len,
    })?;
    Ok(std::mem::replace(slot, to))
}
