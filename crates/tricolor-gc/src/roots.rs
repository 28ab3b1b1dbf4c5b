//! Root enumeration.
//!
//! The collector never walks mutator stacks itself. At the start of each
//! cycle, and again when marking terminates, it asks a [`RootEnumerator`]
//! for the set of handles the mutators can reach directly.

use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RootError;
use crate::object::ObjectId;

/// Snapshot of root handles for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootSet {
    roots: HashSet<ObjectId>,
}

impl RootSet {
    /// Create an empty root set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root. Duplicates are ignored.
    pub fn insert(&mut self, id: ObjectId) -> bool {
        self.roots.insert(id)
    }

    /// Returns `true` if `id` is a root.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.roots.contains(&id)
    }

    /// Number of distinct roots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Returns `true` if there are no roots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Iterate over the roots in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.roots.iter().copied()
    }
}

impl Extend<ObjectId> for RootSet {
    fn extend<I: IntoIterator<Item = ObjectId>>(&mut self, iter: I) {
        self.roots.extend(iter);
    }
}

impl FromIterator<ObjectId> for RootSet {
    fn from_iter<I: IntoIterator<Item = ObjectId>>(iter: I) -> Self {
        Self {
            roots: iter.into_iter().collect(),
        }
    }
}

/// Embedder callback producing the current roots.
///
/// Implementations run while mutators are stopped and must not block on
/// mutator progress.
pub trait RootEnumerator: Send + Sync {
    /// Push every directly reachable handle into `roots`.
    ///
    /// # Errors
    ///
    /// An error aborts the current cycle; nothing is swept.
    fn enumerate(&self, roots: &mut RootSet) -> Result<(), RootError>;
}

impl<F> RootEnumerator for F
where
    F: Fn(&mut RootSet) -> Result<(), RootError> + Send + Sync,
{
    fn enumerate(&self, roots: &mut RootSet) -> Result<(), RootError> {
        self(roots)
    }
}

impl<R: RootEnumerator + ?Sized> RootEnumerator for Arc<R> {
    fn enumerate(&self, roots: &mut RootSet) -> Result<(), RootError> {
        (**self).enumerate(roots)
    }
}

/// A shared table of pinned handles.
///
/// Each handle carries a pin count; it stays a root until every pin is
/// released. Use [`RootRegistry::pin`] for RAII pins.
#[derive(Debug, Default)]
pub struct RootRegistry {
    pins: Mutex<HashMap<ObjectId, usize>>,
    dirty: AtomicBool,
}

impl RootRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one pin to `id`.
    pub fn register(&self, id: ObjectId) {
        *self.pins.lock().entry(id).or_insert(0) += 1;
        self.dirty.store(true, Ordering::Release);
    }

    /// Remove one pin from `id`. Returns `false` if `id` was not pinned.
    pub fn unregister(&self, id: ObjectId) -> bool {
        let mut pins = self.pins.lock();
        let Entry::Occupied(mut entry) = pins.entry(id) else {
            return false;
        };
        *entry.get_mut() -= 1;
        if *entry.get() == 0 {
            entry.remove();
        }
        drop(pins);
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// Pin `id` until the returned guard is dropped.
    pub fn pin(self: &Arc<Self>, id: ObjectId) -> RootGuard {
        self.register(id);
        RootGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Returns `true` if `id` has at least one pin.
    #[must_use]
    pub fn is_rooted(&self, id: ObjectId) -> bool {
        self.pins.lock().contains_key(&id)
    }

    /// Number of distinct pinned handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pins.lock().len()
    }

    /// Returns `true` if nothing is pinned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pins.lock().is_empty()
    }

    /// Returns whether the pins changed since the last enumeration.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl RootEnumerator for RootRegistry {
    fn enumerate(&self, roots: &mut RootSet) -> Result<(), RootError> {
        let pins = self.pins.lock();
        roots.extend(pins.keys().copied());
        drop(pins);
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

/// RAII pin in a [`RootRegistry`].
///
/// Forgetting the guard leaks the pin and keeps the object alive forever.
#[must_use]
#[derive(Debug)]
pub struct RootGuard {
    registry: Arc<RootRegistry>,
    id: ObjectId,
}

impl RootGuard {
    /// The pinned handle.
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }
}

impl Clone for RootGuard {
    fn clone(&self) -> Self {
        self.registry.pin(self.id)
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_counts_pins() {
        let registry = Arc::new(RootRegistry::new());
        let id = ObjectId::new(3, 0);

        let first = registry.pin(id);
        let second = first.clone();
        assert_eq!(registry.len(), 1);

        drop(first);
        assert!(registry.is_rooted(id));
        drop(second);
        assert!(!registry.is_rooted(id));
        assert!(!registry.unregister(id));
    }

    #[test]
    fn test_enumerate_clears_dirty() {
        let registry = RootRegistry::new();
        registry.register(ObjectId::new(0, 0));
        registry.register(ObjectId::new(1, 0));
        assert!(registry.is_dirty());

        let mut roots = RootSet::new();
        registry.enumerate(&mut roots).unwrap();
        assert_eq!(roots.len(), 2);
        assert!(!registry.is_dirty());
    }

    #[test]
    fn test_closure_enumerator() {
        let id = ObjectId::new(9, 1);
        let source = move |roots: &mut RootSet| -> Result<(), RootError> {
            roots.insert(id);
            Ok(())
        };
        let mut roots = RootSet::new();
        source.enumerate(&mut roots).unwrap();
        assert!(roots.contains(id));

        let failing =
            |_: &mut RootSet| -> Result<(), RootError> { Err(RootError::new("stack walk failed")) };
        assert_eq!(
            failing.enumerate(&mut RootSet::new()).unwrap_err().message(),
            "stack walk failed"
        );
    }
}
