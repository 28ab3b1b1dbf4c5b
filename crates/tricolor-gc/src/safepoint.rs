//! Stopping and resuming mutator threads.
//!
//! The collector needs all mutators stopped twice per cycle: while roots are
//! snapshotted and while marking termination is confirmed. How threads are
//! stopped belongs to the embedder and is abstracted by [`MutatorControl`].
//!
//! [`Safepoints`] is the built-in cooperative implementation. Each mutator
//! thread registers itself and polls [`MutatorControl::safepoint`] regularly;
//! a thread that is about to block on something other than the heap (I/O, a
//! lock, waiting for a collection it requested) brackets that with
//! `enter_safe_region`/`exit_safe_region` so the collector does not wait for
//! it.
//!
//! ## Thread states
//!
//! | State      | Counted in `running` | May touch the heap |
//! |------------|----------------------|--------------------|
//! | Running    | yes                  | yes                |
//! | Safe       | no                   | no                 |
//! | Parked     | no                   | no                 |
//!
//! A stop is complete once `running` reaches zero. Threads leaving the safe
//! state while a stop is in force wait until it is lifted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Embedder primitives for stop-the-world pauses.
///
/// `suspend_all` must return only once no mutator can touch the heap, and
/// mutators must never be stopped inside a heap operation (allocation or a
/// reference write). Every hook other than the two pause primitives has a
/// no-op default.
pub trait MutatorControl: Send + Sync {
    /// Stop every mutator thread. Blocks until they are all stopped.
    fn suspend_all(&self);

    /// Let mutators continue after [`suspend_all`](Self::suspend_all).
    fn resume_all(&self);

    /// A new mutator thread starts using the heap.
    fn register_mutator(&self) {}

    /// A mutator thread stops using the heap.
    fn unregister_mutator(&self) {}

    /// The calling mutator will not touch the heap until
    /// [`exit_safe_region`](Self::exit_safe_region).
    fn enter_safe_region(&self) {}

    /// The calling mutator resumes touching the heap.
    fn exit_safe_region(&self) {}

    /// Park here if a stop is pending.
    fn safepoint(&self) {}
}

impl<C: MutatorControl + ?Sized> MutatorControl for Arc<C> {
    fn suspend_all(&self) {
        (**self).suspend_all();
    }

    fn resume_all(&self) {
        (**self).resume_all();
    }

    fn register_mutator(&self) {
        (**self).register_mutator();
    }

    fn unregister_mutator(&self) {
        (**self).unregister_mutator();
    }

    fn enter_safe_region(&self) {
        (**self).enter_safe_region();
    }

    fn exit_safe_region(&self) {
        (**self).exit_safe_region();
    }

    fn safepoint(&self) {
        (**self).safepoint();
    }
}

/// Control for embeddings where the only mutator is the thread driving the
/// collector, or where the embedder already guarantees exclusion.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopControl;

impl MutatorControl for NoopControl {
    fn suspend_all(&self) {}
    fn resume_all(&self) {}
}

#[derive(Debug, Default)]
struct SafepointState {
    registered: usize,
    running: usize,
    stop_requested: bool,
}

/// Cooperative stop-the-world coordination.
#[derive(Debug, Default)]
pub struct Safepoints {
    state: Mutex<SafepointState>,
    changed: Condvar,
    /// Fast path for [`MutatorControl::safepoint`].
    requested: AtomicBool,
    stops: AtomicU64,
}

impl Safepoints {
    /// Create a coordinator with no registered mutators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered mutator threads.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.state.lock().registered
    }

    /// Number of registered threads currently allowed to touch the heap.
    #[must_use]
    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    /// Returns `true` while a stop is requested or in force.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Completed stop-the-world pauses.
    #[must_use]
    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::Relaxed)
    }
}

impl MutatorControl for Safepoints {
    #[allow(clippy::significant_drop_tightening)]
    fn suspend_all(&self) {
        let mut state = self.state.lock();
        while state.stop_requested {
            self.changed.wait(&mut state);
        }
        state.stop_requested = true;
        self.requested.store(true, Ordering::Release);
        while state.running > 0 {
            self.changed.wait(&mut state);
        }
        self.stops.fetch_add(1, Ordering::Relaxed);
    }

    fn resume_all(&self) {
        let mut state = self.state.lock();
        state.stop_requested = false;
        self.requested.store(false, Ordering::Release);
        drop(state);
        self.changed.notify_all();
    }

    fn register_mutator(&self) {
        let mut state = self.state.lock();
        while state.stop_requested {
            self.changed.wait(&mut state);
        }
        state.registered += 1;
        state.running += 1;
    }

    fn unregister_mutator(&self) {
        let mut state = self.state.lock();
        state.registered = state.registered.saturating_sub(1);
        state.running = state.running.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    fn enter_safe_region(&self) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    fn exit_safe_region(&self) {
        let mut state = self.state.lock();
        while state.stop_requested {
            self.changed.wait(&mut state);
        }
        state.running += 1;
    }

    fn safepoint(&self) {
        if !self.requested.load(Ordering::Acquire) {
            return;
        }
        self.enter_safe_region();
        self.exit_safe_region();
    }
}
