//! A concurrent tri-color mark-and-sweep garbage collector.
//!
//! `tricolor-gc` manages a heap of objects that refer to each other through
//! numbered reference fields. Mutator threads allocate objects and rewire
//! references while the collector marks and sweeps alongside them; mutators
//! are stopped only for two short pauses per cycle.
//!
//! # Features
//!
//! - **Concurrent marking**: tri-color marking with an atomic color per
//!   object, kept sound by a Dijkstra insertion write barrier
//! - **Short pauses**: stop-the-world only for the root snapshot and for
//!   marking termination
//! - **Incremental sweep**: slots are swept in batches while mutators run
//! - **Pluggable roots and thread control**: roots come from a
//!   [`RootEnumerator`], pauses from a [`MutatorControl`]
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tricolor_gc::{CollectMode, Collector, GcConfig, NoopControl, RootRegistry};
//!
//! let roots = Arc::new(RootRegistry::new());
//! let gc = Collector::new(GcConfig::manual(), Arc::clone(&roots), NoopControl).unwrap();
//!
//! let c = gc.allocate(&[]).unwrap();
//! let b = gc.allocate(&[c]).unwrap();
//! let a = gc.allocate(&[b]).unwrap();
//! let pin = roots.pin(a);
//!
//! gc.collect_now(CollectMode::Sync).unwrap();
//! assert!(gc.is_live(c));
//!
//! drop(pin);
//! gc.collect_now(CollectMode::Sync).unwrap();
//! assert!(gc.is_empty());
//! ```
//!
//! # Threads
//!
//! With several mutator threads, use [`Safepoints`] (or an embedder-specific
//! [`MutatorControl`]) and have each thread work through its own
//! [`Mutator`] handle, which polls for pauses before every heap operation.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![forbid(unsafe_code)]

mod collector;
mod color;
mod config;
mod error;
pub mod gc;
pub mod heap;
pub mod metrics;
mod object;
mod roots;
mod safepoint;
mod tracing;

// Re-export public API
pub use collector::{CollectMode, CollectOutcome, Collector, Mutator};
pub use color::{AtomicColor, Color};
pub use config::{
    GcConfig, TriggerPolicy, DEFAULT_GROWTH_THRESHOLD, DEFAULT_MARK_SLICE_BUDGET,
    DEFAULT_MARK_WORKERS, DEFAULT_MAX_TERMINATION_ROUNDS, DEFAULT_SWEEP_BATCH,
};
pub use error::{GcError, Result, RootError};
pub use gc::{CyclePhase, MarkSliceResult, SweepSliceResult};
pub use metrics::{FallbackReason, GcHistory, GcMetrics, GlobalMetrics};
pub use object::{HeapObject, ObjectId};
pub use roots::{RootEnumerator, RootGuard, RootRegistry, RootSet};
pub use safepoint::{MutatorControl, NoopControl, Safepoints};
pub use tracing::GcId;

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod test_util {
    use crate::{Collector, ObjectId, Result};

    /// Overwrite a field without the write barrier, to manufacture a
    /// Black → White edge.
    ///
    /// # Errors
    ///
    /// As for [`Collector::set_reference`].
    pub fn store_unbarriered(
        collector: &Collector,
        from: ObjectId,
        field: usize,
        to: Option<ObjectId>,
    ) -> Result<Option<ObjectId>> {
        collector.set_reference_unbarriered(from, field, to)
    }
}
