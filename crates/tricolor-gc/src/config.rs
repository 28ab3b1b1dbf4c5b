//! Collector configuration.

use std::time::Duration;

use crate::error::{GcError, Result};

/// Allocations between cycles under the default [`TriggerPolicy`].
pub const DEFAULT_GROWTH_THRESHOLD: usize = 10_000;
/// Gray objects scanned per marking slice.
pub const DEFAULT_MARK_SLICE_BUDGET: usize = 1000;
/// Slots examined per sweep batch.
pub const DEFAULT_SWEEP_BATCH: usize = 512;
/// Termination pauses before marking is finished inside the pause.
pub const DEFAULT_MAX_TERMINATION_ROUNDS: usize = 8;
/// Concurrent mark threads.
pub const DEFAULT_MARK_WORKERS: usize = 1;

/// When the collector starts a cycle on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPolicy {
    /// Request a cycle once `threshold` objects were allocated since the
    /// previous cycle finished.
    HeapGrowth {
        /// Allocations between cycles.
        threshold: usize,
    },
    /// Run a cycle every interval on the background collector thread.
    Periodic(Duration),
    /// Only `collect_now` (and heap exhaustion) start cycles.
    Manual,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self::HeapGrowth {
            threshold: DEFAULT_GROWTH_THRESHOLD,
        }
    }
}

/// Tunables for a [`Collector`](crate::Collector).
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// When cycles are started without an explicit request.
    pub trigger: TriggerPolicy,
    /// Maximum number of live objects, `None` for unbounded.
    pub max_objects: Option<usize>,
    /// Gray objects scanned per marking slice before yielding.
    pub mark_slice_budget: usize,
    /// Threads draining the mark queue during concurrent marking.
    pub mark_workers: usize,
    /// Slots examined per sweep batch before the heap lock is released.
    pub sweep_batch: usize,
    /// Termination pauses that may find fresh gray work before marking is
    /// finished inside the pause.
    pub max_termination_rounds: usize,
    /// Check every Black object for White targets before sweeping.
    ///
    /// The check walks the whole heap inside the termination pause, so it is
    /// off by default. Meant for tests and debugging.
    pub verify_marking: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerPolicy::default(),
            max_objects: None,
            mark_slice_budget: DEFAULT_MARK_SLICE_BUDGET,
            mark_workers: DEFAULT_MARK_WORKERS,
            sweep_batch: DEFAULT_SWEEP_BATCH,
            max_termination_rounds: DEFAULT_MAX_TERMINATION_ROUNDS,
            verify_marking: false,
        }
    }
}

impl GcConfig {
    /// A configuration that never starts cycles by itself.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            trigger: TriggerPolicy::Manual,
            ..Self::default()
        }
    }

    /// Reject values the collector cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::InvalidConfig`] for zero budgets, zero workers, a
    /// zero capacity, a zero growth threshold or a zero period.
    pub fn validate(&self) -> Result<()> {
        if self.mark_slice_budget == 0 {
            return Err(GcError::InvalidConfig("mark_slice_budget must be non-zero"));
        }
        if self.mark_workers == 0 {
            return Err(GcError::InvalidConfig("mark_workers must be non-zero"));
        }
        if self.sweep_batch == 0 {
            return Err(GcError::InvalidConfig("sweep_batch must be non-zero"));
        }
        if self.max_objects == Some(0) {
            return Err(GcError::InvalidConfig("max_objects must be non-zero"));
        }
        match self.trigger {
            TriggerPolicy::HeapGrowth { threshold: 0 } => {
                Err(GcError::InvalidConfig("growth threshold must be non-zero"))
            }
            TriggerPolicy::Periodic(period) if period.is_zero() => {
                Err(GcError::InvalidConfig("period must be non-zero"))
            }
            _ => Ok(()),
        }
    }
}
