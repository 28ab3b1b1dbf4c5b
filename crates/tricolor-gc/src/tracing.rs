//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for collection cycles. Spans are created only at
//! `cfg(feature = "tracing")` call sites; the logging helpers compile to
//! nothing when the feature is off.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    use crate::error::GcError;
    use crate::gc::CyclePhase;
    use crate::metrics::{FallbackReason, GcMetrics};

    /// Stable identifier for a collection cycle.
    ///
    /// Used to correlate every event of one cycle. It is a process-wide
    /// monotonically increasing counter starting at 1, so IDs stay unique
    /// across collectors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique GC ID.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span for a whole cycle.
    pub fn trace_cycle(trigger: &str, gc_id: GcId, epoch: u64) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "gc_cycle",
            trigger = trigger,
            gc_id = gc_id.0,
            epoch
        )
        .entered()
    }

    /// Create a span for one phase of a cycle.
    pub fn trace_phase(phase: CyclePhase, gc_id: GcId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = phase.as_str(), gc_id = gc_id.0).entered()
    }

    /// Log entry into a phase.
    pub fn log_phase_start(phase: CyclePhase, live_objects: usize) {
        tracing::debug!(phase = phase.as_str(), live_objects, "phase_start");
    }

    /// Log the end of a phase with the number of objects it processed.
    pub fn log_phase_end(phase: CyclePhase, objects: usize) {
        tracing::debug!(phase = phase.as_str(), objects, "phase_end");
    }

    /// Log marking being finished inside the termination pause.
    pub fn log_fallback(reason: FallbackReason, rounds: usize) {
        tracing::warn!(reason = ?reason, rounds, "mark_fallback");
    }

    /// Log an abandoned cycle.
    pub fn log_abort(phase: CyclePhase, error: &GcError) {
        tracing::error!(phase = phase.as_str(), %error, "cycle_aborted");
    }

    /// Log the summary of a completed cycle.
    pub fn log_cycle_end(metrics: &GcMetrics) {
        tracing::info!(
            epoch = metrics.epoch,
            reclaimed = metrics.objects_reclaimed,
            surviving = metrics.objects_surviving,
            marked = metrics.objects_marked,
            rounds = metrics.termination_rounds,
            duration_us = u64::try_from(metrics.duration.as_micros()).unwrap_or(u64::MAX),
            "cycle_complete"
        );
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    use crate::error::GcError;
    use crate::gc::CyclePhase;
    use crate::metrics::{FallbackReason, GcMetrics};

    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Stub function when tracing is disabled.
    pub const fn next_gc_id() -> GcId {
        GcId(0)
    }

    pub const fn log_phase_start(_phase: CyclePhase, _live_objects: usize) {}

    pub const fn log_phase_end(_phase: CyclePhase, _objects: usize) {}

    pub const fn log_fallback(_reason: FallbackReason, _rounds: usize) {}

    pub const fn log_abort(_phase: CyclePhase, _error: &GcError) {}

    pub const fn log_cycle_end(_metrics: &GcMetrics) {}
}

pub use internal::GcId;
