//! GC metrics and statistics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Why marking was finished inside the termination pause instead of
/// concurrently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackReason {
    /// No fallback happened.
    #[default]
    None,
    /// Every allowed termination pause found fresh gray work.
    TerminationRoundsExceeded,
}

/// Statistics from one completed collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcMetrics {
    /// Epoch of the cycle.
    pub epoch: u64,
    /// Wall time from root snapshot to the end of sweeping.
    pub duration: Duration,
    /// Length of the root snapshot pause.
    pub snapshot_pause: Duration,
    /// Total length of all termination pauses.
    pub termination_pause: Duration,
    /// Length of the longest termination pause.
    pub longest_termination_pause: Duration,
    /// Time spent marking concurrently.
    pub mark_duration: Duration,
    /// Time spent sweeping.
    pub sweep_duration: Duration,
    /// Roots found by the snapshot.
    pub roots: usize,
    /// Objects blackened.
    pub objects_marked: usize,
    /// Objects reclaimed by the sweep.
    pub objects_reclaimed: usize,
    /// Objects retained by the sweep.
    pub objects_surviving: usize,
    /// Objects shaded by the write barrier during marking.
    pub barrier_shades: usize,
    /// Termination pauses taken.
    pub termination_rounds: usize,
    /// Whether marking was finished inside a pause.
    pub fallback_occurred: bool,
    /// Reason for the fallback, if any.
    pub fallback_reason: FallbackReason,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// Create a new `GcMetrics` with all fields set to zero/defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            epoch: 0,
            duration: Duration::ZERO,
            snapshot_pause: Duration::ZERO,
            termination_pause: Duration::ZERO,
            longest_termination_pause: Duration::ZERO,
            mark_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            roots: 0,
            objects_marked: 0,
            objects_reclaimed: 0,
            objects_surviving: 0,
            barrier_shades: 0,
            termination_rounds: 0,
            fallback_occurred: false,
            fallback_reason: FallbackReason::None,
        }
    }

    /// The longest stop-the-world pause of the cycle.
    #[must_use]
    pub fn max_pause(&self) -> Duration {
        self.snapshot_pause.max(self.longest_termination_pause)
    }
}

/// Accumulates durations of the phases of one cycle.
///
/// ```
/// use tricolor_gc::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// // ... concurrent marking ...
/// timer.end_mark();
/// assert!(timer.mark >= std::time::Duration::ZERO);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimer {
    /// Accumulated root snapshot pause.
    pub snapshot: Duration,
    /// Accumulated concurrent mark time.
    pub mark: Duration,
    /// Accumulated termination pause time.
    pub termination: Duration,
    /// Accumulated sweep time.
    pub sweep: Duration,
    /// Longest single termination pause.
    pub longest_termination: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    /// Create a new `PhaseTimer` with all durations set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            snapshot: Duration::ZERO,
            mark: Duration::ZERO,
            termination: Duration::ZERO,
            sweep: Duration::ZERO,
            longest_termination: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    fn take(&mut self) -> Duration {
        self.current_start
            .take()
            .map_or(Duration::ZERO, |start| start.elapsed())
    }

    /// End the root snapshot pause.
    pub fn end_snapshot(&mut self) {
        let elapsed = self.take();
        self.snapshot += elapsed;
    }

    /// End a stretch of concurrent marking.
    pub fn end_mark(&mut self) {
        let elapsed = self.take();
        self.mark += elapsed;
    }

    /// End a termination pause.
    pub fn end_termination(&mut self) {
        let elapsed = self.take();
        self.termination += elapsed;
        self.longest_termination = self.longest_termination.max(elapsed);
    }

    /// End a stretch of sweeping.
    pub fn end_sweep(&mut self) {
        let elapsed = self.take();
        self.sweep += elapsed;
    }
}

/// Cumulative statistics over the lifetime of a collector.
#[derive(Debug)]
pub struct GlobalMetrics {
    collections: AtomicUsize,
    aborted: AtomicUsize,
    objects_reclaimed: AtomicUsize,
    barrier_shades: AtomicUsize,
    pause_ns: AtomicU64,
    max_pause_ns: AtomicU64,
    fallbacks: AtomicUsize,
}

impl Default for GlobalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMetrics {
    /// Create a new `GlobalMetrics` with all counters initialized to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            collections: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
            objects_reclaimed: AtomicUsize::new(0),
            barrier_shades: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
            max_pause_ns: AtomicU64::new(0),
            fallbacks: AtomicUsize::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn record(&self, metrics: &GcMetrics) {
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.objects_reclaimed
            .fetch_add(metrics.objects_reclaimed, Ordering::Relaxed);
        self.barrier_shades
            .fetch_add(metrics.barrier_shades, Ordering::Relaxed);
        let pause = (metrics.snapshot_pause + metrics.termination_pause).as_nanos() as u64;
        self.pause_ns.fetch_add(pause, Ordering::Relaxed);
        self.max_pause_ns
            .fetch_max(metrics.max_pause().as_nanos() as u64, Ordering::Relaxed);
        if metrics.fallback_occurred {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed cycles.
    #[inline]
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    /// Cycles abandoned because of a root enumeration failure or an
    /// invariant violation.
    #[inline]
    #[must_use]
    pub fn total_aborted(&self) -> usize {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Objects reclaimed by all cycles.
    #[inline]
    #[must_use]
    pub fn total_objects_reclaimed(&self) -> usize {
        self.objects_reclaimed.load(Ordering::Relaxed)
    }

    /// Write-barrier shades over all cycles.
    #[inline]
    #[must_use]
    pub fn total_barrier_shades(&self) -> usize {
        self.barrier_shades.load(Ordering::Relaxed)
    }

    /// Total stop-the-world time in nanoseconds.
    #[inline]
    #[must_use]
    pub fn total_pause_ns(&self) -> u64 {
        self.pause_ns.load(Ordering::Relaxed)
    }

    /// Longest single-cycle pause in nanoseconds.
    #[inline]
    #[must_use]
    pub fn max_pause_ns(&self) -> u64 {
        self.max_pause_ns.load(Ordering::Relaxed)
    }

    /// Cycles that finished marking inside a pause.
    #[inline]
    #[must_use]
    pub fn total_fallbacks(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

/// Ring buffer size for GC history.
const HISTORY_SIZE: usize = 64;

/// The most recent cycles' metrics, oldest first.
#[derive(Debug, Default)]
pub struct GcHistory {
    entries: Mutex<VecDeque<GcMetrics>>,
}

impl GcHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, metrics: GcMetrics) {
        let mut entries = self.entries.lock();
        if entries.len() == HISTORY_SIZE {
            entries.pop_front();
        }
        entries.push_back(metrics);
    }

    /// Metrics of the most recent cycle.
    #[must_use]
    pub fn last(&self) -> Option<GcMetrics> {
        self.entries.lock().back().copied()
    }

    /// Up to the last 64 cycles, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<GcMetrics> {
        self.entries.lock().iter().copied().collect()
    }

    /// Number of cycles held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no cycle has completed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
