//! The collector: heap operations, the cycle driver and the background
//! collector thread.
//!
//! A [`Collector`] owns the heap and drives cycles through the phases of
//! [`CyclePhase`]. Cycles can be driven three ways:
//!
//! - [`Collector::collect_now`] with [`CollectMode::Sync`] runs a whole cycle
//!   on the calling thread;
//! - the background thread started by [`Collector::spawn_collector_thread`]
//!   runs cycles when requested or when the [`TriggerPolicy`] fires;
//! - the step API ([`Collector::start_cycle`], [`Collector::mark_slice`],
//!   [`Collector::terminate_marking`], [`Collector::sweep_slice`]) lets the
//!   embedder schedule each piece itself.
//!
//! # Lock order
//!
//! `cycle` → `gate` → object field lock → heap slab lock. Allocation and
//! reference writes take the read side of `gate`; phase transitions take the
//! write side, so no heap operation straddles a transition. Mutators are
//! always suspended before `gate` is taken for the two stop-the-world steps.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::color::Color;
use crate::config::{GcConfig, TriggerPolicy};
use crate::error::{GcError, Result};
use crate::gc::barrier::{shade_initial_references, write_reference};
use crate::gc::mark::{self, MarkSliceResult};
use crate::gc::mark_queue::{MarkQueue, ShadeSource};
use crate::gc::sweep::{SweepSliceResult, Sweeper};
use crate::gc::{CyclePhase, PhaseState};
use crate::heap::Heap;
use crate::metrics::{FallbackReason, GcHistory, GcMetrics, GlobalMetrics, PhaseTimer};
use crate::object::{HeapObject, ObjectId};
use crate::roots::{RootEnumerator, RootSet};
use crate::safepoint::MutatorControl;
use crate::tracing::internal::{
    log_abort, log_cycle_end, log_fallback, log_phase_end, log_phase_start, next_gc_id, GcId,
};

/// How [`Collector::collect_now`] runs the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    /// Run a full cycle on the calling thread and wait for it.
    Sync,
    /// Ask the background collector thread for a cycle and return at once.
    Async,
}

/// Result of [`Collector::collect_now`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// A synchronous cycle finished.
    Completed(GcMetrics),
    /// A cycle was requested from the background thread.
    Requested,
}

impl CollectOutcome {
    /// Metrics of the finished cycle, if it ran synchronously.
    #[must_use]
    pub const fn metrics(&self) -> Option<&GcMetrics> {
        match self {
            Self::Completed(metrics) => Some(metrics),
            Self::Requested => None,
        }
    }
}

/// Bookkeeping for the cycle in progress. Guarded by `Collector::cycle`.
#[derive(Debug)]
struct CycleState {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    gc_id: GcId,
    started: Option<Instant>,
    timer: PhaseTimer,
    roots: usize,
    marked: usize,
    rounds: usize,
    fallback: FallbackReason,
}

impl CycleState {
    const fn new(gc_id: GcId) -> Self {
        Self {
            gc_id,
            started: None,
            timer: PhaseTimer::new(),
            roots: 0,
            marked: 0,
            rounds: 0,
            fallback: FallbackReason::None,
        }
    }
}

#[derive(Debug, Default)]
struct RequestState {
    pending: Option<&'static str>,
    running: bool,
    shutdown: bool,
}

/// Mailbox between the collector and its background thread.
#[derive(Debug, Default)]
struct Requests {
    state: Mutex<RequestState>,
    wake: Condvar,
}

/// A concurrent tri-color mark-and-sweep collector and the heap it manages.
pub struct Collector {
    heap: Heap,
    config: RwLock<GcConfig>,
    roots: Box<dyn RootEnumerator>,
    control: Box<dyn MutatorControl>,
    phase: PhaseState,
    gate: RwLock<()>,
    queue: MarkQueue,
    sweeper: Sweeper,
    epoch: AtomicU64,
    cycle: Mutex<CycleState>,
    completed: Mutex<u64>,
    cycle_done: Condvar,
    allocs_since_cycle: AtomicUsize,
    growth_requested: AtomicBool,
    requests: Arc<Requests>,
    worker: Mutex<Option<JoinHandle<()>>>,
    history: GcHistory,
    metrics: GlobalMetrics,
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("phase", &self.phase.get())
            .field("epoch", &self.epoch())
            .field("live_objects", &self.heap.len())
            .field("config", &*self.config.read())
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Create a collector.
    ///
    /// `roots` is asked for the root set at the start of every cycle and again
    /// at marking termination. `control` stops and resumes mutator threads.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidConfig`] if `config` does not validate.
    pub fn new<R, C>(config: GcConfig, roots: R, control: C) -> Result<Arc<Self>>
    where
        R: RootEnumerator + 'static,
        C: MutatorControl + 'static,
    {
        config.validate()?;
        Ok(Arc::new(Self {
            heap: Heap::new(config.max_objects),
            config: RwLock::new(config),
            roots: Box::new(roots),
            control: Box::new(control),
            phase: PhaseState::new(),
            gate: RwLock::new(()),
            queue: MarkQueue::new(),
            sweeper: Sweeper::new(),
            epoch: AtomicU64::new(0),
            cycle: Mutex::new(CycleState::new(GcId(0))),
            completed: Mutex::new(0),
            cycle_done: Condvar::new(),
            allocs_since_cycle: AtomicUsize::new(0),
            growth_requested: AtomicBool::new(false),
            requests: Arc::new(Requests::default()),
            worker: Mutex::new(None),
            history: GcHistory::new(),
            metrics: GlobalMetrics::new(),
        }))
    }

    // ------------------------------------------------------------------
    // Heap operations
    // ------------------------------------------------------------------

    /// Allocate an object with one field per entry of `refs`.
    ///
    /// While a cycle is marking the object is born Black and its targets are
    /// shaded; while sweeping it is White but stamped with the current epoch
    /// so the running sweep keeps it.
    ///
    /// If the heap is full, one synchronous cycle is run and the allocation
    /// retried once. Under [`TriggerPolicy::HeapGrowth`] the allocation that
    /// reaches the threshold starts its cycle before inserting, so `refs`
    /// must be reachable from the roots to survive it.
    ///
    /// A thread registered as a mutator should allocate through its
    /// [`Mutator`] instead, so it is not waited on by those cycles.
    ///
    /// # Errors
    ///
    /// [`GcError::DanglingReference`] if a target is not live,
    /// [`GcError::OutOfMemory`] if the heap is still full after collecting,
    /// or any error of the collection run to make room.
    pub fn allocate(&self, refs: &[ObjectId]) -> Result<ObjectId> {
        let fields: Vec<Option<ObjectId>> = refs.iter().copied().map(Some).collect();
        self.allocate_fields(&fields, false)
    }

    /// Allocate an object with `count` empty fields.
    ///
    /// # Errors
    ///
    /// As for [`allocate`](Self::allocate).
    pub fn allocate_with_fields(&self, count: usize) -> Result<ObjectId> {
        self.allocate_fields(&vec![None; count], false)
    }

    fn allocate_fields(&self, fields: &[Option<ObjectId>], in_mutator: bool) -> Result<ObjectId> {
        self.maybe_trigger(in_mutator);

        let id = match self.try_insert(fields)? {
            Some(id) => id,
            None => {
                self.blocking(in_mutator, || self.run_cycle("heap_exhausted"))?;
                self.try_insert(fields)?.ok_or_else(|| GcError::OutOfMemory {
                    capacity: self.heap.capacity().unwrap_or(usize::MAX),
                })?
            }
        };
        self.allocs_since_cycle.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Insert under the phase gate. `Ok(None)` means the heap is full.
    ///
    /// The targets are checked here rather than up front, so a cycle run to
    /// make room cannot leave the new object pointing at a reclaimed slot.
    fn try_insert(&self, fields: &[Option<ObjectId>]) -> Result<Option<ObjectId>> {
        let _gate = self.gate.read();
        if let Some(dead) = fields.iter().flatten().find(|id| !self.heap.contains(**id)) {
            return Err(GcError::DanglingReference(*dead));
        }

        let phase = self.phase.get();
        if phase == CyclePhase::Sweeping {
            // Pay for the allocation with one batch of sweeping.
            self.sweeper.assist(&self.heap);
        }
        let color = if phase.barrier_active() {
            Color::Black
        } else {
            Color::White
        };
        let Some(object) = self
            .heap
            .insert(fields.into(), color, self.epoch.load(Ordering::Acquire))
        else {
            return Ok(None);
        };
        if phase.barrier_active() {
            shade_initial_references(&self.heap, &self.queue, fields);
        }
        Ok(Some(object.id()))
    }

    /// Start a heap-growth cycle if the allocation about to happen reaches
    /// the threshold. Runs before the insert so the new object is not part
    /// of the cycle it triggers.
    fn maybe_trigger(&self, in_mutator: bool) {
        let TriggerPolicy::HeapGrowth { threshold } = self.config.read().trigger else {
            return;
        };
        let count = self.allocs_since_cycle.load(Ordering::Relaxed) + 1;
        if count < threshold || self.growth_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.request_cycle("heap_growth") {
            return;
        }

        // No background thread: collect here unless a cycle is being driven.
        let Some(mut state) = self.cycle.try_lock() else {
            self.growth_requested.store(false, Ordering::Release);
            return;
        };
        if self.phase.get() != CyclePhase::Idle {
            self.growth_requested.store(false, Ordering::Release);
            return;
        }
        // The allocation goes ahead either way; a failed cycle is logged and
        // counted as aborted.
        let _ = self.blocking(in_mutator, || self.cycle_locked(&mut state, "heap_growth"));
    }

    /// Store `to` into field `field` of `from` through the write barrier and
    /// return the previous value.
    ///
    /// # Errors
    ///
    /// [`GcError::DanglingReference`] if `from` or `to` is not live and
    /// [`GcError::FieldOutOfBounds`] if `field` does not exist.
    pub fn set_reference(
        &self,
        from: ObjectId,
        field: usize,
        to: Option<ObjectId>,
    ) -> Result<Option<ObjectId>> {
        let holder = self.object(from)?;
        let _gate = self.gate.read();
        let active = self.phase.get().barrier_active();
        write_reference(&self.heap, &self.queue, &holder, field, to, active)
    }

    /// Store without the write barrier.
    ///
    /// Only for tests that need to break the tri-color invariant on purpose.
    ///
    /// # Errors
    ///
    /// As for [`set_reference`](Self::set_reference), except that `to` is not
    /// checked.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_reference_unbarriered(
        &self,
        from: ObjectId,
        field: usize,
        to: Option<ObjectId>,
    ) -> Result<Option<ObjectId>> {
        let holder = self.object(from)?;
        crate::gc::barrier::write_reference_unbarriered(&holder, field, to)
    }

    /// Read field `field` of `from`.
    ///
    /// # Errors
    ///
    /// [`GcError::DanglingReference`] or [`GcError::FieldOutOfBounds`].
    pub fn get_reference(&self, from: ObjectId, field: usize) -> Result<Option<ObjectId>> {
        let holder = self.object(from)?;
        let fields = holder.read_fields();
        fields
            .get(field)
            .copied()
            .ok_or(GcError::FieldOutOfBounds {
                object: from,
                field,
                len: fields.len(),
            })
    }

    /// The non-empty fields of `id`, in field order.
    ///
    /// # Errors
    ///
    /// [`GcError::DanglingReference`] if `id` is not live.
    pub fn references(&self, id: ObjectId) -> Result<Vec<ObjectId>> {
        Ok(self.object(id)?.references())
    }

    fn object(&self, id: ObjectId) -> Result<Arc<HeapObject>> {
        self.heap.get(id).ok_or(GcError::DanglingReference(id))
    }

    /// Ask the root enumerator for the current root set.
    ///
    /// # Errors
    ///
    /// [`GcError::RootEnumeration`] if the enumerator fails.
    pub fn get_roots(&self) -> Result<RootSet> {
        let mut roots = RootSet::new();
        self.roots.enumerate(&mut roots)?;
        Ok(roots)
    }

    /// Returns `true` if `id` names an object that has not been reclaimed.
    #[must_use]
    pub fn is_live(&self, id: ObjectId) -> bool {
        self.heap.contains(id)
    }

    /// Current color of `id`, or `None` if it is not live.
    #[must_use]
    pub fn color_of(&self, id: ObjectId) -> Option<Color> {
        self.heap.get(id).map(|object| object.color().load())
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if the heap holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The heap itself, for inspection.
    #[must_use]
    pub const fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Number of the current (or last) cycle. Zero before the first cycle.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Phase of the cycle in progress.
    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        self.phase.get()
    }

    /// Check every Black object for a White target.
    ///
    /// # Errors
    ///
    /// [`GcError::InvariantViolation`] naming the first such edge found.
    pub fn verify_invariant(&self) -> Result<()> {
        match mark::find_black_to_white(&self.heap) {
            Some((from, to)) => Err(GcError::InvariantViolation { from, to }),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// The current configuration.
    #[must_use]
    pub fn config(&self) -> GcConfig {
        *self.config.read()
    }

    /// Replace the trigger policy.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidConfig`] for a zero threshold or period.
    pub fn configure(&self, trigger: TriggerPolicy) -> Result<()> {
        let mut config = self.config();
        config.trigger = trigger;
        self.set_config(config)
    }

    /// Replace the whole configuration. Takes effect from the next slice.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidConfig`] if `config` does not validate.
    pub fn set_config(&self, config: GcConfig) -> Result<()> {
        config.validate()?;
        self.heap.set_capacity(config.max_objects);
        *self.config.write() = config;
        // Let a sleeping background thread pick up a new period.
        self.requests.wake.notify_all();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Collect now.
    ///
    /// In [`CollectMode::Sync`] a cycle already in progress is finished first
    /// and then a full cycle runs on this thread. A thread registered as a
    /// mutator should call [`Mutator::collect_now`] instead.
    ///
    /// # Errors
    ///
    /// [`GcError::CollectorNotRunning`] for an async request without a
    /// background thread, and any error that aborted the cycle.
    pub fn collect_now(&self, mode: CollectMode) -> Result<CollectOutcome> {
        self.collect(mode, false)
    }

    fn collect(&self, mode: CollectMode, in_mutator: bool) -> Result<CollectOutcome> {
        match mode {
            CollectMode::Sync => self
                .blocking(in_mutator, || self.run_cycle("explicit"))
                .map(CollectOutcome::Completed),
            CollectMode::Async => {
                if self.request_cycle("explicit") {
                    Ok(CollectOutcome::Requested)
                } else {
                    Err(GcError::CollectorNotRunning)
                }
            }
        }
    }

    /// Drop a requested cycle that the background thread has not started.
    /// Returns `true` if there was one. A started cycle always completes.
    pub fn cancel_pending(&self) -> bool {
        let Some(trigger) = self.requests.state.lock().pending.take() else {
            return false;
        };
        if trigger == "heap_growth" {
            // Count towards the next threshold from here.
            self.allocs_since_cycle.store(0, Ordering::Relaxed);
        }
        self.growth_requested.store(false, Ordering::Release);
        true
    }

    /// Block until at least `count` cycles have completed or `timeout`
    /// passes. Returns whether the count was reached.
    pub fn wait_for_cycles(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completed.lock();
        while *completed < count {
            if self
                .cycle_done
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                return *completed >= count;
            }
        }
        true
    }

    /// Cycles completed so far.
    #[must_use]
    pub fn completed_cycles(&self) -> u64 {
        *self.completed.lock()
    }

    /// Metrics of the most recent completed cycle.
    #[must_use]
    pub fn last_cycle_metrics(&self) -> Option<GcMetrics> {
        self.history.last()
    }

    /// Metrics of recent cycles.
    #[must_use]
    pub const fn history(&self) -> &GcHistory {
        &self.history
    }

    /// Totals over the collector's lifetime.
    #[must_use]
    pub const fn global_metrics(&self) -> &GlobalMetrics {
        &self.metrics
    }

    fn request_cycle(&self, trigger: &'static str) -> bool {
        let mut requests = self.requests.state.lock();
        if !requests.running || requests.shutdown {
            return false;
        }
        requests.pending.get_or_insert(trigger);
        drop(requests);
        self.requests.wake.notify_all();
        true
    }

    fn blocking<T>(&self, in_mutator: bool, f: impl FnOnce() -> T) -> T {
        if !in_mutator {
            return f();
        }
        self.control.enter_safe_region();
        let result = f();
        self.control.exit_safe_region();
        result
    }

    fn run_cycle(&self, trigger: &'static str) -> Result<GcMetrics> {
        let mut state = self.cycle.lock();
        self.cycle_locked(&mut state, trigger)
    }

    fn cycle_locked(&self, state: &mut CycleState, trigger: &'static str) -> Result<GcMetrics> {
        if self.phase.get() != CyclePhase::Idle {
            self.complete(state)?;
        }
        let gc_id = next_gc_id();
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::internal::trace_cycle(trigger, gc_id, self.epoch() + 1);
        #[cfg(not(feature = "tracing"))]
        let _ = trigger;

        self.begin(state, gc_id)?;
        self.complete(state)
    }

    /// Drive the cycle in progress to the end.
    fn complete(&self, state: &mut CycleState) -> Result<GcMetrics> {
        loop {
            match self.phase.get() {
                CyclePhase::Marking => {
                    let budget = self.config.read().mark_slice_budget;
                    match self.mark_step(state, budget)? {
                        MarkSliceResult::Drained { .. } => {
                            self.terminate_step(state)?;
                        }
                        MarkSliceResult::Pending { .. } => std::thread::yield_now(),
                    }
                }
                CyclePhase::Sweeping => {
                    // Pending here only while allocations finish the batches
                    // they claimed.
                    if let (_, Some(metrics)) = self.sweep_step(state, usize::MAX)? {
                        return Ok(metrics);
                    }
                    std::thread::yield_now();
                }
                actual => {
                    return Err(GcError::InvalidPhase {
                        expected: CyclePhase::Marking,
                        actual,
                    })
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Step API
    // ------------------------------------------------------------------

    /// Begin a cycle: stop mutators, snapshot and shade the roots, and enter
    /// [`CyclePhase::Marking`]. Returns the number of roots.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidPhase`] unless idle. [`GcError::RootEnumeration`] if
    /// the enumerator fails; the cycle is then abandoned with every object
    /// left White.
    pub fn start_cycle(&self) -> Result<usize> {
        let mut state = self.cycle.lock();
        self.begin(&mut state, next_gc_id())
    }

    /// Scan up to `budget` Gray objects.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidPhase`] unless marking.
    pub fn mark_slice(&self, budget: usize) -> Result<MarkSliceResult> {
        let mut state = self.cycle.lock();
        self.mark_step(&mut state, budget)
    }

    /// Stop mutators and try to finish marking. Returns `true` if marking is
    /// complete and sweeping has begun, `false` if fresh Gray work was found
    /// and marking resumed.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidPhase`] unless marking. [`GcError::RootEnumeration`]
    /// or [`GcError::InvariantViolation`] abandon the cycle; nothing is swept
    /// and every object is left White.
    pub fn terminate_marking(&self) -> Result<bool> {
        let mut state = self.cycle.lock();
        self.terminate_step(&mut state)
    }

    /// Sweep up to `budget` slots.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidPhase`] unless sweeping.
    pub fn sweep_slice(&self, budget: usize) -> Result<SweepSliceResult> {
        let mut state = self.cycle.lock();
        self.sweep_step(&mut state, budget).map(|(result, _)| result)
    }

    fn expect_phase(&self, expected: CyclePhase) -> Result<()> {
        let actual = self.phase.get();
        if actual == expected {
            Ok(())
        } else {
            Err(GcError::InvalidPhase { expected, actual })
        }
    }

    fn advance(&self, from: CyclePhase, to: CyclePhase) -> Result<()> {
        let _gate = self.gate.write();
        self.phase
            .transition(from, to)
            .map_err(|actual| GcError::InvalidPhase {
                expected: from,
                actual,
            })
    }

    fn shade_roots(&self, roots: &RootSet) {
        for id in roots.iter() {
            if let Some(object) = self.heap.get(id) {
                self.queue.shade(&object, ShadeSource::Root);
            }
        }
    }

    fn begin(&self, state: &mut CycleState, gc_id: GcId) -> Result<usize> {
        self.expect_phase(CyclePhase::Idle)?;
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::internal::trace_phase(CyclePhase::RootSnapshot, gc_id);

        *state = CycleState::new(gc_id);
        state.started = Some(Instant::now());
        state.timer.start();
        self.queue.reset();

        self.control.suspend_all();
        {
            let gate = self.gate.write();
            if let Err(actual) = self
                .phase
                .transition(CyclePhase::Idle, CyclePhase::RootSnapshot)
            {
                drop(gate);
                self.control.resume_all();
                return Err(GcError::InvalidPhase {
                    expected: CyclePhase::Idle,
                    actual,
                });
            }
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        self.allocs_since_cycle.store(0, Ordering::Relaxed);
        self.growth_requested.store(false, Ordering::Release);
        log_phase_start(CyclePhase::RootSnapshot, self.heap.len());

        let roots = match self.get_roots() {
            Ok(roots) => roots,
            Err(err) => return Err(self.abort(err)),
        };
        self.shade_roots(&roots);
        state.roots = roots.len();
        if let Err(err) = self.advance(CyclePhase::RootSnapshot, CyclePhase::Marking) {
            return Err(self.abort(err));
        }

        state.timer.end_snapshot();
        self.control.resume_all();
        state.timer.start();
        log_phase_end(CyclePhase::RootSnapshot, roots.len());
        Ok(roots.len())
    }

    fn mark_step(&self, state: &mut CycleState, budget: usize) -> Result<MarkSliceResult> {
        self.expect_phase(CyclePhase::Marking)?;
        let workers = self.config.read().mark_workers;
        let result = mark::mark_slice(&self.heap, &self.queue, budget, workers);
        state.marked += result.objects_marked();
        Ok(result)
    }

    fn terminate_step(&self, state: &mut CycleState) -> Result<bool> {
        self.expect_phase(CyclePhase::Marking)?;
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::internal::trace_phase(CyclePhase::MarkTermination, state.gc_id);

        state.timer.end_mark();
        self.control.suspend_all();
        state.timer.start();
        if let Err(err) = self.advance(CyclePhase::Marking, CyclePhase::MarkTermination) {
            self.control.resume_all();
            return Err(err);
        }
        state.rounds += 1;
        log_phase_start(CyclePhase::MarkTermination, self.queue.len());

        let roots = match self.get_roots() {
            Ok(roots) => roots,
            Err(err) => return Err(self.abort(err)),
        };
        self.shade_roots(&roots);

        let config = self.config();
        if !self.queue.is_empty() {
            if state.rounds < config.max_termination_rounds {
                if let Err(err) = self.advance(CyclePhase::MarkTermination, CyclePhase::Marking) {
                    return Err(self.abort(err));
                }
                state.timer.end_termination();
                self.control.resume_all();
                state.timer.start();
                log_phase_end(CyclePhase::MarkTermination, 0);
                return Ok(false);
            }
            state.marked += mark::drain(&self.heap, &self.queue, usize::MAX);
            state.fallback = FallbackReason::TerminationRoundsExceeded;
            log_fallback(state.fallback, state.rounds);
        }

        if config.verify_marking {
            if let Some((from, to)) = mark::find_black_to_white(&self.heap) {
                return Err(self.abort(GcError::InvariantViolation { from, to }));
            }
        }
        let sweep_batch = config.sweep_batch;
        self.sweeper
            .reset(self.heap.slot_count(), self.epoch(), sweep_batch);
        if let Err(err) = self.advance(CyclePhase::MarkTermination, CyclePhase::Sweeping) {
            return Err(self.abort(err));
        }

        state.timer.end_termination();
        self.control.resume_all();
        state.timer.start();
        log_phase_end(CyclePhase::MarkTermination, state.marked);
        Ok(true)
    }

    fn sweep_step(
        &self,
        state: &mut CycleState,
        budget: usize,
    ) -> Result<(SweepSliceResult, Option<GcMetrics>)> {
        self.expect_phase(CyclePhase::Sweeping)?;
        let batch = self.config.read().sweep_batch;
        let result = self.sweeper.sweep_slice(&self.heap, budget, batch);
        if let SweepSliceResult::Complete { .. } = result {
            state.timer.end_sweep();
            return Ok((result, Some(self.finish(state)?)));
        }
        Ok((result, None))
    }

    fn finish(&self, state: &CycleState) -> Result<GcMetrics> {
        let metrics = GcMetrics {
            epoch: self.epoch(),
            duration: state.started.map_or(Duration::ZERO, |started| started.elapsed()),
            snapshot_pause: state.timer.snapshot,
            termination_pause: state.timer.termination,
            longest_termination_pause: state.timer.longest_termination,
            mark_duration: state.timer.mark,
            sweep_duration: state.timer.sweep,
            roots: state.roots,
            objects_marked: state.marked,
            objects_reclaimed: self.sweeper.reclaimed(),
            objects_surviving: self.sweeper.surviving(),
            barrier_shades: self.queue.barrier_shades(),
            termination_rounds: state.rounds,
            fallback_occurred: state.fallback != FallbackReason::None,
            fallback_reason: state.fallback,
        };
        self.advance(CyclePhase::Sweeping, CyclePhase::Idle)?;
        self.queue.reset();

        self.history.push(metrics);
        self.metrics.record(&metrics);
        log_phase_end(CyclePhase::Sweeping, metrics.objects_reclaimed);
        log_cycle_end(&metrics);

        *self.completed.lock() += 1;
        self.cycle_done.notify_all();
        Ok(metrics)
    }

    /// Abandon the cycle in progress while mutators are stopped.
    fn abort(&self, error: GcError) -> GcError {
        let phase = self.phase.get();
        self.queue.reset();
        self.heap.whiten_all();
        {
            let _gate = self.gate.write();
            let _ = self.phase.transition(phase, CyclePhase::Idle);
        }
        self.metrics.record_abort();
        log_abort(phase, &error);
        self.control.resume_all();
        error
    }

    // ------------------------------------------------------------------
    // Background thread
    // ------------------------------------------------------------------

    /// Start the background collector thread. Does nothing if it is already
    /// running.
    ///
    /// The thread serves [`CollectMode::Async`] requests, heap-growth
    /// triggers and the [`TriggerPolicy::Periodic`] timer.
    ///
    /// # Errors
    ///
    /// [`GcError::SpawnFailed`] if the thread cannot be created.
    pub fn spawn_collector_thread(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        {
            let mut requests = self.requests.state.lock();
            requests.shutdown = false;
            requests.running = true;
        }

        let collector = Arc::downgrade(self);
        let requests = Arc::clone(&self.requests);
        let handle = std::thread::Builder::new()
            .name("tricolor-gc".into())
            .spawn(move || background_loop(&collector, &requests))
            .map_err(|err| {
                self.requests.state.lock().running = false;
                GcError::SpawnFailed(err.to_string())
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop the background thread after its current cycle, dropping any
    /// pending request, and wait for it to exit.
    pub fn shutdown(&self) {
        let handle = self.worker.lock().take();
        self.signal_shutdown();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Returns `true` while the background thread is serving requests.
    #[must_use]
    pub fn is_collector_thread_running(&self) -> bool {
        let requests = self.requests.state.lock();
        requests.running && !requests.shutdown
    }

    fn signal_shutdown(&self) {
        let mut requests = self.requests.state.lock();
        requests.shutdown = true;
        requests.running = false;
        requests.pending = None;
        drop(requests);
        self.requests.wake.notify_all();
    }

    fn periodic_interval(&self) -> Option<Duration> {
        match self.config.read().trigger {
            TriggerPolicy::Periodic(period) => Some(period),
            TriggerPolicy::HeapGrowth { .. } | TriggerPolicy::Manual => None,
        }
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    /// Register the calling thread as a mutator.
    ///
    /// The returned handle unregisters on drop and must stay on the thread
    /// that created it.
    pub fn mutator(self: &Arc<Self>) -> Mutator {
        self.control.register_mutator();
        Mutator {
            collector: Arc::clone(self),
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

fn background_loop(collector: &Weak<Collector>, requests: &Requests) {
    loop {
        let Some(period) = collector.upgrade().map(|c| c.periodic_interval()) else {
            break;
        };

        let mut state = requests.state.lock();
        if state.pending.is_none() && !state.shutdown {
            match period {
                Some(period) => {
                    let timed_out = requests.wake.wait_for(&mut state, period).timed_out();
                    if timed_out && state.pending.is_none() {
                        state.pending = Some("periodic");
                    }
                }
                None => requests.wake.wait(&mut state),
            }
        }
        if state.shutdown {
            break;
        }
        let Some(trigger) = state.pending.take() else {
            continue;
        };
        drop(state);

        let Some(collector) = collector.upgrade() else {
            break;
        };
        // Aborted cycles are logged and counted by the collector.
        let _ = collector.run_cycle(trigger);
    }
    requests.state.lock().running = false;
}

/// A thread's registration as a mutator.
///
/// Operations through a `Mutator` poll for a pending stop before touching
/// the heap, and wait for collections inside a safe region so the thread
/// never blocks a cycle it is itself waiting on.
pub struct Mutator {
    collector: Arc<Collector>,
    _thread_bound: PhantomData<*const ()>,
}

impl fmt::Debug for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator").finish_non_exhaustive()
    }
}

impl Mutator {
    /// The collector this mutator is registered with.
    #[must_use]
    pub const fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Park here if the collector is stopping the world.
    pub fn safepoint(&self) {
        self.collector.control.safepoint();
    }

    /// Run `f` without counting as a running mutator, for blocking work that
    /// does not touch the heap.
    pub fn safe_region<T>(&self, f: impl FnOnce() -> T) -> T {
        self.collector.blocking(true, f)
    }

    /// See [`Collector::allocate`].
    ///
    /// # Errors
    ///
    /// As for [`Collector::allocate`].
    pub fn allocate(&self, refs: &[ObjectId]) -> Result<ObjectId> {
        self.safepoint();
        let fields: Vec<Option<ObjectId>> = refs.iter().copied().map(Some).collect();
        self.collector.allocate_fields(&fields, true)
    }

    /// See [`Collector::allocate_with_fields`].
    ///
    /// # Errors
    ///
    /// As for [`Collector::allocate`].
    pub fn allocate_with_fields(&self, count: usize) -> Result<ObjectId> {
        self.safepoint();
        self.collector.allocate_fields(&vec![None; count], true)
    }

    /// See [`Collector::set_reference`].
    ///
    /// # Errors
    ///
    /// As for [`Collector::set_reference`].
    pub fn set_reference(
        &self,
        from: ObjectId,
        field: usize,
        to: Option<ObjectId>,
    ) -> Result<Option<ObjectId>> {
        self.safepoint();
        self.collector.set_reference(from, field, to)
    }

    /// See [`Collector::get_reference`].
    ///
    /// # Errors
    ///
    /// As for [`Collector::get_reference`].
    pub fn get_reference(&self, from: ObjectId, field: usize) -> Result<Option<ObjectId>> {
        self.collector.get_reference(from, field)
    }

    /// See [`Collector::collect_now`].
    ///
    /// # Errors
    ///
    /// As for [`Collector::collect_now`].
    pub fn collect_now(&self, mode: CollectMode) -> Result<CollectOutcome> {
        self.collector.collect(mode, true)
    }
}

impl Drop for Mutator {
    fn drop(&mut self) {
        self.collector.control.unregister_mutator();
    }
}
