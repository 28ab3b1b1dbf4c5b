//! Collection machinery: cycle phases, the mark queue, the write barrier,
//! and the mark and sweep phases.

pub mod barrier;
pub mod mark;
pub mod mark_queue;
pub mod sweep;

use std::sync::atomic::{AtomicUsize, Ordering};

pub use mark::MarkSliceResult;
pub use mark_queue::MarkQueue;
pub use sweep::SweepSliceResult;

/// Phase of the collector's cycle state machine.
///
/// ```text
/// Idle -> RootSnapshot -> Marking <-> MarkTermination -> Sweeping -> Idle
/// ```
///
/// `RootSnapshot` and `MarkTermination` run with mutators stopped. Both may
/// also fall back to `Idle` when the cycle is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum CyclePhase {
    /// No cycle in progress.
    Idle = 0,
    /// Stop-the-world root enumeration.
    RootSnapshot = 1,
    /// Concurrent marking.
    Marking = 2,
    /// Stop-the-world confirmation that marking is finished.
    MarkTermination = 3,
    /// Concurrent, incremental sweeping.
    Sweeping = 4,
}

impl CyclePhase {
    /// Decodes a stored discriminant.
    #[must_use]
    pub const fn from_usize(v: usize) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::RootSnapshot),
            2 => Some(Self::Marking),
            3 => Some(Self::MarkTermination),
            4 => Some(Self::Sweeping),
            _ => None,
        }
    }

    /// Short lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RootSnapshot => "root_snapshot",
            Self::Marking => "marking",
            Self::MarkTermination => "mark_termination",
            Self::Sweeping => "sweeping",
        }
    }

    /// Returns `true` in the phases where reference writes must go through
    /// the write barrier and new objects are allocated Black.
    #[must_use]
    pub const fn barrier_active(self) -> bool {
        matches!(
            self,
            Self::RootSnapshot | Self::Marking | Self::MarkTermination
        )
    }

    /// Returns `true` if moving from `self` to `to` is a legal step.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::RootSnapshot)
                | (Self::RootSnapshot | Self::MarkTermination, Self::Marking)
                | (Self::Marking, Self::MarkTermination)
                | (Self::MarkTermination, Self::Sweeping)
                | (
                    Self::Sweeping | Self::RootSnapshot | Self::MarkTermination,
                    Self::Idle
                )
        )
    }
}

/// Atomic holder of the current [`CyclePhase`].
#[derive(Debug)]
pub struct PhaseState {
    phase: AtomicUsize,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseState {
    /// Starts in [`CyclePhase::Idle`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: AtomicUsize::new(CyclePhase::Idle as usize),
        }
    }

    /// The current phase.
    pub fn get(&self) -> CyclePhase {
        CyclePhase::from_usize(self.phase.load(Ordering::SeqCst)).unwrap_or(CyclePhase::Idle)
    }

    /// Moves to `to` if that is a legal step from `from` and the phase is
    /// still `from`. Returns the phase actually observed on failure.
    pub fn transition(&self, from: CyclePhase, to: CyclePhase) -> Result<(), CyclePhase> {
        if !from.can_transition_to(to) {
            return Err(self.get());
        }
        self.phase
            .compare_exchange(from as usize, to as usize, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| CyclePhase::from_usize(actual).unwrap_or(CyclePhase::Idle))
    }
}
