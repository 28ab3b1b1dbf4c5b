//! The sweep phase.
//!
//! Sweeping walks the slots that existed when marking finished, in batches.
//! White objects are reclaimed; everything else is reset to White for the
//! next cycle. Objects allocated after sweeping started carry the current
//! epoch and are left alone, wherever they land.
//!
//! Batches are claimed from a shared cursor, so the collector and allocating
//! mutators sweep side by side. Every allocation made while sweeping first
//! sweeps one batch, which keeps the sweep ahead of the fastest allocator.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::heap::{Heap, SweepBatch};

/// Outcome of one sweep slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepSliceResult {
    /// More slots remain.
    Pending {
        /// Objects reclaimed in this slice.
        reclaimed: usize,
        /// Slots still to visit.
        remaining_slots: usize,
    },
    /// Every slot has been visited; the cycle is over.
    Complete {
        /// Objects reclaimed over the whole sweep.
        total_reclaimed: usize,
        /// Objects retained over the whole sweep.
        total_surviving: usize,
    },
}

/// Shared cursor over the slots of one sweep.
#[derive(Debug, Default)]
pub struct Sweeper {
    /// Next unclaimed slot.
    cursor: AtomicUsize,
    /// Slots whose batch has been swept.
    done: AtomicUsize,
    end: AtomicUsize,
    epoch: AtomicU64,
    assist_batch: AtomicUsize,
    reclaimed: AtomicUsize,
    surviving: AtomicUsize,
}

impl Sweeper {
    /// A sweeper with nothing to sweep.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            assist_batch: AtomicUsize::new(1),
            reclaimed: AtomicUsize::new(0),
            surviving: AtomicUsize::new(0),
        }
    }

    /// Prepare to sweep slots `0..end` for the cycle numbered `epoch`.
    /// Allocations help with batches of `assist_batch` slots.
    ///
    /// Must not race with [`step`](Self::step): call it before the collector
    /// enters the sweeping phase.
    pub fn reset(&self, end: usize, epoch: u64, assist_batch: usize) {
        self.cursor.store(0, Ordering::Release);
        self.done.store(0, Ordering::Release);
        self.end.store(end, Ordering::Release);
        self.epoch.store(epoch, Ordering::Release);
        self.assist_batch.store(assist_batch.max(1), Ordering::Release);
        self.reclaimed.store(0, Ordering::Release);
        self.surviving.store(0, Ordering::Release);
    }

    /// Returns `true` once every slot has been swept.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire) >= self.end.load(Ordering::Acquire)
    }

    /// Slots not yet claimed by any sweeper.
    #[must_use]
    pub fn remaining(&self) -> usize {
        let end = self.end.load(Ordering::Acquire);
        end.saturating_sub(self.cursor.load(Ordering::Acquire))
    }

    /// Objects reclaimed so far.
    #[must_use]
    pub fn reclaimed(&self) -> usize {
        self.reclaimed.load(Ordering::Acquire)
    }

    /// Objects retained so far.
    #[must_use]
    pub fn surviving(&self) -> usize {
        self.surviving.load(Ordering::Acquire)
    }

    /// Claim and sweep the next `batch` slots. Returns `None` once every
    /// slot has been claimed.
    pub fn step(&self, heap: &Heap, batch: usize) -> Option<SweepBatch> {
        let end = self.end.load(Ordering::Acquire);
        let batch = batch.max(1);
        let start = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                (cursor < end).then(|| end.min(cursor.saturating_add(batch)))
            })
            .ok()?;
        let stop = end.min(start.saturating_add(batch));

        let result = heap.sweep_range(start..stop, self.epoch.load(Ordering::Acquire));
        self.reclaimed.fetch_add(result.reclaimed, Ordering::AcqRel);
        self.surviving.fetch_add(result.surviving, Ordering::AcqRel);
        self.done.fetch_add(stop - start, Ordering::AcqRel);
        Some(result)
    }

    /// Sweep one batch on behalf of an allocation.
    pub fn assist(&self, heap: &Heap) -> Option<SweepBatch> {
        self.step(heap, self.assist_batch.load(Ordering::Acquire))
    }

    /// Claim up to `budget` slots in batches of `batch`. The slab lock is
    /// released between batches.
    pub fn sweep_slice(&self, heap: &Heap, budget: usize, batch: usize) -> SweepSliceResult {
        let mut reclaimed = 0;
        let mut visited = 0;
        while visited < budget {
            let Some(step) = self.step(heap, batch.min(budget - visited)) else {
                break;
            };
            reclaimed += step.reclaimed;
            visited += step.slots_scanned.max(1);
        }

        if self.is_finished() {
            SweepSliceResult::Complete {
                total_reclaimed: self.reclaimed(),
                total_surviving: self.surviving(),
            }
        } else {
            // Either slots are left, or an allocation is still sweeping the
            // last batch it claimed.
            SweepSliceResult::Pending {
                reclaimed,
                remaining_slots: self.remaining(),
            }
        }
    }
}
