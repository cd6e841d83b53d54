//! Eviction Controller
//!
//! Once the admission cap is reached the controller starts shrinking the
//! committed set, one step per tick interval:
//!
//! ```text
//! Admitting -> EvictingMips -> ReclaimingSlots -> Exhausted
//! ```
//!
//! While evicting mips, every sparse slot drops its finest committed level
//! in lockstep (`min_mip` only grows). When `min_mip` reaches the smallest
//! eviction limit, whole slots are reclaimed oldest first until the
//! configured floor is reached. Calls before the interval has elapsed do
//! nothing, so ticking every frame is safe.

use std::time::Duration;

use sparsetex_core::{CommitStats, ReclaimPolicy};

use crate::device::SparseDevice;
use crate::residency::{ResidencyTable, SlotId};
use crate::RendererResult;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPhase {
    /// Admission still open, nothing is evicted
    Admitting,
    /// Raising the base level of every sparse slot one mip per tick
    EvictingMips,
    /// Deleting whole slots, oldest first
    ReclaimingSlots,
    /// Nothing left to evict
    Exhausted,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionStep {
    /// Not due yet, or nothing to do in this phase
    Idle,
    /// `mip` was decommitted in `slots` slots
    MipEvicted { mip: u32, slots: usize },
    /// The mip limit was reached; reclamation starts next tick
    MipsExhausted,
    /// A whole slot was deleted
    SlotReclaimed(SlotId),
    /// Eviction finished
    Exhausted,
}

/// Tick-gated eviction state machine
#[derive(Debug)]
pub struct EvictionController {
    phase: EvictionPhase,
    min_mip: u32,
    last_tick: Duration,
    tick_interval: Duration,
    reclaim_policy: ReclaimPolicy,
    min_resident_slots: usize,
}

impl EvictionController {
    /// Create a controller in the admitting phase
    pub fn new(
        tick_interval: Duration,
        reclaim_policy: ReclaimPolicy,
        min_resident_slots: usize,
    ) -> Self {
        Self {
            phase: EvictionPhase::Admitting,
            min_mip: 0,
            last_tick: Duration::ZERO,
            tick_interval,
            reclaim_policy,
            min_resident_slots,
        }
    }

    /// Close admission and start the eviction clock at `now`
    ///
    /// Only the first call has an effect.
    pub fn begin(&mut self, now: Duration) {
        if self.phase != EvictionPhase::Admitting {
            return;
        }
        log::info!("Admission closed, mip eviction every {:?}", self.tick_interval);
        self.phase = EvictionPhase::EvictingMips;
        self.last_tick = now;
    }

    /// Run one eviction step if the interval has elapsed since the last one
    pub fn tick<D: SparseDevice + ?Sized>(
        &mut self,
        now: Duration,
        table: &mut ResidencyTable,
        device: &mut D,
        stats: &mut CommitStats,
    ) -> RendererResult<EvictionStep> {
        match self.phase {
            EvictionPhase::Admitting | EvictionPhase::Exhausted => return Ok(EvictionStep::Idle),
            EvictionPhase::EvictingMips | EvictionPhase::ReclaimingSlots => {}
        }
        if now.saturating_sub(self.last_tick) < self.tick_interval {
            return Ok(EvictionStep::Idle);
        }
        self.last_tick = now;

        match self.phase {
            EvictionPhase::EvictingMips => self.evict_mips(table, device, stats),
            EvictionPhase::ReclaimingSlots => self.reclaim_slot(table, device, stats),
            EvictionPhase::Admitting | EvictionPhase::Exhausted => Ok(EvictionStep::Idle),
        }
    }

    fn evict_mips<D: SparseDevice + ?Sized>(
        &mut self,
        table: &mut ResidencyTable,
        device: &mut D,
        stats: &mut CommitStats,
    ) -> RendererResult<EvictionStep> {
        let limit = table.eviction_limit();
        if self.min_mip >= limit {
            log::info!("Mip eviction reached level {}, reclaiming slots", self.min_mip);
            self.phase = EvictionPhase::ReclaimingSlots;
            return Ok(EvictionStep::MipsExhausted);
        }

        let mip = self.min_mip;
        device.memory_barrier();
        let mut evicted = 0;
        for slot in table.slots_mut() {
            if slot.evict_mip(device, mip, stats)? {
                evicted += 1;
            }
        }
        self.min_mip += 1;

        log::debug!("Evicted mip {mip} from {evicted} slots, limit {limit}");
        Ok(EvictionStep::MipEvicted {
            mip,
            slots: evicted,
        })
    }

    fn reclaim_slot<D: SparseDevice + ?Sized>(
        &mut self,
        table: &mut ResidencyTable,
        device: &mut D,
        stats: &mut CommitStats,
    ) -> RendererResult<EvictionStep> {
        if self.reclaim_policy == ReclaimPolicy::Disabled || table.len() <= self.min_resident_slots
        {
            return Ok(self.finish(table));
        }

        let step = match table.reclaim_oldest(device, stats)? {
            Some(id) => EvictionStep::SlotReclaimed(id),
            None => return Ok(self.finish(table)),
        };
        if table.len() <= self.min_resident_slots {
            self.finish(table);
        }
        Ok(step)
    }

    fn finish(&mut self, table: &ResidencyTable) -> EvictionStep {
        log::info!("Eviction exhausted with {} slots resident", table.len());
        self.phase = EvictionPhase::Exhausted;
        EvictionStep::Exhausted
    }

    pub fn phase(&self) -> EvictionPhase {
        self.phase
    }

    /// Finest mip still committed in every sparse slot
    pub fn min_mip(&self) -> u32 {
        self.min_mip
    }

    /// Time of the last step that did work
    pub fn last_tick(&self) -> Duration {
        self.last_tick
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Whether new images may still be admitted
    pub fn is_admitting(&self) -> bool {
        self.phase == EvictionPhase::Admitting
    }
}
