//! Residency Manager
//!
//! Owns the device, the residency table and the eviction controller and
//! runs the per-frame sequence:
//!
//! 1. eviction tick (a no-op until admission closes or the interval elapses)
//! 2. admission of at most one new image while admission is open
//! 3. round-robin selection and activation of the slot to draw
//!
//! Admission closes on the admission that fills the table; from then on
//! only eviction changes the committed set.

use std::time::Duration;

use sparsetex_assets::TextureDescriptor;
use sparsetex_core::{BudgetStatus, CommitStats, ResidencyConfig};

use crate::device::{BindlessHandle, SparseDevice};
use crate::eviction::{EvictionController, EvictionPhase, EvictionStep};
use crate::material::MaterialBlock;
use crate::page::PageGeometryResolver;
use crate::residency::{Admission, ResidencyTable, SlotId};
use crate::slot::SlotOptions;
use crate::RendererResult;

/// The slot selected for drawing this frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveSlot {
    pub id: SlotId,
    /// `None` in classic binding mode
    pub handle: Option<BindlessHandle>,
    /// Uniform data for the draw
    pub material: MaterialBlock,
}

/// Everything one frame did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub step: EvictionStep,
    /// `None` when no image was offered
    pub admission: Option<Admission>,
    pub active: Option<ActiveSlot>,
}

/// Snapshot of residency state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidencyReport {
    pub slots: usize,
    pub sparse_slots: usize,
    pub resident_handles: usize,
    pub phase: EvictionPhase,
    pub min_mip: u32,
    pub committed_pages: u64,
    pub committed_bytes: u64,
    pub peak_bytes: u64,
    pub budget: BudgetStatus,
}

/// Sparse texture residency for one device
pub struct ResidencyManager<D: SparseDevice> {
    device: D,
    config: ResidencyConfig,
    resolver: PageGeometryResolver,
    table: ResidencyTable,
    eviction: EvictionController,
    stats: CommitStats,
    budget_status: BudgetStatus,
    now: Duration,
    released: bool,
}

impl<D: SparseDevice> ResidencyManager<D> {
    /// Create a manager; the configuration is validated first
    pub fn new(device: D, config: ResidencyConfig) -> RendererResult<Self> {
        config.validate()?;

        let options = SlotOptions {
            storage: config.storage,
            storage_format: config.storage_format,
            unsupported_format: config.unsupported_format,
        };
        log::info!(
            "Residency manager: cap {}, tick {:?}, {:?} storage, caps {:?}",
            config.admission_cap,
            config.tick_interval(),
            config.storage,
            device.capabilities()
        );

        Ok(Self {
            device,
            resolver: PageGeometryResolver::new(),
            table: ResidencyTable::new(config.admission_cap, options),
            eviction: EvictionController::new(
                config.tick_interval(),
                config.reclaim_policy,
                config.min_resident_slots,
            ),
            stats: CommitStats::new(),
            budget_status: BudgetStatus::Within,
            now: Duration::ZERO,
            released: false,
            config,
        })
    }

    /// Run one frame: eviction tick, optional admission, slot selection
    pub fn frame(
        &mut self,
        now: Duration,
        next: Option<&TextureDescriptor>,
    ) -> RendererResult<FrameReport> {
        let step = self.tick(now)?;
        let admission = match next {
            Some(desc) if self.eviction.is_admitting() => Some(self.try_admit(desc)?),
            Some(_) => Some(Admission::Rejected),
            None => None,
        };
        let active = self.select_next()?;

        Ok(FrameReport {
            step,
            admission,
            active,
        })
    }

    /// Advance the eviction controller to `now`
    pub fn tick(&mut self, now: Duration) -> RendererResult<EvictionStep> {
        self.now = self.now.max(now);
        let step = self.eviction.tick(
            self.now,
            &mut self.table,
            &mut self.device,
            &mut self.stats,
        )?;
        if step != EvictionStep::Idle {
            self.update_budget();
        }
        Ok(step)
    }

    /// Admit an image while admission is open
    pub fn try_admit(&mut self, desc: &TextureDescriptor) -> RendererResult<Admission> {
        if !self.eviction.is_admitting() {
            return Ok(Admission::Rejected);
        }
        let admission =
            self.table
                .try_admit(&mut self.device, &mut self.resolver, desc, &mut self.stats)?;
        if self.table.is_full() {
            self.eviction.begin(self.now);
        }
        self.update_budget();
        Ok(admission)
    }

    /// Pick the next slot round-robin and make it the resident one
    pub fn select_next(&mut self) -> RendererResult<Option<ActiveSlot>> {
        let Some(id) = self.table.advance_cursor() else {
            return Ok(None);
        };
        let handle = self.table.activate(&mut self.device, id)?;
        Ok(self.table.get(id).map(|slot| ActiveSlot {
            id,
            handle,
            material: MaterialBlock::for_slot(slot),
        }))
    }

    /// Release every handle and texture; the manager stays usable but empty
    pub fn release(&mut self) -> RendererResult<()> {
        self.table.release_all(&mut self.device, &mut self.stats)?;
        self.released = true;
        log::info!(
            "Released all slots, peak committed {} bytes",
            self.stats.peak_bytes
        );
        Ok(())
    }

    fn update_budget(&mut self) {
        let status = self.config.budget.status(self.stats.committed_bytes);
        if status != self.budget_status {
            match status {
                BudgetStatus::Within => {}
                BudgetStatus::Warning | BudgetStatus::Exceeded => log::warn!(
                    "Committed memory {:.1}% of budget ({status:?})",
                    self.config.budget.usage_percent(self.stats.committed_bytes)
                ),
            }
            self.budget_status = status;
        }
    }

    /// Current residency snapshot
    pub fn report(&self) -> ResidencyReport {
        ResidencyReport {
            slots: self.table.len(),
            sparse_slots: self.table.slots().filter(|slot| slot.is_sparse()).count(),
            resident_handles: self.table.resident_count(),
            phase: self.eviction.phase(),
            min_mip: self.eviction.min_mip(),
            committed_pages: self.stats.committed_pages,
            committed_bytes: self.stats.committed_bytes,
            peak_bytes: self.stats.peak_bytes,
            budget: self.budget_status,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn table(&self) -> &ResidencyTable {
        &self.table
    }

    pub fn eviction(&self) -> &EvictionController {
        &self.eviction
    }

    pub fn stats(&self) -> &CommitStats {
        &self.stats
    }

    pub fn config(&self) -> &ResidencyConfig {
        &self.config
    }

    /// Whether new images are still accepted
    pub fn is_admitting(&self) -> bool {
        self.eviction.is_admitting()
    }
}

impl<D: SparseDevice> Drop for ResidencyManager<D> {
    fn drop(&mut self) {
        if self.released && self.table.is_empty() {
            return;
        }
        if let Err(err) = self.table.release_all(&mut self.device, &mut self.stats) {
            log::error!("Failed to release residency on drop: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::{SoftwareDevice, SoftwareDeviceConfig};
    use sparsetex_assets::Checkerboard;
    use sparsetex_core::CommitBudget;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn manager(config: ResidencyConfig) -> ResidencyManager<SoftwareDevice> {
        ResidencyManager::new(SoftwareDevice::new(SoftwareDeviceConfig::default()), config).unwrap()
    }

    #[test]
    fn test_invalid_config() {
        let config = ResidencyConfig {
            admission_cap: 0,
            ..ResidencyConfig::default()
        };
        let result =
            ResidencyManager::new(SoftwareDevice::new(SoftwareDeviceConfig::default()), config);
        assert!(matches!(result, Err(crate::RendererError::Config(_))));
    }

    #[test]
    fn test_empty_frame() {
        let mut manager = manager(ResidencyConfig::quick());
        let report = manager.frame(ms(0), None).unwrap();
        assert_eq!(report.step, EvictionStep::Idle);
        assert_eq!(report.admission, None);
        assert_eq!(report.active, None);
    }

    #[test]
    fn test_admission_closes_at_cap() {
        let mut manager = manager(ResidencyConfig::quick());
        let desc = Checkerboard::new(256, 256).build("board").unwrap();

        for frame in 0..3 {
            let report = manager.frame(ms(frame * 16), Some(&desc)).unwrap();
            assert!(matches!(report.admission, Some(Admission::Admitted(_))));
        }
        assert!(!manager.is_admitting());
        assert_eq!(manager.eviction().last_tick(), ms(32));

        let report = manager.frame(ms(48), Some(&desc)).unwrap();
        assert_eq!(report.admission, Some(Admission::Rejected));
        assert_eq!(manager.table().len(), 3);
    }

    #[test]
    fn test_active_material() {
        let mut manager = manager(ResidencyConfig::quick());
        let desc = Checkerboard::new(512, 512).build("board").unwrap();

        let report = manager.frame(ms(0), Some(&desc)).unwrap();
        let active = report.active.unwrap();
        assert_eq!(active.id, SlotId(0));
        assert_eq!(active.material.handle(), active.handle);
        assert_eq!(active.material.mip_range(), (0, 2));
        assert_eq!(active.material.uv_scale, [1.0, 1.0, 0.0, 0.0]);
        manager.device().validate_sampling(active.handle.unwrap()).unwrap();
    }

    #[test]
    fn test_report_tracks_eviction() {
        let mut manager = manager(ResidencyConfig::quick());
        let desc = Checkerboard::new(512, 512).build("board").unwrap();
        for frame in 0..3 {
            manager.frame(ms(frame), Some(&desc)).unwrap();
        }
        let full = manager.report();
        assert_eq!(full.slots, 3);
        assert_eq!(full.sparse_slots, 3);
        assert_eq!(full.resident_handles, 1);
        assert_eq!(full.committed_pages, 3 * 21);

        let report = manager.frame(ms(2 + 100), None).unwrap();
        assert_eq!(report.step, EvictionStep::MipEvicted { mip: 0, slots: 3 });
        let evicted = manager.report();
        assert_eq!(evicted.min_mip, 1);
        assert_eq!(evicted.committed_pages, 3 * 5);
        assert_eq!(evicted.peak_bytes, full.committed_bytes);
        assert_eq!(manager.device().committed_bytes(), evicted.committed_bytes);
    }

    #[test]
    fn test_budget_warning() {
        let config = ResidencyConfig {
            budget: CommitBudget {
                max_bytes: 1024 * 1024,
                warning_threshold: 0.5,
            },
            ..ResidencyConfig::quick()
        };
        let mut manager = manager(config);
        let desc = Checkerboard::new(512, 512).build("board").unwrap();

        // 21 pages of 64 KiB exceed a 1 MiB budget; admission still succeeds
        let report = manager.frame(ms(0), Some(&desc)).unwrap();
        assert!(matches!(report.admission, Some(Admission::Admitted(_))));
        assert_eq!(manager.report().budget, BudgetStatus::Exceeded);
    }

    #[test]
    fn test_release() {
        let mut manager = manager(ResidencyConfig::quick());
        let desc = Checkerboard::new(256, 256).build("board").unwrap();
        manager.frame(ms(0), Some(&desc)).unwrap();

        manager.release().unwrap();
        assert_eq!(manager.device().texture_count(), 0);
        assert_eq!(manager.device().resident_handle_count(), 0);
        assert_eq!(manager.report().committed_bytes, 0);
    }

    #[test]
    fn test_time_never_rewinds() {
        let mut manager = manager(ResidencyConfig::quick());
        let desc = Checkerboard::new(256, 256).build("board").unwrap();
        for frame in 0..3 {
            manager.frame(ms(1000 + frame), Some(&desc)).unwrap();
        }
        // An earlier timestamp is treated as the latest one seen
        assert_eq!(manager.tick(ms(0)).unwrap(), EvictionStep::Idle);
        assert_eq!(manager.tick(ms(1102)).unwrap(), EvictionStep::MipEvicted { mip: 0, slots: 3 });
    }
}
