//! Residency Table
//!
//! Ordered collection of admitted slots. Insertion order is admission
//! order, which is what reclamation walks (oldest first) and what the
//! round-robin cursor cycles over.
//!
//! At most one handle is resident at any time. Switching the active slot
//! is fenced by a barrier on each side so no in-flight draw samples a
//! handle that has just been made non-resident.

use std::fmt;

use ahash::AHashMap;
use indexmap::IndexMap;
use sparsetex_assets::TextureDescriptor;
use sparsetex_core::CommitStats;

use crate::device::{BindlessHandle, DeviceCaps, SparseDevice, TextureId};
use crate::page::PageGeometryResolver;
use crate::slot::{SlotOptions, SparseTextureSlot};
use crate::RendererResult;

/// Stable slot identifier, never reused within a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Result of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The image got a slot
    Admitted(SlotId),
    /// The table is full; nothing was created
    Rejected,
}

/// Admitted slots plus the handle lookup and active-slot tracking
#[derive(Debug)]
pub struct ResidencyTable {
    slots: IndexMap<SlotId, SparseTextureSlot>,
    handles: AHashMap<TextureId, BindlessHandle>,
    admission_cap: usize,
    options: SlotOptions,
    next_id: u32,
    cursor: usize,
    active: Option<SlotId>,
}

impl ResidencyTable {
    /// Create an empty table
    pub fn new(admission_cap: usize, options: SlotOptions) -> Self {
        Self {
            slots: IndexMap::with_capacity(admission_cap),
            handles: AHashMap::with_capacity(admission_cap),
            admission_cap,
            options,
            next_id: 0,
            cursor: 0,
            active: None,
        }
    }

    /// Admit an image unless the table is full
    ///
    /// In bindless mode the handle is created after commitment; it is not
    /// made resident until the slot is activated.
    pub fn try_admit<D: SparseDevice + ?Sized>(
        &mut self,
        device: &mut D,
        resolver: &mut PageGeometryResolver,
        desc: &TextureDescriptor,
        stats: &mut CommitStats,
    ) -> RendererResult<Admission> {
        if self.is_full() {
            log::trace!("Rejected {}: {} slots admitted", desc.name(), self.slots.len());
            return Ok(Admission::Rejected);
        }

        let page = resolver.resolve(device, self.options.target(), self.options.storage_format);
        let id = SlotId(self.next_id);
        let mut slot = SparseTextureSlot::create(device, id, page, desc, &self.options, stats)?;

        if device.capabilities().contains(DeviceCaps::BINDLESS_TEXTURE) {
            match slot.attach_handle(device) {
                Ok(handle) => {
                    self.handles.insert(slot.texture(), handle);
                }
                Err(err) => {
                    if let Err(destroy_err) = slot.destroy(device, stats) {
                        log::error!("Failed to release {}: {destroy_err}", desc.name());
                    }
                    return Err(err);
                }
            }
        }

        self.next_id += 1;
        log::info!(
            "Admitted {} as {id}: mips {}..={} of {} ({}), {}/{} slots",
            slot.name(),
            slot.committed_base_mip(),
            slot.committed_max_mip(),
            slot.mip_count(),
            if slot.is_sparse() { "sparse" } else { "fully backed" },
            self.slots.len() + 1,
            self.admission_cap
        );
        self.slots.insert(id, slot);
        Ok(Admission::Admitted(id))
    }

    /// Whether no further image can be admitted
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.admission_cap
    }

    /// Next slot in round-robin order, advancing the cursor
    pub fn advance_cursor(&mut self) -> Option<SlotId> {
        if self.slots.is_empty() {
            return None;
        }
        self.cursor %= self.slots.len();
        let (&id, _) = self.slots.get_index(self.cursor)?;
        self.cursor = (self.cursor + 1) % self.slots.len();
        Some(id)
    }

    /// Make `id` the single resident slot
    ///
    /// Returns the slot's handle (`None` in classic binding mode) or
    /// `Ok(None)` when the slot does not exist.
    pub fn activate<D: SparseDevice + ?Sized>(
        &mut self,
        device: &mut D,
        id: SlotId,
    ) -> RendererResult<Option<BindlessHandle>> {
        if !self.slots.contains_key(&id) {
            return Ok(None);
        }
        if self.active == Some(id) {
            return Ok(self.slots.get(&id).and_then(|slot| slot.handle()));
        }

        device.memory_barrier();
        if let Some(previous) = self.active {
            if let Some(slot) = self.slots.get_mut(&previous) {
                slot.set_resident(device, false)?;
            }
            self.active = None;
        }
        let handle = match self.slots.get_mut(&id) {
            Some(slot) => {
                slot.set_resident(device, true)?;
                slot.handle()
            }
            None => None,
        };
        self.active = Some(id);
        device.memory_barrier();
        Ok(handle)
    }

    /// Make the active slot non-resident
    pub fn deactivate<D: SparseDevice + ?Sized>(&mut self, device: &mut D) -> RendererResult<()> {
        let Some(id) = self.active else {
            return Ok(());
        };
        if let Some(slot) = self.slots.get_mut(&id) {
            device.memory_barrier();
            slot.set_resident(device, false)?;
            device.memory_barrier();
        }
        self.active = None;
        Ok(())
    }

    /// Remove and destroy the oldest slot
    pub fn reclaim_oldest<D: SparseDevice + ?Sized>(
        &mut self,
        device: &mut D,
        stats: &mut CommitStats,
    ) -> RendererResult<Option<SlotId>> {
        let Some((&id, _)) = self.slots.first() else {
            return Ok(None);
        };
        if self.active == Some(id) {
            self.deactivate(device)?;
        }
        let Some((id, slot)) = self.slots.shift_remove_index(0) else {
            return Ok(None);
        };

        // Every remaining slot moved down one position
        self.cursor = self.cursor.saturating_sub(1);
        if self.cursor >= self.slots.len() {
            self.cursor = 0;
        }

        self.handles.remove(&slot.texture());
        let name = slot.name().to_string();
        slot.destroy(device, stats)?;
        log::info!("Reclaimed {id} ({name}), {} slots left", self.slots.len());
        Ok(Some(id))
    }

    /// Release residency and destroy every slot
    ///
    /// Every slot is destroyed even when one fails; the first error is
    /// returned afterwards.
    pub fn release_all<D: SparseDevice + ?Sized>(
        &mut self,
        device: &mut D,
        stats: &mut CommitStats,
    ) -> RendererResult<()> {
        let mut first_error = self.deactivate(device).err();
        self.active = None;
        self.handles.clear();
        self.cursor = 0;
        for (id, slot) in self.slots.drain(..) {
            if let Err(err) = slot.destroy(device, stats) {
                log::error!("Failed to destroy {id}: {err}");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Smallest eviction limit over sparse slots, 0 when there are none
    pub fn eviction_limit(&self) -> u32 {
        self.slots
            .values()
            .filter_map(SparseTextureSlot::eviction_limit)
            .min()
            .unwrap_or(0)
    }

    /// Handle of the texture in a slot
    pub fn handle_for(&self, texture: TextureId) -> Option<BindlessHandle> {
        self.handles.get(&texture).copied()
    }

    pub fn get(&self, id: SlotId) -> Option<&SparseTextureSlot> {
        self.slots.get(&id)
    }

    /// Slots in admission order
    pub fn slots(&self) -> impl Iterator<Item = &SparseTextureSlot> {
        self.slots.values()
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = &mut SparseTextureSlot> {
        self.slots.values_mut()
    }

    /// Currently active slot
    pub fn active(&self) -> Option<SlotId> {
        self.active
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn admission_cap(&self) -> usize {
        self.admission_cap
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots whose handle is resident
    pub fn resident_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.is_resident()).count()
    }
}
