//! Sparse Texture Slots
//!
//! A slot is one admitted image: the texture object, its page geometry,
//! the committed mip range and (in bindless mode) its handle.
//!
//! Commitment invariants:
//! - pages are committed before any pixel data is uploaded into them
//! - only mips that cover a whole page and lie within the sparse levels
//!   are committed; the walk stops at the first one that does not
//! - the committed range is contiguous, `committed_base_mip..=committed_max_mip`

use glam::{UVec3, Vec2};
use sparsetex_assets::TextureDescriptor;
use sparsetex_core::{
    CommitStats, PixelFormat, StorageLayout, TextureTarget, UnsupportedFormatPolicy,
    eval_num_mips, mip_byte_size, mip_extent,
};

use crate::device::{
    BindlessHandle, DeviceCaps, FilterMode, PageRegion, SparseDevice, TextureId,
};
use crate::page::{PageGeometry, PageSize, plan_commitment};
use crate::residency::SlotId;
use crate::{RendererError, RendererResult};

/// Storage settings shared by every slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOptions {
    pub storage: StorageLayout,
    pub storage_format: PixelFormat,
    pub unsupported_format: UnsupportedFormatPolicy,
}

impl SlotOptions {
    /// Texture target the storage layout needs
    pub fn target(&self) -> TextureTarget {
        match self.storage {
            StorageLayout::PerImage => TextureTarget::Texture2D,
            StorageLayout::Atlas { .. } => TextureTarget::Texture2DArray,
        }
    }

    /// Storage extent for an image, or an error when the image does not fit
    pub fn storage_extent(&self, image: UVec3) -> RendererResult<UVec3> {
        match self.storage {
            StorageLayout::PerImage => Ok(image),
            StorageLayout::Atlas {
                width,
                height,
                layers,
            } => {
                if image.x > width || image.y > height || image.z != 1 {
                    return Err(RendererError::InvalidDescriptor(format!(
                        "image {image} does not fit a {width}x{height} atlas layer"
                    )));
                }
                Ok(UVec3::new(width, height, layers))
            }
        }
    }

    /// Level count of the storage; array layers never shrink
    pub fn storage_levels(&self, storage_extent: UVec3) -> u32 {
        match self.storage {
            StorageLayout::PerImage => eval_num_mips(storage_extent),
            StorageLayout::Atlas { .. } => {
                eval_num_mips(UVec3::new(storage_extent.x, storage_extent.y, 1))
            }
        }
    }

    /// Extent of one storage level
    pub fn level_extent(&self, storage_extent: UVec3, mip: u32) -> UVec3 {
        let planar = mip_extent(UVec3::new(storage_extent.x, storage_extent.y, 1), mip);
        match self.storage {
            StorageLayout::PerImage => mip_extent(storage_extent, mip),
            StorageLayout::Atlas { .. } => UVec3::new(planar.x, planar.y, storage_extent.z),
        }
    }
}

/// One admitted image and its GPU storage
#[derive(Debug)]
pub struct SparseTextureSlot {
    id: SlotId,
    name: String,
    texture: TextureId,
    target: TextureTarget,
    options: SlotOptions,
    /// Storage extent (atlas size for atlas layouts)
    extent: UVec3,
    /// Extent of the image inside the storage
    image_extent: UVec3,
    /// Storage level count
    mip_count: u32,
    /// `None` when the slot fell back to fully backed storage
    geometry: Option<PageGeometry>,
    committed_base_mip: u32,
    committed_max_mip: u32,
    committed_pages: u64,
    committed_bytes: u64,
    handle: Option<BindlessHandle>,
    resident: bool,
}

impl SparseTextureSlot {
    /// Create storage for `desc`, commit what can be committed and upload
    ///
    /// On failure nothing created here outlives the call.
    pub fn create<D: SparseDevice + ?Sized>(
        device: &mut D,
        id: SlotId,
        page: Option<PageSize>,
        desc: &TextureDescriptor,
        options: &SlotOptions,
        stats: &mut CommitStats,
    ) -> RendererResult<Self> {
        if !desc.format().uploads_into(options.storage_format) {
            return Err(RendererError::InvalidDescriptor(format!(
                "{}: {} data cannot be uploaded into {} storage",
                desc.name(),
                desc.format(),
                options.storage_format
            )));
        }

        let target = options.target();
        let extent = options.storage_extent(desc.extent())?;
        let mip_count = options.storage_levels(extent);

        let mut slot = Self {
            id,
            name: desc.name().to_string(),
            texture: TextureId(0),
            target,
            options: *options,
            extent,
            image_extent: desc.extent(),
            mip_count,
            geometry: None,
            committed_base_mip: 0,
            committed_max_mip: 0,
            committed_pages: 0,
            committed_bytes: 0,
            handle: None,
            resident: false,
        };

        let sparse_page =
            page.filter(|_| device.capabilities().contains(DeviceCaps::SPARSE_TEXTURE));

        if let Some(page) = sparse_page {
            slot.texture = slot.allocate(device, true)?;
            match slot.populate_sparse(device, desc, page, stats) {
                Ok(true) => return Ok(slot),
                Ok(false) => {
                    slot.abandon(device, stats);
                }
                Err(err) => {
                    slot.abandon(device, stats);
                    return Err(err);
                }
            }
        }

        // Sparse storage unavailable or nothing committable
        if options.unsupported_format == UnsupportedFormatPolicy::Reject {
            return Err(RendererError::UnsupportedFormat {
                target,
                format: options.storage_format,
            });
        }
        log::warn!(
            "{}: no committable mips for {} on {target}, using fully backed storage",
            slot.name,
            options.storage_format
        );

        slot.texture = slot.allocate(device, false)?;
        if let Err(err) = slot.populate_full(device, desc, stats) {
            slot.abandon(device, stats);
            return Err(err);
        }
        Ok(slot)
    }

    fn allocate<D: SparseDevice + ?Sized>(
        &self,
        device: &mut D,
        sparse: bool,
    ) -> RendererResult<TextureId> {
        let texture = device.create_texture(self.target, sparse)?;
        let configured = device
            .set_filtering(texture, FilterMode::LinearMipmapLinear, FilterMode::Linear)
            .and_then(|_| {
                device.allocate_storage(
                    texture,
                    self.options.storage_format,
                    self.mip_count,
                    self.extent,
                )
            });
        if let Err(err) = configured {
            if let Err(delete_err) = device.delete_texture(texture) {
                log::error!("Failed to delete texture {texture}: {delete_err}");
            }
            return Err(err);
        }
        Ok(texture)
    }

    /// Commit and upload the leading mips; `Ok(false)` when none qualify
    fn populate_sparse<D: SparseDevice + ?Sized>(
        &mut self,
        device: &mut D,
        desc: &TextureDescriptor,
        page: PageSize,
        stats: &mut CommitStats,
    ) -> RendererResult<bool> {
        let sparse_levels = device.sparse_level_count(self.texture)?;
        let committable = plan_commitment(desc.extent(), desc.mip_count(), page, sparse_levels);
        if committable == 0 {
            return Ok(false);
        }
        self.geometry = Some(PageGeometry::new(page, sparse_levels));

        for mip in 0..committable {
            let region = self.commit_region(mip, page);
            device.commit_region(self.texture, &region, true)?;
            let pages = page.pages_in(&region);
            let bytes = pages * page.bytes(self.options.storage_format);
            self.committed_pages += pages;
            self.committed_bytes += bytes;
            stats.record_commit(pages, bytes);
            self.committed_max_mip = mip;
        }

        for mip in 0..committable {
            self.upload_mip(device, desc, mip)?;
        }
        if desc.mip_count() < self.mip_count {
            device.generate_mipmaps(self.texture)?;
        }

        log::debug!(
            "{}: committed mips 0..={} ({} pages, {} sparse levels)",
            self.name,
            self.committed_max_mip,
            self.committed_pages,
            sparse_levels
        );
        Ok(true)
    }

    fn populate_full<D: SparseDevice + ?Sized>(
        &mut self,
        device: &mut D,
        desc: &TextureDescriptor,
        stats: &mut CommitStats,
    ) -> RendererResult<()> {
        let supplied = desc.mip_count().min(self.mip_count);
        for mip in 0..supplied {
            self.upload_mip(device, desc, mip)?;
        }
        if supplied < self.mip_count {
            device.generate_mipmaps(self.texture)?;
        }

        self.committed_base_mip = 0;
        self.committed_max_mip = self.mip_count - 1;
        self.committed_bytes = (0..self.mip_count)
            .map(|mip| {
                mip_byte_size(
                    self.options.level_extent(self.extent, mip),
                    self.options.storage_format,
                ) as u64
            })
            .sum();
        stats.record_commit(0, self.committed_bytes);
        Ok(())
    }

    fn upload_mip<D: SparseDevice + ?Sized>(
        &self,
        device: &mut D,
        desc: &TextureDescriptor,
        mip: u32,
    ) -> RendererResult<()> {
        let Some(level) = desc.mip(mip) else {
            return Ok(());
        };
        let region = PageRegion::at_origin(mip, level.extent);
        device.upload(self.texture, &region, desc.format(), &level.data)
    }

    /// Page-aligned region covering the image at `mip`
    fn commit_region(&self, mip: u32, page: PageSize) -> PageRegion {
        PageRegion::covering(
            mip,
            mip_extent(self.image_extent, mip),
            page.extent(),
            self.options.level_extent(self.extent, mip),
        )
    }

    /// Delete a texture that never became a usable slot
    fn abandon<D: SparseDevice + ?Sized>(&mut self, device: &mut D, stats: &mut CommitStats) {
        if self.committed_bytes > 0 {
            stats.record_decommit(self.committed_pages, self.committed_bytes);
        }
        if let Err(err) = device.delete_texture(self.texture) {
            log::error!("Failed to delete texture {}: {err}", self.texture);
        }
        self.geometry = None;
        self.committed_pages = 0;
        self.committed_bytes = 0;
        self.committed_max_mip = 0;
    }

    /// Obtain the bindless handle; the texture must have committed memory
    pub fn attach_handle<D: SparseDevice + ?Sized>(
        &mut self,
        device: &mut D,
    ) -> RendererResult<BindlessHandle> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }
        if self.committed_bytes == 0 {
            return Err(RendererError::HandleWithoutCommitment(self.texture));
        }
        let handle = device.create_handle(self.texture)?;
        self.handle = Some(handle);
        Ok(handle)
    }

    /// Make the handle resident or not; a no-op without a handle
    pub fn set_resident<D: SparseDevice + ?Sized>(
        &mut self,
        device: &mut D,
        resident: bool,
    ) -> RendererResult<()> {
        if self.resident == resident {
            return Ok(());
        }
        if let Some(handle) = self.handle {
            device.set_handle_resident(handle, resident)?;
        }
        self.resident = resident;
        Ok(())
    }

    /// Highest mip eviction may raise the base level past
    ///
    /// `None` for fully backed slots, which never take part in eviction.
    pub fn eviction_limit(&self) -> Option<u32> {
        self.geometry
            .map(|geometry| geometry.max_sparse_level.min(self.committed_max_mip))
    }

    /// Raise the base level past `mip` and decommit it
    ///
    /// Returns `false` without touching the device when `mip` is not the
    /// current base or is at the eviction limit.
    pub fn evict_mip<D: SparseDevice + ?Sized>(
        &mut self,
        device: &mut D,
        mip: u32,
        stats: &mut CommitStats,
    ) -> RendererResult<bool> {
        let Some(geometry) = self.geometry else {
            return Ok(false);
        };
        let Some(limit) = self.eviction_limit() else {
            return Ok(false);
        };
        if mip != self.committed_base_mip || mip >= limit {
            return Ok(false);
        }

        device.set_base_level(self.texture, mip + 1)?;
        self.committed_base_mip = mip + 1;
        device.memory_barrier();

        let region = self.commit_region(mip, geometry.page);
        device.commit_region(self.texture, &region, false)?;
        device.memory_barrier();

        let pages = geometry.page.pages_in(&region);
        let bytes = pages * geometry.page.bytes(self.options.storage_format);
        self.committed_pages = self.committed_pages.saturating_sub(pages);
        self.committed_bytes = self.committed_bytes.saturating_sub(bytes);
        stats.record_decommit(pages, bytes);

        log::debug!("{}: evicted mip {mip}, base level now {}", self.name, mip + 1);
        Ok(true)
    }

    /// Release residency and delete the texture
    pub fn destroy<D: SparseDevice + ?Sized>(
        mut self,
        device: &mut D,
        stats: &mut CommitStats,
    ) -> RendererResult<()> {
        if self.resident {
            device.memory_barrier();
            self.set_resident(device, false)?;
            device.memory_barrier();
        }
        stats.record_decommit(self.committed_pages, self.committed_bytes);
        device.delete_texture(self.texture)
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    /// Storage extent
    pub fn extent(&self) -> UVec3 {
        self.extent
    }

    /// Extent of the image inside the storage
    pub fn image_extent(&self) -> UVec3 {
        self.image_extent
    }

    /// Storage level count
    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// Whether the slot uses sparse storage
    pub fn is_sparse(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn geometry(&self) -> Option<PageGeometry> {
        self.geometry
    }

    pub fn committed_base_mip(&self) -> u32 {
        self.committed_base_mip
    }

    pub fn committed_max_mip(&self) -> u32 {
        self.committed_max_mip
    }

    pub fn committed_pages(&self) -> u64 {
        self.committed_pages
    }

    pub fn committed_bytes(&self) -> u64 {
        self.committed_bytes
    }

    pub fn handle(&self) -> Option<BindlessHandle> {
        self.handle
    }

    pub fn is_resident(&self) -> bool {
        self.resident
    }

    /// Fraction of the storage the image covers
    pub fn uv_scale(&self) -> Vec2 {
        self.image_extent.truncate().as_vec2() / self.extent.truncate().as_vec2()
    }
}
