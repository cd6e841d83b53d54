//! Software Device
//!
//! A CPU-side [`SparseDevice`] that tracks textures, page commitment and
//! handle residency without a GPU. It enforces the ordering rules real
//! drivers leave undefined: uploads into uncommitted pages, handles for
//! textures without memory, too many resident handles and deleting a
//! texture whose handle is still resident are all errors here.
//!
//! Texel data is not stored; each page only remembers whether it is
//! committed and whether it was written.

use ahash::{AHashMap, AHashSet};
use bit_vec::BitVec;
use glam::UVec3;
use smallvec::{SmallVec, smallvec};
use sparsetex_core::{
    PixelFormat, TextureTarget, eval_num_mips, mip_byte_size, mip_extent, pages_covering,
};

use crate::device::{
    BindlessHandle, DeviceCaps, DeviceOp, FilterMode, PageRegion, SparseDevice, TextureId,
};
use crate::{RendererError, RendererResult};

/// High word set on every handle so both words are exercised
const HANDLE_BASE: u64 = 0x0000_0100_0000_0000;

/// Software device settings
#[derive(Debug, Clone)]
pub struct SoftwareDeviceConfig {
    /// Advertised features
    pub caps: DeviceCaps,
    /// Virtual page sizes per target and format
    pub page_sizes: AHashMap<(TextureTarget, PixelFormat), SmallVec<[UVec3; 4]>>,
    /// Driver limit on simultaneously resident handles
    pub max_resident_handles: usize,
    /// Texture objects that may exist at once
    pub max_textures: usize,
}

impl Default for SoftwareDeviceConfig {
    fn default() -> Self {
        let mut page_sizes = AHashMap::new();
        for target in [TextureTarget::Texture2D, TextureTarget::Texture2DArray] {
            for format in PixelFormat::ALL {
                let page = match format {
                    PixelFormat::Rgba8Unorm | PixelFormat::Rgba8Srgb | PixelFormat::Bgra8Unorm => {
                        UVec3::new(128, 128, 1)
                    }
                    PixelFormat::R8Unorm => UVec3::new(256, 256, 1),
                    PixelFormat::Rg8Unorm => UVec3::new(256, 128, 1),
                    PixelFormat::Rgba16Float => UVec3::new(128, 64, 1),
                };
                page_sizes.insert((target, format), smallvec![page]);
            }
        }

        Self {
            caps: DeviceCaps::all(),
            page_sizes,
            max_resident_handles: 16,
            max_textures: 1024,
        }
    }
}

impl SoftwareDeviceConfig {
    /// Report no page sizes for a pair
    pub fn without_pages(mut self, target: TextureTarget, format: PixelFormat) -> Self {
        self.page_sizes.insert((target, format), SmallVec::new());
        self
    }

    /// Report a single page size for a pair
    pub fn with_page_size(mut self, target: TextureTarget, format: PixelFormat, page: UVec3) -> Self {
        self.page_sizes.insert((target, format), smallvec![page]);
        self
    }
}

#[derive(Debug)]
struct SoftLevel {
    extent: UVec3,
    grid: UVec3,
    committed: BitVec,
    written: BitVec,
}

impl SoftLevel {
    fn new(extent: UVec3, page: UVec3, committed: bool) -> Self {
        let grid = pages_covering(extent, page);
        let count = grid.element_product() as usize;
        Self {
            extent,
            grid,
            committed: BitVec::from_elem(count, committed),
            written: BitVec::from_elem(count, false),
        }
    }

    /// Linear page indices overlapped by a region
    fn pages(&self, region: &PageRegion, page: UVec3) -> Vec<usize> {
        let first = region.offset / page;
        let last = (region.offset + region.extent - UVec3::ONE) / page;
        let mut indices = Vec::new();
        for z in first.z..=last.z.min(self.grid.z - 1) {
            for y in first.y..=last.y.min(self.grid.y - 1) {
                for x in first.x..=last.x.min(self.grid.x - 1) {
                    indices.push((x + y * self.grid.x + z * self.grid.x * self.grid.y) as usize);
                }
            }
        }
        indices
    }

    fn contains(&self, region: &PageRegion) -> bool {
        let end = region.offset + region.extent;
        region.extent.min_element() > 0 && end.cmple(self.extent).all()
    }

    fn committed_pages(&self) -> usize {
        self.committed.iter().filter(|bit| *bit).count()
    }
}

#[derive(Debug)]
struct SoftStorage {
    format: PixelFormat,
    page: UVec3,
    sparse_levels: u32,
    levels: Vec<SoftLevel>,
}

#[derive(Debug)]
struct SoftTexture {
    target: TextureTarget,
    sparse: bool,
    filters: (FilterMode, FilterMode),
    base_level: u32,
    storage: Option<SoftStorage>,
    handle: Option<BindlessHandle>,
}

impl SoftTexture {
    fn storage(&self, id: TextureId) -> RendererResult<&SoftStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| RendererError::ResourceCreation(format!("texture {id} has no storage")))
    }

    fn storage_mut(&mut self, id: TextureId) -> RendererResult<&mut SoftStorage> {
        self.storage
            .as_mut()
            .ok_or_else(|| RendererError::ResourceCreation(format!("texture {id} has no storage")))
    }

    fn committed_bytes(&self) -> u64 {
        let Some(storage) = &self.storage else {
            return 0;
        };
        if self.sparse {
            let page_bytes = storage.page.as_u64vec3().element_product()
                * u64::from(storage.format.bytes_per_texel());
            storage
                .levels
                .iter()
                .map(|level| level.committed_pages() as u64 * page_bytes)
                .sum()
        } else {
            storage
                .levels
                .iter()
                .map(|level| mip_byte_size(level.extent, storage.format) as u64)
                .sum()
        }
    }
}

/// CPU emulation of a sparse, bindless capable device
#[derive(Debug)]
pub struct SoftwareDevice {
    config: SoftwareDeviceConfig,
    textures: AHashMap<TextureId, SoftTexture>,
    handles: AHashMap<BindlessHandle, TextureId>,
    resident: AHashSet<BindlessHandle>,
    next_id: u32,
    ops: Vec<DeviceOp>,
}

impl SoftwareDevice {
    /// Create a device
    pub fn new(config: SoftwareDeviceConfig) -> Self {
        Self {
            config,
            textures: AHashMap::new(),
            handles: AHashMap::new(),
            resident: AHashSet::new(),
            next_id: 1,
            ops: Vec::new(),
        }
    }

    fn texture(&self, id: TextureId) -> RendererResult<&SoftTexture> {
        self.textures.get(&id).ok_or(RendererError::UnknownTexture(id))
    }

    fn texture_mut(&mut self, id: TextureId) -> RendererResult<&mut SoftTexture> {
        self.textures.get_mut(&id).ok_or(RendererError::UnknownTexture(id))
    }

    /// Check that drawing through `handle` only reads committed memory
    pub fn validate_sampling(&self, handle: BindlessHandle) -> RendererResult<()> {
        let id = *self.handles.get(&handle).ok_or(RendererError::UnknownHandle(handle))?;
        if !self.resident.contains(&handle) {
            return Err(RendererError::ResidencyMismatch(handle));
        }
        let texture = self.texture(id)?;
        if !texture.sparse {
            return Ok(());
        }
        let storage = texture.storage(id)?;
        let level = storage
            .levels
            .get(texture.base_level as usize)
            .ok_or(RendererError::InvalidMip {
                texture: id,
                mip: texture.base_level,
            })?;
        let stale = level
            .written
            .iter()
            .zip(level.committed.iter())
            .any(|(written, committed)| written && !committed);
        if stale || level.committed_pages() == 0 {
            return Err(RendererError::DecommittedSample(id));
        }
        Ok(())
    }

    /// Recorded calls since creation or the last clear
    pub fn ops(&self) -> &[DeviceOp] {
        &self.ops
    }

    /// Forget recorded calls
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Live texture objects
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Handles currently resident
    pub fn resident_handle_count(&self) -> usize {
        self.resident.len()
    }

    /// Bytes of memory backing every live texture
    pub fn committed_bytes(&self) -> u64 {
        self.textures.values().map(SoftTexture::committed_bytes).sum()
    }

    /// Base level of a texture
    pub fn base_level(&self, texture: TextureId) -> Option<u32> {
        self.textures.get(&texture).map(|texture| texture.base_level)
    }

    /// Committed pages of one mip
    pub fn committed_pages(&self, texture: TextureId, mip: u32) -> usize {
        self.textures
            .get(&texture)
            .and_then(|texture| texture.storage.as_ref())
            .and_then(|storage| storage.levels.get(mip as usize))
            .map_or(0, SoftLevel::committed_pages)
    }

    /// Filters set on a texture
    pub fn filtering(&self, texture: TextureId) -> Option<(FilterMode, FilterMode)> {
        self.textures.get(&texture).map(|texture| texture.filters)
    }
}

impl SparseDevice for SoftwareDevice {
    fn capabilities(&self) -> DeviceCaps {
        self.config.caps
    }

    fn virtual_page_sizes(
        &self,
        target: TextureTarget,
        format: PixelFormat,
    ) -> SmallVec<[UVec3; 4]> {
        if !self.config.caps.contains(DeviceCaps::SPARSE_TEXTURE) {
            return SmallVec::new();
        }
        self.config
            .page_sizes
            .get(&(target, format))
            .cloned()
            .unwrap_or_default()
    }

    fn create_texture(&mut self, target: TextureTarget, sparse: bool) -> RendererResult<TextureId> {
        if self.textures.len() >= self.config.max_textures {
            return Err(RendererError::ResourceCreation(format!(
                "texture limit of {} reached",
                self.config.max_textures
            )));
        }
        if sparse && !self.config.caps.contains(DeviceCaps::SPARSE_TEXTURE) {
            return Err(RendererError::ResourceCreation(
                "sparse textures are not supported".into(),
            ));
        }

        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(
            id,
            SoftTexture {
                target,
                sparse,
                filters: (FilterMode::Nearest, FilterMode::Linear),
                base_level: 0,
                storage: None,
                handle: None,
            },
        );
        self.ops.push(DeviceOp::CreateTexture(id));
        Ok(id)
    }

    fn set_filtering(
        &mut self,
        texture: TextureId,
        min: FilterMode,
        mag: FilterMode,
    ) -> RendererResult<()> {
        if mag == FilterMode::LinearMipmapLinear {
            return Err(RendererError::ResourceCreation(
                "mipmap filtering is not valid for magnification".into(),
            ));
        }
        self.texture_mut(texture)?.filters = (min, mag);
        self.ops.push(DeviceOp::SetFiltering(texture));
        Ok(())
    }

    fn allocate_storage(
        &mut self,
        texture: TextureId,
        format: PixelFormat,
        levels: u32,
        extent: UVec3,
    ) -> RendererResult<()> {
        let target = self.texture(texture)?.target;
        let page_sizes = self.virtual_page_sizes(target, format);
        let soft = self.texture_mut(texture)?;
        if soft.storage.is_some() {
            return Err(RendererError::ResourceCreation(format!(
                "texture {texture} storage is immutable"
            )));
        }
        let planar = UVec3::new(extent.x, extent.y, 1);
        if extent.min_element() == 0 || levels == 0 || levels > eval_num_mips(planar) {
            return Err(RendererError::ResourceCreation(format!(
                "invalid storage: {levels} levels of {extent}"
            )));
        }
        let layered = target == TextureTarget::Texture2DArray;
        let level_extent = |mip: u32| {
            let level = mip_extent(planar, mip);
            UVec3::new(level.x, level.y, if layered { extent.z } else { 1 })
        };

        let storage = if soft.sparse {
            let page = page_sizes.first().copied().ok_or_else(|| {
                RendererError::ResourceCreation(format!("{format} has no sparse page size"))
            })?;
            let sparse_levels = (0..levels)
                .map(|mip| level_extent(mip))
                .take_while(|level| {
                    level.x >= page.x
                        && level.y >= page.y
                        && level.x % page.x == 0
                        && level.y % page.y == 0
                })
                .count() as u32;
            SoftStorage {
                format,
                page,
                sparse_levels,
                levels: (0..levels)
                    .map(|mip| SoftLevel::new(level_extent(mip), page, false))
                    .collect(),
            }
        } else {
            let page = level_extent(0);
            SoftStorage {
                format,
                page,
                sparse_levels: 0,
                levels: (0..levels)
                    .map(|mip| SoftLevel::new(level_extent(mip), page, true))
                    .collect(),
            }
        };

        soft.storage = Some(storage);
        self.ops.push(DeviceOp::AllocateStorage(texture));
        Ok(())
    }

    fn sparse_level_count(&self, texture: TextureId) -> RendererResult<u32> {
        let soft = self.texture(texture)?;
        if !soft.sparse {
            return Err(RendererError::NotSparse(texture));
        }
        Ok(soft.storage(texture)?.sparse_levels)
    }

    fn commit_region(
        &mut self,
        texture: TextureId,
        region: &PageRegion,
        commit: bool,
    ) -> RendererResult<()> {
        let soft = self.texture_mut(texture)?;
        if !soft.sparse {
            return Err(RendererError::NotSparse(texture));
        }
        let storage = soft.storage_mut(texture)?;
        let page = storage.page;
        let level = storage
            .levels
            .get_mut(region.mip as usize)
            .ok_or(RendererError::InvalidMip {
                texture,
                mip: region.mip,
            })?;
        if !level.contains(region) {
            return Err(RendererError::InvalidMip {
                texture,
                mip: region.mip,
            });
        }

        let end = region.offset + region.extent;
        let aligned = |axis: usize| {
            region.offset[axis] % page[axis] == 0
                && (region.extent[axis] % page[axis] == 0 || end[axis] == level.extent[axis])
        };
        if !(aligned(0) && aligned(1)) {
            return Err(RendererError::UnalignedRegion {
                texture,
                mip: region.mip,
            });
        }

        for index in level.pages(region, page) {
            level.committed.set(index, commit);
            if !commit {
                level.written.set(index, false);
            }
        }

        self.ops.push(if commit {
            DeviceOp::Commit {
                texture,
                mip: region.mip,
            }
        } else {
            DeviceOp::Decommit {
                texture,
                mip: region.mip,
            }
        });
        Ok(())
    }

    fn upload(
        &mut self,
        texture: TextureId,
        region: &PageRegion,
        format: PixelFormat,
        data: &[u8],
    ) -> RendererResult<()> {
        let soft = self.texture_mut(texture)?;
        let storage = soft.storage_mut(texture)?;
        if !format.uploads_into(storage.format) {
            return Err(RendererError::InvalidDescriptor(format!(
                "{format} data uploaded into {} storage",
                storage.format
            )));
        }
        let expected = region.texel_count() * u64::from(format.bytes_per_texel());
        if data.len() as u64 != expected {
            return Err(RendererError::InvalidDescriptor(format!(
                "upload of {} bytes into a region needing {expected}",
                data.len()
            )));
        }

        let page = storage.page;
        let level = storage
            .levels
            .get_mut(region.mip as usize)
            .ok_or(RendererError::InvalidMip {
                texture,
                mip: region.mip,
            })?;
        if !level.contains(region) {
            return Err(RendererError::InvalidMip {
                texture,
                mip: region.mip,
            });
        }

        let pages = level.pages(region, page);
        if pages.iter().any(|&index| !level.committed[index]) {
            return Err(RendererError::UncommittedUpload {
                texture,
                mip: region.mip,
            });
        }
        for index in pages {
            level.written.set(index, true);
        }

        self.ops.push(DeviceOp::Upload {
            texture,
            mip: region.mip,
        });
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureId) -> RendererResult<()> {
        let soft = self.texture_mut(texture)?;
        let base = soft.base_level as usize;
        let storage = soft.storage_mut(texture)?;
        for level in storage.levels.iter_mut().skip(base + 1) {
            let committed = level.committed.clone();
            level.written.or(&committed);
        }
        self.ops.push(DeviceOp::GenerateMipmaps(texture));
        Ok(())
    }

    fn set_base_level(&mut self, texture: TextureId, level: u32) -> RendererResult<()> {
        let soft = self.texture_mut(texture)?;
        let levels = soft.storage(texture)?.levels.len() as u32;
        if level >= levels {
            return Err(RendererError::InvalidMip {
                texture,
                mip: level,
            });
        }
        soft.base_level = level;
        self.ops.push(DeviceOp::SetBaseLevel { texture, level });
        Ok(())
    }

    fn create_handle(&mut self, texture: TextureId) -> RendererResult<BindlessHandle> {
        if !self.config.caps.contains(DeviceCaps::BINDLESS_TEXTURE) {
            return Err(RendererError::ResourceCreation(
                "bindless textures are not supported".into(),
            ));
        }
        let soft = self.texture_mut(texture)?;
        if let Some(handle) = soft.handle {
            return Ok(handle);
        }
        let base = soft.base_level as usize;
        let storage = soft.storage(texture)?;
        let backed = storage
            .levels
            .get(base)
            .is_some_and(|level| level.committed_pages() > 0);
        if !backed {
            return Err(RendererError::HandleWithoutCommitment(texture));
        }

        let handle = BindlessHandle(HANDLE_BASE | u64::from(texture.0));
        soft.handle = Some(handle);
        self.handles.insert(handle, texture);
        self.ops.push(DeviceOp::CreateHandle(texture));
        Ok(handle)
    }

    fn set_handle_resident(
        &mut self,
        handle: BindlessHandle,
        resident: bool,
    ) -> RendererResult<()> {
        if !self.handles.contains_key(&handle) {
            return Err(RendererError::UnknownHandle(handle));
        }
        if self.resident.contains(&handle) == resident {
            return Err(RendererError::ResidencyMismatch(handle));
        }

        if resident {
            if self.resident.len() >= self.config.max_resident_handles {
                return Err(RendererError::ResidentHandleLimit(
                    self.config.max_resident_handles,
                ));
            }
            self.resident.insert(handle);
            self.ops.push(DeviceOp::MakeResident(handle));
        } else {
            self.resident.remove(&handle);
            self.ops.push(DeviceOp::MakeNonResident(handle));
        }
        Ok(())
    }

    fn memory_barrier(&mut self) {
        self.ops.push(DeviceOp::Barrier);
    }

    fn delete_texture(&mut self, texture: TextureId) -> RendererResult<()> {
        let handle = self.texture(texture)?.handle;
        if let Some(handle) = handle {
            if self.resident.contains(&handle) {
                return Err(RendererError::DeleteWhileResident(texture));
            }
            self.handles.remove(&handle);
        }
        self.textures.remove(&texture);
        self.ops.push(DeviceOp::DeleteTexture(texture));
        Ok(())
    }
}
