//! GPU Device Contract
//!
//! The narrow set of GPU calls the residency code depends on. Backends
//! implement [`SparseDevice`]; the residency table, eviction controller and
//! manager only ever talk to this trait.
//!
//! Ordering rules every caller follows:
//! - pages are committed before pixel data is uploaded into them
//! - a handle is created only once its texture has committed memory
//! - a memory barrier separates draws from base-level changes,
//!   decommitment and handle residency toggles

use std::fmt;

use bitflags::bitflags;
use glam::{UVec2, UVec3};
use smallvec::SmallVec;
use sparsetex_core::{PixelFormat, TextureTarget};

use crate::RendererResult;

/// Opaque texture object name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 64-bit bindless texture handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindlessHandle(pub u64);

impl BindlessHandle {
    /// Low and high 32-bit words, the layout shaders rebuild the handle from
    pub fn split(&self) -> UVec2 {
        UVec2::new(self.0 as u32, (self.0 >> 32) as u32)
    }

    /// Rebuild a handle from its two words
    pub fn from_words(words: UVec2) -> Self {
        Self(u64::from(words.x) | (u64::from(words.y) << 32))
    }
}

impl fmt::Display for BindlessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

bitflags! {
    /// Optional features a device exposes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceCaps: u32 {
        /// Page-granular commitment of texture memory
        const SPARSE_TEXTURE = 1 << 0;
        /// Handle-based texture access from shaders
        const BINDLESS_TEXTURE = 1 << 1;
    }
}

/// Texture filtering modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Nearest,
    Linear,
    /// Trilinear; only valid for minification
    #[default]
    LinearMipmapLinear,
}

/// Box of texels within one mip level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRegion {
    /// Mip level
    pub mip: u32,
    /// Texel offset; `z` is the first layer for array targets
    pub offset: UVec3,
    /// Texel extent; `z` is the layer count for array targets
    pub extent: UVec3,
}

impl PageRegion {
    /// Region starting at the origin of `mip`
    pub fn at_origin(mip: u32, extent: UVec3) -> Self {
        Self {
            mip,
            offset: UVec3::ZERO,
            extent,
        }
    }

    /// Smallest page-aligned region holding `extent`, clamped to the level
    pub fn covering(mip: u32, extent: UVec3, page: UVec3, level_extent: UVec3) -> Self {
        let aligned = ((extent + page - UVec3::ONE) / page) * page;
        Self::at_origin(mip, aligned.min(level_extent))
    }

    /// Number of texels in the region
    pub fn texel_count(&self) -> u64 {
        self.extent.as_u64vec3().element_product()
    }
}

/// One recorded device call, used to check ordering in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOp {
    CreateTexture(TextureId),
    AllocateStorage(TextureId),
    SetFiltering(TextureId),
    Commit { texture: TextureId, mip: u32 },
    Decommit { texture: TextureId, mip: u32 },
    Upload { texture: TextureId, mip: u32 },
    GenerateMipmaps(TextureId),
    SetBaseLevel { texture: TextureId, level: u32 },
    CreateHandle(TextureId),
    MakeResident(BindlessHandle),
    MakeNonResident(BindlessHandle),
    Barrier,
    DeleteTexture(TextureId),
}

/// GPU calls needed for sparse residency management
pub trait SparseDevice {
    /// Optional features this device supports
    fn capabilities(&self) -> DeviceCaps;

    /// Virtual page sizes for a target and format; empty when the format
    /// cannot be sparse. The first entry is the one used for commitment.
    fn virtual_page_sizes(
        &self,
        target: TextureTarget,
        format: PixelFormat,
    ) -> SmallVec<[UVec3; 4]>;

    /// Create a texture object; `sparse` must be decided before storage
    fn create_texture(&mut self, target: TextureTarget, sparse: bool) -> RendererResult<TextureId>;

    /// Set minification and magnification filters
    fn set_filtering(
        &mut self,
        texture: TextureId,
        min: FilterMode,
        mag: FilterMode,
    ) -> RendererResult<()>;

    /// Allocate immutable storage of `levels` mips
    fn allocate_storage(
        &mut self,
        texture: TextureId,
        format: PixelFormat,
        levels: u32,
        extent: UVec3,
    ) -> RendererResult<()>;

    /// Number of leading mip levels that can be committed page by page
    fn sparse_level_count(&self, texture: TextureId) -> RendererResult<u32>;

    /// Commit (`commit == true`) or decommit the pages of a region
    fn commit_region(
        &mut self,
        texture: TextureId,
        region: &PageRegion,
        commit: bool,
    ) -> RendererResult<()>;

    /// Upload tightly packed texels into a region
    fn upload(
        &mut self,
        texture: TextureId,
        region: &PageRegion,
        format: PixelFormat,
        data: &[u8],
    ) -> RendererResult<()>;

    /// Fill levels below the base from the base level
    fn generate_mipmaps(&mut self, texture: TextureId) -> RendererResult<()>;

    /// Set the finest level the sampler may read
    fn set_base_level(&mut self, texture: TextureId, level: u32) -> RendererResult<()>;

    /// Get the bindless handle of a texture
    fn create_handle(&mut self, texture: TextureId) -> RendererResult<BindlessHandle>;

    /// Make a handle resident or non-resident
    fn set_handle_resident(&mut self, handle: BindlessHandle, resident: bool)
    -> RendererResult<()>;

    /// Order all prior GPU work against subsequent state changes
    fn memory_barrier(&mut self);

    /// Destroy a texture and release its memory
    fn delete_texture(&mut self, texture: TextureId) -> RendererResult<()>;
}
