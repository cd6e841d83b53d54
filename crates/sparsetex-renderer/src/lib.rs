//! # Sparsetex Renderer
//!
//! GPU-side texture residency built on sparse (partially resident)
//! textures and bindless handles.
//!
//! ## Features
//! - Page-granular commitment of the mip levels that cover a page
//! - Fallback to fully backed storage for formats without sparse support
//! - Bindless handles with exactly one resident handle at a time
//! - Round-robin selection of the slot drawn each frame
//! - Time-gated eviction: finest mips first, then whole slots
//! - A software device that validates the GPU contract in tests

pub mod device;
pub mod eviction;
pub mod manager;
pub mod material;
pub mod page;
pub mod residency;
pub mod slot;
pub mod software;

pub use device::{
    BindlessHandle, DeviceCaps, DeviceOp, FilterMode, PageRegion, SparseDevice, TextureId,
};
pub use eviction::{EvictionController, EvictionPhase, EvictionStep};
pub use manager::{ActiveSlot, FrameReport, ResidencyManager, ResidencyReport};
pub use material::MaterialBlock;
pub use page::{PageGeometry, PageGeometryResolver, PageSize};
pub use residency::{Admission, ResidencyTable, SlotId};
pub use slot::{SlotOptions, SparseTextureSlot};
pub use software::{SoftwareDevice, SoftwareDeviceConfig};

use sparsetex_core::{ConfigError, PixelFormat, TextureTarget};
use thiserror::Error;

/// Renderer errors
#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Texture creation failed: {0}")]
    ResourceCreation(String),

    #[error("No sparse page size for {format} on {target} targets")]
    UnsupportedFormat {
        target: TextureTarget,
        format: PixelFormat,
    },

    #[error("Invalid texture descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Unknown texture {0}")]
    UnknownTexture(TextureId),

    #[error("Unknown bindless handle {0}")]
    UnknownHandle(BindlessHandle),

    #[error("Texture {texture} has no mip {mip}")]
    InvalidMip { texture: TextureId, mip: u32 },

    #[error("Texture {0} does not use sparse storage")]
    NotSparse(TextureId),

    #[error("Region of texture {texture} mip {mip} is not page aligned")]
    UnalignedRegion { texture: TextureId, mip: u32 },

    #[error("Upload into uncommitted pages of texture {texture} mip {mip}")]
    UncommittedUpload { texture: TextureId, mip: u32 },

    #[error("Texture {0} has no committed pages to sample through a handle")]
    HandleWithoutCommitment(TextureId),

    #[error("Resident handle limit of {0} reached")]
    ResidentHandleLimit(usize),

    #[error("Handle {0} residency toggled to its current state")]
    ResidencyMismatch(BindlessHandle),

    #[error("Texture {0} deleted while its handle is resident")]
    DeleteWhileResident(TextureId),

    #[error("Texture {0} sampled through decommitted pages")]
    DecommittedSample(TextureId),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for renderer operations
pub type RendererResult<T> = Result<T, RendererError>;
