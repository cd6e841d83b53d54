//! # Sparsetex Core
//!
//! Foundation types shared by every sparsetex crate:
//! - **Formats**: pixel formats and texture targets
//! - **Math**: mip pyramid and page arithmetic over `glam` extents
//! - **Config**: serializable residency configuration
//! - **Memory**: committed page accounting and budget warnings
//! - **Time**: frame clock driving the eviction cadence

pub mod config;
pub mod math;
pub mod memory;
pub mod time;

pub use config::{
    ConfigError, ConfigResult, ReclaimPolicy, ResidencyConfig, StorageLayout,
    UnsupportedFormatPolicy,
};
pub use math::{UVec3, covers_page, eval_num_mips, mip_byte_size, mip_extent, pages_covering};
pub use memory::{BudgetStatus, CommitBudget, CommitStats};
pub use time::{FrameClock, RollingTimer, ScopedTimer};

use serde::{Deserialize, Serialize};

/// Texel formats understood by the image sources and the GPU device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 4x8-bit RGBA, linear
    #[default]
    Rgba8Unorm,
    /// 4x8-bit RGBA, sRGB encoded
    Rgba8Srgb,
    /// 4x8-bit BGRA, linear
    Bgra8Unorm,
    /// Single 8-bit channel
    R8Unorm,
    /// Two 8-bit channels
    Rg8Unorm,
    /// 4x16-bit float RGBA
    Rgba16Float,
}

impl PixelFormat {
    /// All formats, in declaration order
    pub const ALL: [PixelFormat; 6] = [
        PixelFormat::Rgba8Unorm,
        PixelFormat::Rgba8Srgb,
        PixelFormat::Bgra8Unorm,
        PixelFormat::R8Unorm,
        PixelFormat::Rg8Unorm,
        PixelFormat::Rgba16Float,
    ];

    /// Size of one texel in bytes
    pub fn bytes_per_texel(&self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8Srgb | Self::Bgra8Unorm => 4,
            Self::R8Unorm => 1,
            Self::Rg8Unorm => 2,
            Self::Rgba16Float => 8,
        }
    }

    /// Number of color channels
    pub fn channels(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm => 2,
            _ => 4,
        }
    }

    /// Whether pixel data in `self` can be uploaded into storage of `storage`
    ///
    /// Channel order may differ (the device swizzles BGRA on upload) but the
    /// texel size must match.
    pub fn uploads_into(&self, storage: PixelFormat) -> bool {
        self.bytes_per_texel() == storage.bytes_per_texel() && self.channels() == storage.channels()
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Rgba8Unorm => "rgba8",
            Self::Rgba8Srgb => "rgba8-srgb",
            Self::Bgra8Unorm => "bgra8",
            Self::R8Unorm => "r8",
            Self::Rg8Unorm => "rg8",
            Self::Rgba16Float => "rgba16f",
        };
        f.write_str(name)
    }
}

/// Texture object targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextureTarget {
    /// Plain 2D texture, one image per mip
    #[default]
    Texture2D,
    /// Layered 2D texture; the image occupies layer 0
    Texture2DArray,
}

impl std::fmt::Display for TextureTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Texture2D => f.write_str("2d"),
            Self::Texture2DArray => f.write_str("2d-array"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_texel() {
        assert_eq!(PixelFormat::Rgba8Unorm.bytes_per_texel(), 4);
        assert_eq!(PixelFormat::R8Unorm.bytes_per_texel(), 1);
        assert_eq!(PixelFormat::Rgba16Float.bytes_per_texel(), 8);
    }

    #[test]
    fn test_upload_compatibility() {
        assert!(PixelFormat::Bgra8Unorm.uploads_into(PixelFormat::Rgba8Unorm));
        assert!(PixelFormat::Rgba8Srgb.uploads_into(PixelFormat::Rgba8Unorm));
        assert!(!PixelFormat::R8Unorm.uploads_into(PixelFormat::Rgba8Unorm));
        assert!(!PixelFormat::Rgba16Float.uploads_into(PixelFormat::Rgba8Unorm));
    }

    #[test]
    fn test_default_format() {
        assert_eq!(PixelFormat::default(), PixelFormat::Rgba8Unorm);
        assert_eq!(TextureTarget::default(), TextureTarget::Texture2D);
    }
}
