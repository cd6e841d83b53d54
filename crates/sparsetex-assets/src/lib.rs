//! # Sparsetex Assets
//!
//! Image sources feeding the residency manager.
//!
//! ## Features
//! - `TextureDescriptor`: validated in-memory mip pyramid
//! - DDS loading (uncompressed RGBA8/BGRA8) and raster loading with
//!   generated mip chains
//! - Procedural checkerboards for headless runs
//! - `ImageCache`: load-once cache with parallel preload

pub mod cache;
pub mod descriptor;
pub mod procedural;
pub mod source;

pub use cache::ImageCache;
pub use descriptor::{MipLevel, TextureDescriptor};
pub use procedural::Checkerboard;
pub use source::{DdsImageSource, FileImageSource, ImageSource, RasterImageSource};

use std::path::Path;

use thiserror::Error;

/// Asset errors
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Import failed: {0}")]
    ImportFailed(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid image data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type for asset operations
pub type AssetResult<T> = Result<T, AssetError>;

/// Cache key for a loaded image, derived from its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetId(pub u64);

impl AssetId {
    /// Fixed seeds so ids are stable across runs
    const SEEDS: [u64; 4] = [
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    ];

    pub fn from_path(path: &Path) -> Self {
        let [k0, k1, k2, k3] = Self::SEEDS;
        Self(ahash::RandomState::with_seeds(k0, k1, k2, k3).hash_one(path))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Image container families, by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// DirectDraw Surface, mips stored in the file
    Dds,
    /// Single-level raster images; mips are generated
    Raster,
}

impl ImageKind {
    /// Get file extensions for this image kind
    pub fn extensions(&self) -> &[&str] {
        match self {
            Self::Dds => &["dds"],
            Self::Raster => &["png", "jpg", "jpeg", "tga", "bmp"],
        }
    }

    /// Classify a path by its extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        [Self::Dds, Self::Raster]
            .into_iter()
            .find(|kind| kind.extensions().contains(&ext.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_id_from_path() {
        let a = AssetId::from_path(Path::new("textures/a.dds"));
        let b = AssetId::from_path(Path::new("textures/b.dds"));
        assert_ne!(a, b);
        assert_eq!(a, AssetId::from_path(Path::new("textures/a.dds")));
        assert_eq!(a.to_string().len(), 16);
    }

    #[test]
    fn test_image_kind() {
        assert_eq!(ImageKind::from_path(Path::new("test.dds")), Some(ImageKind::Dds));
        assert_eq!(ImageKind::from_path(Path::new("photo.PNG")), Some(ImageKind::Raster));
        assert_eq!(ImageKind::from_path(Path::new("model.gltf")), None);
        assert_eq!(ImageKind::from_path(Path::new("no_extension")), None);
    }
}
