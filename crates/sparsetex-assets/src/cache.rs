//! Image cache
//!
//! Images are decoded once per path and shared through `Arc`. The cache is
//! an ordinary value owned by whoever drives the frame loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::descriptor::TextureDescriptor;
use crate::source::ImageSource;
use crate::{AssetId, AssetResult};

/// Load-once image cache
pub struct ImageCache {
    entries: RwLock<AHashMap<AssetId, Arc<TextureDescriptor>>>,
    /// Flip rows of every image on load
    flip_rows: bool,
}

impl ImageCache {
    /// Create an empty cache
    pub fn new(flip_rows: bool) -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            flip_rows,
        }
    }

    /// Whether images are flipped on load
    pub fn flips_rows(&self) -> bool {
        self.flip_rows
    }

    /// Get a cached image
    pub fn get(&self, path: &Path) -> Option<Arc<TextureDescriptor>> {
        self.entries.read().get(&AssetId::from_path(path)).cloned()
    }

    /// Get a cached image or decode it with `source`
    pub fn get_or_load(
        &self,
        path: &Path,
        source: &dyn ImageSource,
    ) -> AssetResult<Arc<TextureDescriptor>> {
        let id = AssetId::from_path(path);
        if let Some(desc) = self.entries.read().get(&id) {
            return Ok(Arc::clone(desc));
        }

        let desc = Arc::new(self.decode(path, source)?);
        let mut entries = self.entries.write();
        let entry = entries.entry(id).or_insert(desc);
        Ok(Arc::clone(entry))
    }

    /// Decode every path in parallel, keeping input order in the result
    pub fn preload(
        &self,
        paths: &[PathBuf],
        source: &dyn ImageSource,
    ) -> Vec<AssetResult<Arc<TextureDescriptor>>> {
        paths
            .par_iter()
            .map(|path| self.get_or_load(path, source))
            .collect()
    }

    /// Number of cached images
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached image
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn decode(&self, path: &Path, source: &dyn ImageSource) -> AssetResult<TextureDescriptor> {
        let desc = source.load(path)?;
        log::info!(
            "Loaded {} ({} {}, {} mips)",
            path.display(),
            desc.extent(),
            desc.format(),
            desc.mip_count()
        );
        Ok(if self.flip_rows {
            desc.flipped_vertically()
        } else {
            desc
        })
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new(true)
    }
}
