//! Page Geometry
//!
//! Virtual page sizes are a property of the device, target and format, so
//! they are queried once per pair and cached. A slot's geometry adds the
//! number of sparse levels its storage reported.

use ahash::AHashMap;
use glam::UVec3;
use sparsetex_core::{PixelFormat, TextureTarget, covers_page, pages_covering};

use crate::device::{PageRegion, SparseDevice};

/// Size of one virtual page in texels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageSize(pub UVec3);

impl PageSize {
    /// Page extent
    pub fn extent(&self) -> UVec3 {
        self.0
    }

    /// Bytes backing one page in `format`
    pub fn bytes(&self, format: PixelFormat) -> u64 {
        self.0.as_u64vec3().element_product() * u64::from(format.bytes_per_texel())
    }

    /// Whether a level of `extent` is at least one page in each planar axis
    pub fn fits_in(&self, extent: UVec3) -> bool {
        covers_page(extent, self.0)
    }

    /// Number of pages a region spans
    pub fn pages_in(&self, region: &PageRegion) -> u64 {
        pages_covering(region.extent, self.0)
            .as_u64vec3()
            .element_product()
    }
}

/// Page size plus the sparse level count of one texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub page: PageSize,
    /// Highest mip index that can be committed page by page
    pub max_sparse_level: u32,
}

impl PageGeometry {
    /// Geometry for storage reporting `sparse_levels` sparse levels
    pub fn new(page: PageSize, sparse_levels: u32) -> Self {
        Self {
            page,
            max_sparse_level: sparse_levels.saturating_sub(1),
        }
    }
}

/// Per (target, format) page size cache
#[derive(Debug, Default)]
pub struct PageGeometryResolver {
    cache: AHashMap<(TextureTarget, PixelFormat), Option<PageSize>>,
}

impl PageGeometryResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Page size for a target and format, or `None` when the device reports
    /// no page sizes (or a degenerate one) for the pair
    pub fn resolve<D: SparseDevice + ?Sized>(
        &mut self,
        device: &D,
        target: TextureTarget,
        format: PixelFormat,
    ) -> Option<PageSize> {
        *self.cache.entry((target, format)).or_insert_with(|| {
            let sizes = device.virtual_page_sizes(target, format);
            let page = sizes
                .first()
                .copied()
                .filter(|size| size.min_element() > 0)
                .map(PageSize);
            match page {
                Some(page) => log::debug!(
                    "Page size for {format} on {target}: {} ({} candidates)",
                    page.extent(),
                    sizes.len()
                ),
                None => log::warn!("No sparse page size for {format} on {target}"),
            }
            page
        })
    }

    /// Number of cached pairs
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing has been resolved yet
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Number of leading levels that can be committed for an image
///
/// Walks mips from 0 and stops at the first level that is smaller than a
/// page, lies outside the sparse levels, or was not supplied.
pub fn plan_commitment(
    image_extent: UVec3,
    supplied_mips: u32,
    page: PageSize,
    sparse_levels: u32,
) -> u32 {
    (0..supplied_mips.min(sparse_levels))
        .take_while(|&mip| page.fits_in(sparsetex_core::mip_extent(image_extent, mip)))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::{SoftwareDevice, SoftwareDeviceConfig};

    const PAGE: PageSize = PageSize(UVec3::new(128, 128, 1));

    #[test]
    fn test_page_bytes() {
        assert_eq!(PAGE.bytes(PixelFormat::Rgba8Unorm), 64 * 1024);
        assert_eq!(PAGE.bytes(PixelFormat::R8Unorm), 16 * 1024);
    }

    #[test]
    fn test_geometry_from_levels() {
        assert_eq!(PageGeometry::new(PAGE, 4).max_sparse_level, 3);
        assert_eq!(PageGeometry::new(PAGE, 0).max_sparse_level, 0);
    }

    #[test]
    fn test_plan_stops_below_page() {
        // 512 -> 256 -> 128 -> 64: three levels cover a page
        let extent = UVec3::new(512, 512, 1);
        assert_eq!(plan_commitment(extent, 10, PAGE, 10), 3);
    }

    #[test]
    fn test_plan_bounded_by_sparse_levels() {
        let extent = UVec3::new(1024, 1024, 1);
        assert_eq!(plan_commitment(extent, 11, PAGE, 2), 2);
    }

    #[test]
    fn test_plan_bounded_by_supplied_mips() {
        let extent = UVec3::new(1024, 1024, 1);
        assert_eq!(plan_commitment(extent, 1, PAGE, 4), 1);
    }

    #[test]
    fn test_plan_small_image() {
        assert_eq!(plan_commitment(UVec3::new(64, 512, 1), 8, PAGE, 8), 0);
    }

    #[test]
    fn test_resolver_caches() {
        let device = SoftwareDevice::new(SoftwareDeviceConfig::default());
        let mut resolver = PageGeometryResolver::new();

        let first = resolver.resolve(&device, TextureTarget::Texture2D, PixelFormat::Rgba8Unorm);
        let second = resolver.resolve(&device, TextureTarget::Texture2D, PixelFormat::Rgba8Unorm);
        assert_eq!(first, Some(PAGE));
        assert_eq!(first, second);
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_resolver_empty_list() {
        let config = SoftwareDeviceConfig::default()
            .without_pages(TextureTarget::Texture2D, PixelFormat::Rgba16Float);
        let device = SoftwareDevice::new(config);
        let mut resolver = PageGeometryResolver::new();

        assert_eq!(
            resolver.resolve(&device, TextureTarget::Texture2D, PixelFormat::Rgba16Float),
            None
        );
        assert!(!resolver.is_empty());
    }
}
