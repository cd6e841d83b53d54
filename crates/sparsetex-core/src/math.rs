//! Mip and page math
//!
//! Extents are `glam::UVec3` (width, height, depth) in texels.

pub use glam::{UVec2, UVec3, UVec4, Vec2, Vec4};

use crate::PixelFormat;

/// Number of mip levels in a full pyramid for `size`
///
/// One level for the base image plus one per halving of the largest
/// dimension, so a 4096x4096 texture has 13 levels.
pub fn eval_num_mips(size: UVec3) -> u32 {
    let largest = size.max_element().max(1);
    u32::BITS - largest.leading_zeros()
}

/// Extent of mip `mip` of a texture with base extent `size`
///
/// Every dimension halves per level and is clamped to 1.
pub fn mip_extent(size: UVec3, mip: u32) -> UVec3 {
    let shrink = |v: u32| v.checked_shr(mip).unwrap_or(0).max(1);
    UVec3::new(shrink(size.x), shrink(size.y), shrink(size.z))
}

/// Byte size of a tightly packed image of `extent` in `format`
pub fn mip_byte_size(extent: UVec3, format: PixelFormat) -> usize {
    extent.x as usize * extent.y as usize * extent.z as usize * format.bytes_per_texel() as usize
}

/// Number of pages along each axis needed to cover `extent`
pub fn pages_covering(extent: UVec3, page: UVec3) -> UVec3 {
    let page = page.max(UVec3::ONE);
    UVec3::new(
        extent.x.div_ceil(page.x),
        extent.y.div_ceil(page.y),
        extent.z.div_ceil(page.z),
    )
}

/// Whether `extent` is at least one full page wide and tall
///
/// Mips smaller than a page in X or Y cannot be partially committed.
pub fn covers_page(extent: UVec3, page: UVec3) -> bool {
    extent.x >= page.x && extent.y >= page.y
}
