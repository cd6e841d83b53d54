//! Texture Descriptors
//!
//! An immutable, validated mip pyramid. Mip 0 is full resolution; every
//! supplied level must have the extent `max(base >> mip, 1)` and exactly the
//! number of bytes that extent needs in the descriptor's format.

use glam::UVec3;
use sparsetex_core::{PixelFormat, eval_num_mips, mip_byte_size, mip_extent};

use crate::{AssetError, AssetResult};

/// One level of a mip pyramid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLevel {
    /// Extent of this level in texels
    pub extent: UVec3,
    /// Tightly packed texel data, rows bottom-up after a flip
    pub data: Vec<u8>,
}

/// In-memory image handed to the residency manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    name: String,
    format: PixelFormat,
    extent: UVec3,
    mips: Vec<MipLevel>,
}

impl TextureDescriptor {
    /// Build a descriptor, validating every supplied level
    pub fn new(
        name: impl Into<String>,
        format: PixelFormat,
        extent: UVec3,
        mips: Vec<MipLevel>,
    ) -> AssetResult<Self> {
        let name = name.into();
        if extent.min_element() == 0 {
            return Err(AssetError::InvalidData(format!("{name}: zero extent {extent}")));
        }
        if mips.is_empty() {
            return Err(AssetError::InvalidData(format!("{name}: no mip levels")));
        }
        let max_levels = eval_num_mips(extent);
        if mips.len() as u32 > max_levels {
            return Err(AssetError::InvalidData(format!(
                "{name}: {} levels supplied, extent {extent} allows {max_levels}",
                mips.len()
            )));
        }

        for (level, mip) in mips.iter().enumerate() {
            let expected = mip_extent(extent, level as u32);
            if mip.extent != expected {
                return Err(AssetError::InvalidData(format!(
                    "{name}: mip {level} has extent {}, expected {expected}",
                    mip.extent
                )));
            }
            let expected_bytes = mip_byte_size(expected, format);
            if mip.data.len() != expected_bytes {
                return Err(AssetError::InvalidData(format!(
                    "{name}: mip {level} has {} bytes, expected {expected_bytes}",
                    mip.data.len()
                )));
            }
        }

        Ok(Self {
            name,
            format,
            extent,
            mips,
        })
    }

    /// Descriptor holding only the base level
    pub fn from_base_level(
        name: impl Into<String>,
        format: PixelFormat,
        extent: UVec3,
        data: Vec<u8>,
    ) -> AssetResult<Self> {
        Self::new(name, format, extent, vec![MipLevel { extent, data }])
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Texel format of the pixel data
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Base extent
    pub fn extent(&self) -> UVec3 {
        self.extent
    }

    /// Number of supplied levels
    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }

    /// Number of levels in a full pyramid for this extent
    pub fn full_mip_count(&self) -> u32 {
        eval_num_mips(self.extent)
    }

    /// Whether every level of the full pyramid was supplied
    pub fn is_complete(&self) -> bool {
        self.mip_count() == self.full_mip_count()
    }

    /// Extent of level `mip`, supplied or not
    pub fn mip_extent(&self, mip: u32) -> UVec3 {
        mip_extent(self.extent, mip)
    }

    /// A supplied level
    pub fn mip(&self, mip: u32) -> Option<&MipLevel> {
        self.mips.get(mip as usize)
    }

    /// Texel data of a supplied level
    pub fn data(&self, mip: u32) -> Option<&[u8]> {
        self.mip(mip).map(|level| level.data.as_slice())
    }

    /// All supplied levels, finest first
    pub fn mips(&self) -> &[MipLevel] {
        &self.mips
    }

    /// Total bytes over every supplied level
    pub fn total_bytes(&self) -> usize {
        self.mips.iter().map(|mip| mip.data.len()).sum()
    }

    /// Same image with row order reversed in every level and depth slice
    pub fn flipped_vertically(mut self) -> Self {
        let texel = self.format.bytes_per_texel() as usize;
        for mip in &mut self.mips {
            let row = mip.extent.x as usize * texel;
            let rows = mip.extent.y as usize;
            for slice in mip.data.chunks_exact_mut(row * rows) {
                for y in 0..rows / 2 {
                    let (top, bottom) = slice.split_at_mut((rows - 1 - y) * row);
                    top[y * row..(y + 1) * row].swap_with_slice(&mut bottom[..row]);
                }
            }
        }
        self
    }
}
