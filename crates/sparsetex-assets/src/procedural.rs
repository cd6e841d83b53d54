//! Procedural checkerboards
//!
//! Headless runs and tests need images without touching the filesystem.
//! Each level is generated directly (cell size halves with the level) and
//! can be tinted per level so the sampled mip is obvious on screen.

use glam::UVec3;
use sparsetex_core::{PixelFormat, eval_num_mips, mip_extent};

use crate::descriptor::{MipLevel, TextureDescriptor};
use crate::AssetResult;

/// Per-level tints, cycled
const MIP_TINTS: [[u8; 4]; 6] = [
    [255, 255, 255, 255],
    [255, 96, 96, 255],
    [96, 255, 96, 255],
    [96, 96, 255, 255],
    [255, 255, 96, 255],
    [255, 96, 255, 255],
];

/// Checkerboard image builder
#[derive(Debug, Clone)]
pub struct Checkerboard {
    /// Base extent (depth is forced to 1)
    pub extent: UVec3,
    /// Cell edge length at mip 0, in texels
    pub cell: u32,
    /// The two cell colors
    pub colors: [[u8; 4]; 2],
    /// Supply the whole pyramid instead of mip 0 only
    pub full_pyramid: bool,
    /// Multiply each level by a distinct tint
    pub tint_mips: bool,
}

impl Checkerboard {
    /// Black/white board with a full pyramid
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: UVec3::new(width, height, 1),
            cell: 32,
            colors: [[0, 0, 0, 255], [255, 255, 255, 255]],
            full_pyramid: true,
            tint_mips: false,
        }
    }

    /// Set the cell size
    pub fn with_cell(mut self, cell: u32) -> Self {
        self.cell = cell.max(1);
        self
    }

    /// Set the two cell colors
    pub fn with_colors(mut self, a: [u8; 4], b: [u8; 4]) -> Self {
        self.colors = [a, b];
        self
    }

    /// Supply mip 0 only
    pub fn base_level_only(mut self) -> Self {
        self.full_pyramid = false;
        self
    }

    /// Tint each level
    pub fn tinted(mut self) -> Self {
        self.tint_mips = true;
        self
    }

    /// Generate the descriptor
    pub fn build(&self, name: impl Into<String>) -> AssetResult<TextureDescriptor> {
        let extent = UVec3::new(self.extent.x, self.extent.y, 1);
        let levels = if self.full_pyramid {
            eval_num_mips(extent)
        } else {
            1
        };

        let mips = (0..levels).map(|level| self.level(extent, level)).collect();
        TextureDescriptor::new(name, PixelFormat::Rgba8Unorm, extent, mips)
    }

    fn level(&self, base: UVec3, level: u32) -> MipLevel {
        let extent = mip_extent(base, level);
        let cell = self.cell.checked_shr(level).unwrap_or(0).max(1);
        let tint = if self.tint_mips {
            MIP_TINTS[level as usize % MIP_TINTS.len()]
        } else {
            [255; 4]
        };

        let mut data = Vec::with_capacity((extent.x * extent.y * 4) as usize);
        for y in 0..extent.y {
            for x in 0..extent.x {
                let color = self.colors[((x / cell + y / cell) % 2) as usize];
                for (channel, value) in color.iter().enumerate() {
                    data.push((*value as u16 * tint[channel] as u16 / 255) as u8);
                }
            }
        }

        MipLevel { extent, data }
    }
}
