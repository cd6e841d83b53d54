//! Material Block
//!
//! Per-draw uniform data for the textured quad: the bindless handle split
//! into two 32-bit words, the committed mip range the shader clamps its
//! LOD to, and the UV scale of the image inside its storage.

use bytemuck::{Pod, Zeroable};
use glam::{UVec4, Vec2, Vec4};

use crate::device::BindlessHandle;
use crate::slot::SparseTextureSlot;

/// std140-compatible uniform block, 32 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialBlock {
    /// Handle low word, handle high word, min mip, max mip
    pub handle_and_mips: [u32; 4],
    /// UV scale in `xy`, `zw` unused
    pub uv_scale: [f32; 4],
}

impl MaterialBlock {
    /// Size of the block in bytes
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Build the block from raw parts
    pub fn new(handle: Option<BindlessHandle>, min_mip: u32, max_mip: u32, uv_scale: Vec2) -> Self {
        let words = handle.map(|handle| handle.split()).unwrap_or_default();
        Self {
            handle_and_mips: UVec4::new(words.x, words.y, min_mip, max_mip).to_array(),
            uv_scale: Vec4::new(uv_scale.x, uv_scale.y, 0.0, 0.0).to_array(),
        }
    }

    /// Block for drawing `slot` at its current committed range
    pub fn for_slot(slot: &SparseTextureSlot) -> Self {
        Self::new(
            slot.handle(),
            slot.committed_base_mip(),
            slot.committed_max_mip(),
            slot.uv_scale(),
        )
    }

    /// Reassembled bindless handle; `None` in classic binding mode
    pub fn handle(&self) -> Option<BindlessHandle> {
        let [lo, hi, _, _] = self.handle_and_mips;
        let handle = BindlessHandle::from_words(glam::UVec2::new(lo, hi));
        (handle.0 != 0).then_some(handle)
    }

    /// Committed mip range `(min, max)`
    pub fn mip_range(&self) -> (u32, u32) {
        (self.handle_and_mips[2], self.handle_and_mips[3])
    }

    /// Bytes ready for a uniform buffer upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_layout() {
        assert_eq!(MaterialBlock::SIZE, 32);
        assert_eq!(std::mem::align_of::<MaterialBlock>(), 4);
    }

    #[test]
    fn test_block_packing() {
        let handle = BindlessHandle(0x0000_0001_0000_0002);
        let block = MaterialBlock::new(Some(handle), 1, 3, Vec2::new(0.25, 0.5));

        assert_eq!(block.handle_and_mips, [2, 1, 1, 3]);
        assert_eq!(block.handle(), Some(handle));
        assert_eq!(block.mip_range(), (1, 3));

        let bytes = block.as_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &0.25f32.to_le_bytes());
    }

    #[test]
    fn test_classic_binding_block() {
        let block = MaterialBlock::new(None, 0, 8, Vec2::ONE);
        assert_eq!(block.handle(), None);
        assert_eq!(block.uv_scale, [1.0, 1.0, 0.0, 0.0]);
    }
}
