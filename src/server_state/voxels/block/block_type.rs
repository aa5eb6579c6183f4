//! # Block Type Module
//!
//! This module defines the built-in block types of the voxel world and their
//! conversion from the compact on-wire/on-disk representation.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::BlockIndex;

/// Enumerates the built-in block types of the voxel world.
///
/// The discriminant of each variant is its `BlockIndex`. The `FromPrimitive`
/// derive allows conversion from the raw byte stored in chunk grids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum BlockType {
    /// No block; non-solid.
    Empty = 0,

    /// A basic dirt block, found under the grass layer.
    Dirt = 1,

    /// Grass-topped dirt, the surface layer of generated ground.
    Grass = 2,

    /// Stone, the bulk of generated ground.
    Stone = 3,

    /// Snow.
    Snow = 4,

    /// A wooden log block.
    Wood = 5,

    /// Wooden planks.
    Planks = 6,

    /// Glass. Solid for collisions even though it is see-through.
    Glass = 7,
}

impl BlockType {
    /// Every built-in block type, in index order.
    pub const ALL: [BlockType; 8] = [
        BlockType::Empty,
        BlockType::Dirt,
        BlockType::Grass,
        BlockType::Stone,
        BlockType::Snow,
        BlockType::Wood,
        BlockType::Planks,
        BlockType::Glass,
    ];

    /// Converts a raw `BlockIndex` to a `BlockType`, if it names a built-in type.
    pub fn from_index(index: BlockIndex) -> Option<Self> {
        FromPrimitive::from_u8(index)
    }

    /// Raw index of this block type.
    pub fn index(self) -> BlockIndex {
        self as BlockIndex
    }

    /// Stable name of this block type, as sent to clients in the string table.
    pub fn name(self) -> &'static str {
        match self {
            BlockType::Empty => "empty",
            BlockType::Dirt => "dirt",
            BlockType::Grass => "grass",
            BlockType::Stone => "stone",
            BlockType::Snow => "snow",
            BlockType::Wood => "wood",
            BlockType::Planks => "planks",
            BlockType::Glass => "glass",
        }
    }

    /// Whether the block takes part in collisions.
    pub fn is_solid(self) -> bool {
        !matches!(self, BlockType::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_round_trip_through_from_primitive() {
        for block_type in BlockType::ALL {
            assert_eq!(BlockType::from_index(block_type.index()), Some(block_type));
        }
        assert_eq!(BlockType::from_index(200), None);
    }
}
