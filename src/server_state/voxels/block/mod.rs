//! # Block Module
//!
//! Block identifiers and the library describing what each identifier means.

use block_type::BlockType;

pub mod block_type;

/// The integer type stored per voxel in chunk grids, on disk and on the wire.
pub type BlockIndex = u8;

/// The block stored in every voxel that holds nothing.
pub const EMPTY_BLOCK: BlockIndex = BlockType::Empty as BlockIndex;

/// Properties of one registered block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Stable name, used by clients to pick textures.
    pub name: String,
    /// Whether the block takes part in collisions.
    pub is_solid: bool,
}

/// Registry of the blocks a world may contain, indexed by `BlockIndex`.
#[derive(Debug, Clone)]
pub struct BlockLibrary {
    blocks: Vec<BlockInfo>,
}

impl BlockLibrary {
    /// Creates a library containing every built-in [`BlockType`].
    pub fn standard() -> Self {
        Self {
            blocks: BlockType::ALL
                .iter()
                .map(|block_type| BlockInfo {
                    name: block_type.name().to_string(),
                    is_solid: block_type.is_solid(),
                })
                .collect(),
        }
    }

    /// Registers an additional block and returns its index, or `None` once the
    /// index space is full.
    pub fn register(&mut self, name: impl Into<String>, is_solid: bool) -> Option<BlockIndex> {
        let index = BlockIndex::try_from(self.blocks.len()).ok()?;
        self.blocks.push(BlockInfo {
            name: name.into(),
            is_solid,
        });
        Some(index)
    }

    /// Returns the block registered at `index`.
    pub fn info(&self, index: BlockIndex) -> Option<&BlockInfo> {
        self.blocks.get(usize::from(index))
    }

    /// Returns `true` if `index` names a registered block.
    pub fn contains(&self, index: BlockIndex) -> bool {
        usize::from(index) < self.blocks.len()
    }

    /// Whether the block is solid. Unknown indices are treated as non-solid.
    pub fn is_solid(&self, index: BlockIndex) -> bool {
        self.info(index).map(|info| info.is_solid).unwrap_or(false)
    }

    /// Names of every registered block, in index order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|info| info.name.as_str())
    }

    /// Number of registered blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` when no block is registered.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for BlockLibrary {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_library_matches_block_types() {
        let library = BlockLibrary::standard();
        assert_eq!(library.len(), BlockType::ALL.len());
        assert!(!library.is_solid(EMPTY_BLOCK));
        assert!(library.is_solid(BlockType::Stone.index()));
        assert!(!library.is_solid(250));
        assert!(!library.contains(250));
    }

    #[test]
    fn registered_blocks_get_the_next_index() {
        let mut library = BlockLibrary::standard();
        let index = library.register("lamp", true);
        assert_eq!(index, Some(BlockType::ALL.len() as BlockIndex));
        assert_eq!(library.info(8).map(|info| info.name.as_str()), Some("lamp"));
    }
}
