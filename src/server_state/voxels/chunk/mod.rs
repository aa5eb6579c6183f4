//! # Chunk Module
//!
//! This module provides the `VoxelChunk` struct: a dense, fixed-size 3D grid of
//! blocks that is the unit of storage, collision and replication.
//!
//! ## Storage
//!
//! Blocks are stored linearly, one `BlockIndex` per voxel, at
//! `x + width * (y + height * z)`. The grid sits behind a single read-write lock:
//! background collider builds take the read side while block edits from the
//! simulation thread take the write side. Only one chunk's lock is ever taken at
//! a time.
//!
//! ## Coordinate Mapping
//!
//! Chunks do not know whether their world is flat or a rounded planet. The
//! container injects a [`CoordinateMapping`] that every chunk uses to bring a
//! world position back onto the straight grid before indexing.
//!
//! ## Events
//!
//! Every successful [`VoxelChunk::update_block`] emits a [`BlockUpdated`] event on
//! the chunk's signal after the write lock has been released.

use std::{fmt, sync::Arc};

use cgmath::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{MtResource, Signal};

use super::block::{BlockIndex, BlockLibrary, EMPTY_BLOCK};
use super::collider::{Collider, ColliderBuilder};

pub mod coordinate_mapping;

pub use coordinate_mapping::{CoordinateMapping, CubeMapping, DeformedMapping};

/// Position of a chunk in its container, in chunks (not voxels).
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkIndices {
    /// Chunk index along X.
    pub x: i32,
    /// Chunk index along Y.
    pub y: i32,
    /// Chunk index along Z.
    pub z: i32,
}

impl ChunkIndices {
    /// Creates chunk indices.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for ChunkIndices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Errors raised at the voxel data-model boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Voxel coordinates fall outside the chunk.
    #[error("voxel ({x}, {y}, {z}) is outside of chunk {indices}")]
    OutOfBounds {
        /// Chunk that was addressed.
        indices: ChunkIndices,
        /// Requested X.
        x: u32,
        /// Requested Y.
        y: u32,
        /// Requested Z.
        z: u32,
    },
    /// A chunk already exists at these indices.
    #[error("chunk {0} already exists")]
    AlreadyExists(ChunkIndices),
    /// No chunk exists at these indices.
    #[error("chunk {0} does not exist")]
    Missing(ChunkIndices),
    /// Bulk content does not match the chunk size.
    #[error("chunk {indices} holds {expected} blocks but {actual} were provided")]
    ContentSizeMismatch {
        /// Chunk that was addressed.
        indices: ChunkIndices,
        /// Number of voxels in the chunk.
        expected: usize,
        /// Number of blocks provided.
        actual: usize,
    },
    /// A chunk dimension is zero.
    #[error("chunk dimensions must be non-zero, got {0:?}")]
    InvalidSize([u32; 3]),
}

/// Event emitted after a block of a chunk changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockUpdated {
    /// Voxel coordinates of the block.
    pub coords: Vector3<u32>,
    /// Block now stored there.
    pub block: BlockIndex,
}

/// Read-only view over a chunk grid, handed to collider builders while the grid
/// read lock is held.
#[derive(Debug, Clone, Copy)]
pub struct ChunkGridView<'a> {
    /// Dimensions of the grid in voxels.
    pub size: Vector3<u32>,
    /// Edge length of one voxel.
    pub block_size: f32,
    /// Blocks, stored at `x + width * (y + height * z)`.
    pub blocks: &'a [BlockIndex],
}

impl ChunkGridView<'_> {
    /// Returns the block at voxel coordinates, or `None` when out of bounds.
    pub fn block(&self, x: u32, y: u32, z: u32) -> Option<BlockIndex> {
        block_index(self.size, Vector3::new(x, y, z)).and_then(|index| self.blocks.get(index).copied())
    }
}

/// Linear index of `coords` in a grid of `size`, or `None` when out of bounds.
pub fn block_index(size: Vector3<u32>, coords: Vector3<u32>) -> Option<usize> {
    if coords.x >= size.x || coords.y >= size.y || coords.z >= size.z {
        return None;
    }
    let (width, height) = (size.x as usize, size.y as usize);
    Some(coords.x as usize + width * (coords.y as usize + height * coords.z as usize))
}

/// A dense grid of blocks positioned in a chunk container.
pub struct VoxelChunk {
    indices: ChunkIndices,
    size: Vector3<u32>,
    block_size: f32,
    offset: Vector3<f32>,
    mapping: Arc<dyn CoordinateMapping>,
    cells: MtResource<Vec<BlockIndex>>,
    on_block_updated: Signal<BlockUpdated>,
}

impl VoxelChunk {
    /// Creates an empty chunk.
    ///
    /// # Arguments
    /// * `indices` - Position of the chunk in its container
    /// * `size` - Dimensions in voxels; every component must be non-zero
    /// * `block_size` - Edge length of one voxel
    /// * `offset` - Container-space position of the chunk's voxel (0, 0, 0) corner
    /// * `mapping` - Coordinate mapping shared with the rest of the container
    pub fn new(
        indices: ChunkIndices,
        size: Vector3<u32>,
        block_size: f32,
        offset: Vector3<f32>,
        mapping: Arc<dyn CoordinateMapping>,
    ) -> Result<Self, ChunkError> {
        if size.x == 0 || size.y == 0 || size.z == 0 {
            return Err(ChunkError::InvalidSize([size.x, size.y, size.z]));
        }
        let block_count = size.x as usize * size.y as usize * size.z as usize;
        Ok(Self {
            indices,
            size,
            block_size,
            offset,
            mapping,
            cells: MtResource::new(vec![EMPTY_BLOCK; block_count]),
            on_block_updated: Signal::new(),
        })
    }

    /// Position of this chunk in its container.
    pub fn indices(&self) -> ChunkIndices {
        self.indices
    }

    /// Dimensions in voxels.
    pub fn size(&self) -> Vector3<u32> {
        self.size
    }

    /// Edge length of one voxel.
    pub fn block_size(&self) -> f32 {
        self.block_size
    }

    /// Container-space offset of the chunk.
    pub fn offset(&self) -> Vector3<f32> {
        self.offset
    }

    /// Number of voxels in the chunk.
    pub fn block_count(&self) -> usize {
        self.size.x as usize * self.size.y as usize * self.size.z as usize
    }

    /// Linear grid index of `coords`, or `None` when out of bounds.
    pub fn block_index(&self, coords: Vector3<u32>) -> Option<usize> {
        block_index(self.size, coords)
    }

    /// Reads the block at `coords`.
    pub fn block(&self, coords: Vector3<u32>) -> Option<BlockIndex> {
        let index = self.block_index(coords)?;
        self.cells.get().get(index).copied()
    }

    /// Writes a block and emits [`BlockUpdated`].
    ///
    /// Writing the block already stored still counts as an update.
    pub fn update_block(&self, coords: Vector3<u32>, block: BlockIndex) -> Result<(), ChunkError> {
        let index = self.block_index(coords).ok_or(ChunkError::OutOfBounds {
            indices: self.indices,
            x: coords.x,
            y: coords.y,
            z: coords.z,
        })?;

        {
            let mut cells = self.cells.get_mut();
            cells[index] = block;
        }

        self.on_block_updated.emit(&BlockUpdated { coords, block });
        Ok(())
    }

    /// Initializes the whole grid at once under the write lock. No event is emitted.
    pub fn init_blocks<F>(&self, init: F)
    where
        F: FnOnce(&mut [BlockIndex]),
    {
        let mut cells = self.cells.get_mut();
        init(cells.as_mut_slice());
    }

    /// Replaces the whole grid with `content`. No event is emitted.
    pub fn load_content(&self, content: &[BlockIndex]) -> Result<(), ChunkError> {
        if content.len() != self.block_count() {
            return Err(ChunkError::ContentSizeMismatch {
                indices: self.indices,
                expected: self.block_count(),
                actual: content.len(),
            });
        }
        self.init_blocks(|blocks| blocks.copy_from_slice(content));
        Ok(())
    }

    /// Returns the block at `coords + offset`, or `None` when that position falls
    /// outside this chunk. Neighbouring chunks are never consulted.
    pub fn neighbor_block(&self, coords: Vector3<u32>, offset: Vector3<i32>) -> Option<BlockIndex> {
        let neighbor = Vector3::new(
            u32::try_from(i64::from(coords.x) + i64::from(offset.x)).ok()?,
            u32::try_from(i64::from(coords.y) + i64::from(offset.y)).ok()?,
            u32::try_from(i64::from(coords.z) + i64::from(offset.z)).ok()?,
        );
        self.block(neighbor)
    }

    /// Builds a collider from the current grid, holding the read lock for the
    /// duration of the build.
    pub fn build_collider(&self, builder: &dyn ColliderBuilder, library: &BlockLibrary) -> Collider {
        let cells = self.cells.get();
        builder.build(
            &ChunkGridView {
                size: self.size,
                block_size: self.block_size,
                blocks: &cells,
            },
            library,
        )
    }

    /// Maps a container-space position to voxel coordinates in this chunk.
    ///
    /// Returns `None` when the position does not fall inside the chunk.
    pub fn compute_coordinates(&self, position: Vector3<f32>) -> Option<Vector3<u32>> {
        let local = (self.mapping.map_position(position) - self.offset) / self.block_size;
        let axis = |value: f32, extent: u32| -> Option<u32> {
            let value = value.floor();
            if !value.is_finite() || value < 0.0 || value >= extent as f32 {
                return None;
            }
            Some(value as u32)
        };
        Some(Vector3::new(
            axis(local.x, self.size.x)?,
            axis(local.y, self.size.y)?,
            axis(local.z, self.size.z)?,
        ))
    }

    /// Copies the grid out under the read lock.
    pub fn content(&self) -> Vec<BlockIndex> {
        self.cells.get().clone()
    }

    /// Shared handle to the grid, for background readers.
    pub fn grid(&self) -> MtResource<Vec<BlockIndex>> {
        self.cells.clone()
    }

    /// Signal emitted after every block update.
    pub fn on_block_updated(&self) -> &Signal<BlockUpdated> {
        &self.on_block_updated
    }
}

impl fmt::Debug for VoxelChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoxelChunk")
            .field("indices", &self.indices)
            .field("size", &self.size)
            .field("block_size", &self.block_size)
            .field("offset", &self.offset)
            .field("mapping", &self.mapping)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::voxels::block::block_type::BlockType;
    use crate::server_state::voxels::collider::VoxelBoxColliderBuilder;
    use std::{cell::RefCell, collections::HashSet, rc::Rc};

    fn chunk(size: Vector3<u32>) -> VoxelChunk {
        VoxelChunk::new(
            ChunkIndices::new(0, 0, 0),
            size,
            1.0,
            Vector3::new(0.0, 0.0, 0.0),
            Arc::new(CubeMapping),
        )
        .unwrap()
    }

    #[test]
    fn block_index_is_a_bijection() {
        let size = Vector3::new(3, 4, 5);
        let chunk = chunk(size);
        let mut seen = HashSet::new();
        for z in 0..size.z {
            for y in 0..size.y {
                for x in 0..size.x {
                    let index = chunk.block_index(Vector3::new(x, y, z)).unwrap();
                    assert!(index < chunk.block_count());
                    assert!(seen.insert(index));
                }
            }
        }
        assert_eq!(seen.len(), chunk.block_count());
        assert_eq!(chunk.block_index(Vector3::new(1, 2, 3)), Some(1 + 3 * (2 + 4 * 3)));
    }

    #[test]
    fn out_of_bounds_coordinates_are_rejected() {
        let chunk = chunk(Vector3::new(2, 2, 2));
        assert_eq!(chunk.block_index(Vector3::new(2, 0, 0)), None);
        assert_eq!(chunk.block(Vector3::new(0, 0, 9)), None);
        assert!(matches!(
            chunk.update_block(Vector3::new(0, 5, 0), 1),
            Err(ChunkError::OutOfBounds { y: 5, .. })
        ));
    }

    #[test]
    fn write_then_read_returns_written_value() {
        let chunk = chunk(Vector3::new(4, 4, 4));
        let mut rng = fastrand::Rng::with_seed(3);
        for _ in 0..64 {
            let coords = Vector3::new(rng.u32(0..4), rng.u32(0..4), rng.u32(0..4));
            let block = rng.u8(..);
            chunk.update_block(coords, block).unwrap();
            assert_eq!(chunk.block(coords), Some(block));
        }
    }

    #[test]
    fn update_emits_after_the_lock_is_released() {
        let chunk = Rc::new(chunk(Vector3::new(2, 2, 2)));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let reader = Rc::downgrade(&chunk);
        let sink = seen.clone();
        chunk.on_block_updated().connect(move |event: &BlockUpdated| {
            let current = reader.upgrade().and_then(|chunk| chunk.block(event.coords));
            sink.borrow_mut().push((event.coords, event.block, current));
        });

        chunk.update_block(Vector3::new(1, 0, 1), 3).unwrap();
        chunk.update_block(Vector3::new(1, 0, 1), 3).unwrap();

        let expected = (Vector3::new(1, 0, 1), 3, Some(3));
        assert_eq!(*seen.borrow(), vec![expected, expected]);
    }

    #[test]
    fn neighbor_block_stays_inside_the_chunk() {
        let chunk = chunk(Vector3::new(3, 3, 3));
        chunk.update_block(Vector3::new(1, 2, 1), 4).unwrap();
        assert_eq!(chunk.neighbor_block(Vector3::new(1, 1, 1), Vector3::new(0, 1, 0)), Some(4));
        assert_eq!(chunk.neighbor_block(Vector3::new(0, 0, 0), Vector3::new(-1, 0, 0)), None);
        assert_eq!(chunk.neighbor_block(Vector3::new(2, 0, 0), Vector3::new(1, 0, 0)), None);
    }

    #[test]
    fn init_blocks_does_not_emit() {
        let chunk = chunk(Vector3::new(2, 1, 1));
        let hits = Rc::new(RefCell::new(0));
        let sink = hits.clone();
        chunk.on_block_updated().connect(move |_| *sink.borrow_mut() += 1);

        chunk.init_blocks(|blocks| blocks.fill(BlockType::Stone.index()));
        assert_eq!(*hits.borrow(), 0);
        assert_eq!(chunk.content(), vec![BlockType::Stone.index(); 2]);
        assert!(chunk.load_content(&[1, 2, 3]).is_err());
    }

    #[test]
    fn compute_coordinates_uses_offset_and_block_size() {
        let chunk = VoxelChunk::new(
            ChunkIndices::new(1, 0, 0),
            Vector3::new(4, 4, 4),
            0.5,
            Vector3::new(2.0, 0.0, 0.0),
            Arc::new(CubeMapping),
        )
        .unwrap();
        assert_eq!(
            chunk.compute_coordinates(Vector3::new(2.75, 1.2, 0.1)),
            Some(Vector3::new(1, 2, 0))
        );
        assert_eq!(chunk.compute_coordinates(Vector3::new(1.9, 0.0, 0.0)), None);
        assert_eq!(chunk.compute_coordinates(Vector3::new(4.0, 0.0, 0.0)), None);
    }

    #[test]
    fn collider_reflects_solid_blocks() {
        let chunk = chunk(Vector3::new(2, 2, 2));
        let library = BlockLibrary::standard();
        assert!(chunk.build_collider(&VoxelBoxColliderBuilder, &library).is_empty());

        chunk.update_block(Vector3::new(1, 1, 0), BlockType::Stone.index()).unwrap();
        let collider = chunk.build_collider(&VoxelBoxColliderBuilder, &library);
        assert_eq!(collider.box_count(), 1);
        assert_eq!(collider.block_at(Vector3::new(1, 1, 0)), Some(BlockType::Stone.index()));
    }

    #[test]
    fn zero_sized_chunks_are_rejected() {
        let result = VoxelChunk::new(
            ChunkIndices::new(0, 0, 0),
            Vector3::new(0, 1, 1),
            1.0,
            Vector3::new(0.0, 0.0, 0.0),
            Arc::new(CubeMapping),
        );
        assert!(matches!(result, Err(ChunkError::InvalidSize(_))));
    }
}
