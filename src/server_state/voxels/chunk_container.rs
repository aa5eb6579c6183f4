//! # Chunk Container
//!
//! This module provides the `ChunkContainer`, which exclusively owns a set of
//! chunks keyed by their 3D chunk indices.
//!
//! ## Architecture
//!
//! Chunks are only ever created and destroyed through the container. Every chunk
//! of a container shares the container's size, voxel edge length and coordinate
//! mapping. The container announces its changes through three signals:
//!
//! * `on_chunk_added` - after a chunk has been inserted and initialized
//! * `on_chunk_removed` - after a chunk has been dropped from the container
//! * `on_chunk_updated` - forwarded from every chunk's own block-updated signal
//!
//! Chunks are kept in a `BTreeMap`, so iteration order is deterministic.

use std::{collections::BTreeMap, sync::Arc};

use cgmath::Vector3;
use log::debug;

use crate::core::{MtResource, Signal};

use super::block::BlockIndex;
use super::chunk::{BlockUpdated, ChunkError, ChunkIndices, CoordinateMapping, VoxelChunk};

/// Emitted after a chunk was added to a container.
#[derive(Debug, Clone)]
pub struct ChunkAdded {
    /// Position of the chunk in the container.
    pub indices: ChunkIndices,
    /// Container-space offset of the chunk.
    pub offset: Vector3<f32>,
    /// Dimensions of the chunk in voxels.
    pub size: Vector3<u32>,
    /// Edge length of one voxel.
    pub block_size: f32,
    /// Shared handle to the chunk grid.
    pub grid: MtResource<Vec<BlockIndex>>,
}

impl ChunkAdded {
    /// Describes an existing chunk.
    pub fn from_chunk(chunk: &VoxelChunk) -> Self {
        Self {
            indices: chunk.indices(),
            offset: chunk.offset(),
            size: chunk.size(),
            block_size: chunk.block_size(),
            grid: chunk.grid(),
        }
    }
}

/// Emitted after a chunk was removed from a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRemoved {
    /// Position of the removed chunk.
    pub indices: ChunkIndices,
}

/// Emitted after a block of one of the container's chunks changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkUpdated {
    /// Chunk holding the block.
    pub indices: ChunkIndices,
    /// Voxel coordinates of the block.
    pub coords: Vector3<u32>,
    /// Block now stored there.
    pub block: BlockIndex,
}

/// Owner of a set of chunks sharing one grid layout and coordinate mapping.
pub struct ChunkContainer {
    chunk_size: Vector3<u32>,
    block_size: f32,
    mapping: Arc<dyn CoordinateMapping>,
    chunks: BTreeMap<ChunkIndices, VoxelChunk>,
    on_chunk_added: Signal<ChunkAdded>,
    on_chunk_removed: Signal<ChunkRemoved>,
    on_chunk_updated: Signal<ChunkUpdated>,
}

impl ChunkContainer {
    /// Creates an empty container.
    ///
    /// # Arguments
    /// * `chunk_size` - Dimensions of every chunk, in voxels
    /// * `block_size` - Edge length of one voxel
    /// * `mapping` - Coordinate mapping shared by every chunk of the container
    pub fn new(
        chunk_size: Vector3<u32>,
        block_size: f32,
        mapping: Arc<dyn CoordinateMapping>,
    ) -> Result<Self, ChunkError> {
        if chunk_size.x == 0 || chunk_size.y == 0 || chunk_size.z == 0 {
            return Err(ChunkError::InvalidSize([
                chunk_size.x,
                chunk_size.y,
                chunk_size.z,
            ]));
        }
        Ok(Self {
            chunk_size,
            block_size,
            mapping,
            chunks: BTreeMap::new(),
            on_chunk_added: Signal::new(),
            on_chunk_removed: Signal::new(),
            on_chunk_updated: Signal::new(),
        })
    }

    /// Adds an empty chunk.
    pub fn add_chunk(&mut self, indices: ChunkIndices) -> Result<&VoxelChunk, ChunkError> {
        self.add_chunk_with(indices, |_| {})
    }

    /// Adds a chunk whose grid is filled by `init` before anyone is told about it.
    pub fn add_chunk_with<F>(&mut self, indices: ChunkIndices, init: F) -> Result<&VoxelChunk, ChunkError>
    where
        F: FnOnce(&mut [BlockIndex]),
    {
        if self.chunks.contains_key(&indices) {
            return Err(ChunkError::AlreadyExists(indices));
        }

        let chunk = VoxelChunk::new(
            indices,
            self.chunk_size,
            self.block_size,
            self.chunk_offset(indices),
            self.mapping.clone(),
        )?;
        chunk.init_blocks(init);

        let forward = self.on_chunk_updated.clone();
        chunk
            .on_block_updated()
            .connect(move |event: &BlockUpdated| {
                forward.emit(&ChunkUpdated {
                    indices,
                    coords: event.coords,
                    block: event.block,
                });
            });

        let added = ChunkAdded::from_chunk(&chunk);
        self.chunks.insert(indices, chunk);
        debug!("Chunk {indices} added");
        self.on_chunk_added.emit(&added);

        self.chunks.get(&indices).ok_or(ChunkError::Missing(indices))
    }

    /// Removes a chunk. Returns `false` if no chunk was stored at `indices`.
    pub fn remove_chunk(&mut self, indices: ChunkIndices) -> bool {
        if self.chunks.remove(&indices).is_none() {
            return false;
        }
        debug!("Chunk {indices} removed");
        self.on_chunk_removed.emit(&ChunkRemoved { indices });
        true
    }

    /// Returns the chunk at `indices`.
    pub fn chunk(&self, indices: ChunkIndices) -> Option<&VoxelChunk> {
        self.chunks.get(&indices)
    }

    /// Writes a block in one of the container's chunks.
    pub fn update_block(
        &self,
        indices: ChunkIndices,
        coords: Vector3<u32>,
        block: BlockIndex,
    ) -> Result<(), ChunkError> {
        self.chunk(indices)
            .ok_or(ChunkError::Missing(indices))?
            .update_block(coords, block)
    }

    /// Container-space position of the (0, 0, 0) voxel corner of a chunk.
    pub fn chunk_offset(&self, indices: ChunkIndices) -> Vector3<f32> {
        Vector3::new(
            indices.x as f32 * self.chunk_size.x as f32,
            indices.y as f32 * self.chunk_size.y as f32,
            indices.z as f32 * self.chunk_size.z as f32,
        ) * self.block_size
    }

    /// Finds the chunk and voxel a container-space position falls into.
    pub fn locate(&self, position: Vector3<f32>) -> Option<(ChunkIndices, Vector3<u32>)> {
        let grid_position = self.mapping.map_position(position);
        let chunk_extent = self.chunk_size.cast::<f32>()? * self.block_size;
        let indices = ChunkIndices::new(
            (grid_position.x / chunk_extent.x).floor() as i32,
            (grid_position.y / chunk_extent.y).floor() as i32,
            (grid_position.z / chunk_extent.z).floor() as i32,
        );
        let chunk = self.chunk(indices)?;
        chunk
            .compute_coordinates(position)
            .map(|coords| (indices, coords))
    }

    /// Calls `visit` for every chunk, in index order.
    pub fn for_each_chunk<F>(&self, mut visit: F)
    where
        F: FnMut(&VoxelChunk),
    {
        for chunk in self.chunks.values() {
            visit(chunk);
        }
    }

    /// Iterates over every chunk, in index order.
    pub fn chunks(&self) -> impl Iterator<Item = &VoxelChunk> {
        self.chunks.values()
    }

    /// Indices of every chunk, in index order.
    pub fn chunk_indices(&self) -> Vec<ChunkIndices> {
        self.chunks.keys().copied().collect()
    }

    /// Number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Dimensions of every chunk in voxels.
    pub fn chunk_size(&self) -> Vector3<u32> {
        self.chunk_size
    }

    /// Edge length of one voxel.
    pub fn block_size(&self) -> f32 {
        self.block_size
    }

    /// Coordinate mapping shared by the chunks.
    pub fn mapping(&self) -> &Arc<dyn CoordinateMapping> {
        &self.mapping
    }

    /// Signal emitted after a chunk was added.
    pub fn on_chunk_added(&self) -> &Signal<ChunkAdded> {
        &self.on_chunk_added
    }

    /// Signal emitted after a chunk was removed.
    pub fn on_chunk_removed(&self) -> &Signal<ChunkRemoved> {
        &self.on_chunk_removed
    }

    /// Signal emitted after any block of any chunk changed.
    pub fn on_chunk_updated(&self) -> &Signal<ChunkUpdated> {
        &self.on_chunk_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::voxels::chunk::{CubeMapping, DeformedMapping};
    use std::{cell::RefCell, rc::Rc};

    fn container() -> ChunkContainer {
        ChunkContainer::new(Vector3::new(4, 4, 4), 0.5, Arc::new(CubeMapping)).unwrap()
    }

    #[test]
    fn chunk_offset_scales_by_size_and_block_size() {
        let container = container();
        assert_eq!(
            container.chunk_offset(ChunkIndices::new(1, -2, 3)),
            Vector3::new(2.0, -4.0, 6.0)
        );
    }

    #[test]
    fn add_and_remove_emit_signals() {
        let mut container = container();
        let log = Rc::new(RefCell::new(Vec::new()));

        let added = log.clone();
        container
            .on_chunk_added()
            .connect(move |event: &ChunkAdded| added.borrow_mut().push(format!("+{}", event.indices)));
        let removed = log.clone();
        container
            .on_chunk_removed()
            .connect(move |event: &ChunkRemoved| removed.borrow_mut().push(format!("-{}", event.indices)));

        let indices = ChunkIndices::new(0, 1, 0);
        container.add_chunk(indices).unwrap();
        assert!(matches!(
            container.add_chunk(indices),
            Err(ChunkError::AlreadyExists(_))
        ));
        assert!(container.remove_chunk(indices));
        assert!(!container.remove_chunk(indices));

        assert_eq!(*log.borrow(), vec!["+(0, 1, 0)", "-(0, 1, 0)"]);
    }

    #[test]
    fn block_updates_are_forwarded_with_chunk_indices() {
        let mut container = container();
        let updates = Rc::new(RefCell::new(Vec::new()));
        let sink = updates.clone();
        container
            .on_chunk_updated()
            .connect(move |event: &ChunkUpdated| sink.borrow_mut().push(*event));

        let indices = ChunkIndices::new(2, 0, -1);
        container.add_chunk(indices).unwrap();
        container
            .update_block(indices, Vector3::new(3, 1, 2), 5)
            .unwrap();

        assert_eq!(
            *updates.borrow(),
            vec![ChunkUpdated {
                indices,
                coords: Vector3::new(3, 1, 2),
                block: 5,
            }]
        );
        assert!(matches!(
            container.update_block(ChunkIndices::new(9, 9, 9), Vector3::new(0, 0, 0), 1),
            Err(ChunkError::Missing(_))
        ));
    }

    #[test]
    fn added_event_sees_initialized_content() {
        let mut container = container();
        let first_block = Rc::new(RefCell::new(None));
        let sink = first_block.clone();
        container
            .on_chunk_added()
            .connect(move |event: &ChunkAdded| *sink.borrow_mut() = event.grid.get().first().copied());

        container
            .add_chunk_with(ChunkIndices::new(0, 0, 0), |blocks| blocks.fill(3))
            .unwrap();
        assert_eq!(*first_block.borrow(), Some(3));
    }

    #[test]
    fn locate_finds_chunk_and_voxel() {
        let mut container = container();
        container.add_chunk(ChunkIndices::new(-1, 0, 0)).unwrap();
        assert_eq!(
            container.locate(Vector3::new(-0.25, 1.0, 0.6)),
            Some((ChunkIndices::new(-1, 0, 0), Vector3::new(3, 2, 1)))
        );
        assert_eq!(container.locate(Vector3::new(5.0, 0.0, 0.0)), None);
    }

    #[test]
    fn chunks_share_the_container_mapping() {
        let mapping: Arc<dyn CoordinateMapping> =
            Arc::new(DeformedMapping::new(Vector3::new(0.0, 0.0, 0.0), 1.0));
        let mut container = ChunkContainer::new(Vector3::new(2, 2, 2), 1.0, mapping).unwrap();
        let chunk = container.add_chunk(ChunkIndices::new(0, 0, 0)).unwrap();
        assert_eq!(
            chunk.compute_coordinates(Vector3::new(0.5, 0.5, 0.5)),
            Some(Vector3::new(0, 0, 0))
        );
        assert_eq!(container.chunk_count(), 1);
    }
}
