//! Chunk colliders.
//!
//! The geometry of a chunk collider is produced by a [`ColliderBuilder`], which the
//! rest of the server treats as an opaque "grid in, collider out" function. The
//! reference [`VoxelBoxColliderBuilder`] emits one axis-aligned box per solid voxel,
//! in chunk-local space.

use cgmath::Vector3;

use super::block::{BlockIndex, BlockLibrary};
use super::chunk::ChunkGridView;

/// Axis-aligned box covering one solid voxel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelBox {
    /// Minimum corner, chunk-local.
    pub min: Vector3<f32>,
    /// Maximum corner, chunk-local.
    pub max: Vector3<f32>,
    /// Voxel the box was built from.
    pub coords: Vector3<u32>,
    /// Block stored in that voxel when the collider was built.
    pub block: BlockIndex,
}

/// Collision geometry of one chunk.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Collider {
    /// The chunk holds no solid block.
    #[default]
    Empty,
    /// One box per solid voxel.
    Compound(Vec<VoxelBox>),
}

impl Collider {
    /// Returns `true` when the collider has no geometry.
    pub fn is_empty(&self) -> bool {
        match self {
            Collider::Empty => true,
            Collider::Compound(boxes) => boxes.is_empty(),
        }
    }

    /// Number of boxes in the collider.
    pub fn box_count(&self) -> usize {
        match self {
            Collider::Empty => 0,
            Collider::Compound(boxes) => boxes.len(),
        }
    }

    /// Block that produced the box at `coords`, if that voxel was solid.
    pub fn block_at(&self, coords: Vector3<u32>) -> Option<BlockIndex> {
        match self {
            Collider::Empty => None,
            Collider::Compound(boxes) => boxes
                .iter()
                .find(|voxel_box| voxel_box.coords == coords)
                .map(|voxel_box| voxel_box.block),
        }
    }
}

/// Builds a collider from a chunk grid. Invoked on worker threads while the
/// grid's read lock is held.
pub trait ColliderBuilder: Send + Sync {
    /// Builds the collider for `grid`.
    fn build(&self, grid: &ChunkGridView<'_>, library: &BlockLibrary) -> Collider;
}

/// One box per solid voxel.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoxelBoxColliderBuilder;

impl ColliderBuilder for VoxelBoxColliderBuilder {
    fn build(&self, grid: &ChunkGridView<'_>, library: &BlockLibrary) -> Collider {
        let mut boxes = Vec::new();
        for z in 0..grid.size.z {
            for y in 0..grid.size.y {
                for x in 0..grid.size.x {
                    let Some(block) = grid.block(x, y, z) else {
                        continue;
                    };
                    if !library.is_solid(block) {
                        continue;
                    }
                    let min = Vector3::new(x as f32, y as f32, z as f32) * grid.block_size;
                    boxes.push(VoxelBox {
                        min,
                        max: min + Vector3::new(1.0, 1.0, 1.0) * grid.block_size,
                        coords: Vector3::new(x, y, z),
                        block,
                    });
                }
            }
        }

        if boxes.is_empty() {
            Collider::Empty
        } else {
            Collider::Compound(boxes)
        }
    }
}
