//! World generation.
//!
//! Terrain generation is an external concern: the server only needs *something*
//! to fill fresh chunks with. [`FlatWorldGenerator`] lays down a flat stone ground
//! with a thin dirt and grass crust and seeded surface bumps.

use cgmath::Vector3;

use super::block::{block_type::BlockType, BlockIndex};
use super::chunk::{block_index, ChunkIndices};

/// Fills new chunks with content.
pub trait WorldGenerator {
    /// Fills `blocks` (laid out `x + width * (y + height * z)`) for the chunk at
    /// `indices`, whose dimensions are `size`.
    fn generate(&self, indices: ChunkIndices, size: Vector3<u32>, blocks: &mut [BlockIndex]);

    /// Where players should appear, in container space with a block size of 1.
    fn spawn_position(&self) -> Vector3<f32> {
        Vector3::new(0.5, 2.0, 0.5)
    }
}

/// Flat ground at `ground_height`, with up to `bump_height` extra blocks.
#[derive(Debug, Clone)]
pub struct FlatWorldGenerator {
    seed: u64,
    ground_height: i32,
    bump_height: i32,
}

impl FlatWorldGenerator {
    /// Dirt layers between stone and the grass surface.
    const DIRT_DEPTH: i32 = 3;

    /// Creates a generator with its ground at voxel height 0.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ground_height: 0,
            bump_height: 1,
        }
    }

    /// Overrides the ground height and the maximum surface bump.
    pub fn with_heights(mut self, ground_height: i32, bump_height: i32) -> Self {
        self.ground_height = ground_height;
        self.bump_height = bump_height.max(0);
        self
    }

    /// Surface height of the column at world voxel `(x, z)`.
    pub fn surface_height(&self, x: i64, z: i64) -> i32 {
        let column_seed = self.seed
            ^ (x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (z as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
        let mut rng = fastrand::Rng::with_seed(column_seed);
        self.ground_height + rng.i32(0..=self.bump_height)
    }

    fn block_for(&self, height: i64, surface: i32) -> BlockType {
        let surface = i64::from(surface);
        if height > surface {
            BlockType::Empty
        } else if height == surface {
            BlockType::Grass
        } else if height > surface - i64::from(Self::DIRT_DEPTH) {
            BlockType::Dirt
        } else {
            BlockType::Stone
        }
    }
}

impl WorldGenerator for FlatWorldGenerator {
    fn generate(&self, indices: ChunkIndices, size: Vector3<u32>, blocks: &mut [BlockIndex]) {
        for z in 0..size.z {
            let world_z = i64::from(indices.z) * i64::from(size.z) + i64::from(z);
            for x in 0..size.x {
                let world_x = i64::from(indices.x) * i64::from(size.x) + i64::from(x);
                let surface = self.surface_height(world_x, world_z);
                for y in 0..size.y {
                    let world_y = i64::from(indices.y) * i64::from(size.y) + i64::from(y);
                    let Some(index) = block_index(size, Vector3::new(x, y, z)) else {
                        continue;
                    };
                    if let Some(block) = blocks.get_mut(index) {
                        *block = self.block_for(world_y, surface).index();
                    }
                }
            }
        }
    }

    fn spawn_position(&self) -> Vector3<f32> {
        Vector3::new(0.5, (self.ground_height + self.bump_height + 2) as f32, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(generator: &FlatWorldGenerator, indices: ChunkIndices) -> Vec<BlockIndex> {
        let size = Vector3::new(4, 4, 4);
        let mut blocks = vec![0; 64];
        generator.generate(indices, size, &mut blocks);
        blocks
    }

    #[test]
    fn same_seed_generates_same_content() {
        let a = FlatWorldGenerator::new(42);
        let b = FlatWorldGenerator::new(42);
        let indices = ChunkIndices::new(1, -1, 2);
        assert_eq!(generate(&a, indices), generate(&b, indices));
    }

    #[test]
    fn chunks_above_ground_are_empty_and_deep_chunks_are_stone() {
        let generator = FlatWorldGenerator::new(7);
        assert!(generate(&generator, ChunkIndices::new(0, 3, 0))
            .iter()
            .all(|block| *block == BlockType::Empty.index()));
        assert!(generate(&generator, ChunkIndices::new(0, -4, 0))
            .iter()
            .all(|block| *block == BlockType::Stone.index()));
    }

    #[test]
    fn surface_column_is_topped_with_grass() {
        let generator = FlatWorldGenerator::new(1).with_heights(1, 0);
        let blocks = generate(&generator, ChunkIndices::new(0, 0, 0));
        let size = Vector3::new(4, 4, 4);
        let at = |y| blocks[block_index(size, Vector3::new(2, y, 1)).unwrap()];
        assert_eq!(at(0), BlockType::Dirt.index());
        assert_eq!(at(1), BlockType::Grass.index());
        assert_eq!(at(2), BlockType::Empty.index());
    }
}
