//! # Voxel World Model
//!
//! This module contains the voxel data model of the server: block definitions,
//! chunks, the containers that own them, and the collaborators that fill, save
//! and collide them.
//!
//! ## Architecture
//!
//! * **Block**: block identifiers and per-block properties
//! * **Chunk**: fixed-size 3D grids of blocks behind a read-write lock, with a
//!   pluggable coordinate mapping for rounded worlds
//! * **ChunkContainer**: owner of a set of chunks, announcing every change through signals
//! * **Collider**: chunk collision geometry and the builder that derives it from a grid
//! * **Generation** and **Persistence**: fill fresh chunks and save/load them
//! * **Tasks**: background work over chunk snapshots
//!
//! ## Thread Safety
//!
//! Containers, chunks and their signals live on the simulation thread. Only a
//! chunk's grid is shared with the worker pool, through its lock.

pub mod block;
pub mod chunk;
pub mod chunk_container;
pub mod collider;
pub mod generation;
pub mod persistence;
pub mod tasks;
