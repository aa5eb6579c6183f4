//! # Save Chunks Task
//!
//! This module defines the `SaveChunksTask`, which writes chunk snapshots to a
//! [`ChunkStorage`] on a worker thread. Snapshots are taken on the simulation
//! thread beforehand, so the task never touches a live chunk.

use std::sync::Arc;

use log::{error, info};

use crate::server_state::{
    task_management::task::{Task, TaskResult},
    voxels::persistence::{ChunkSnapshot, ChunkStorage, PersistenceError},
};

/// A task that persists a batch of chunk snapshots.
pub struct SaveChunksTask {
    /// Where the chunks are written
    storage: Arc<dyn ChunkStorage>,
    /// Chunk content captured at save time
    snapshots: Vec<ChunkSnapshot>,
}

impl SaveChunksTask {
    /// Creates a new save task.
    ///
    /// # Arguments
    /// * `storage` - Storage the snapshots are written to
    /// * `snapshots` - Chunk content captured on the simulation thread
    pub fn new(storage: Arc<dyn ChunkStorage>, snapshots: Vec<ChunkSnapshot>) -> Self {
        SaveChunksTask { storage, snapshots }
    }
}

impl Task for SaveChunksTask {
    fn process(&self) -> Box<dyn TaskResult> {
        Box::new(SaveChunksTaskResult {
            requested: self.snapshots.len(),
            outcome: self.storage.save(&self.snapshots),
        })
    }
}

/// Outcome of a save, reported on the simulation thread.
pub struct SaveChunksTaskResult {
    requested: usize,
    outcome: Result<usize, PersistenceError>,
}

impl TaskResult for SaveChunksTaskResult {
    fn handle_result(self: Box<Self>) -> Vec<Box<dyn Task>> {
        match self.outcome {
            Ok(written) => info!("Saved {written}/{} chunk(s)", self.requested),
            Err(save_error) => error!("Chunk save failed: {save_error}"),
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::{
        task_management::TaskManager,
        voxels::{chunk::ChunkIndices, persistence::InMemoryChunkStorage},
    };
    use cgmath::Vector3;

    #[test]
    fn snapshots_reach_the_storage_on_flush() {
        let storage = Arc::new(InMemoryChunkStorage::new());
        let mut task_manager = TaskManager::new(0);

        let snapshots = (0..3)
            .map(|x| ChunkSnapshot {
                container: "planet".to_string(),
                indices: ChunkIndices::new(x, 0, 0),
                size: Vector3::new(1, 1, 1),
                blocks: vec![2],
            })
            .collect();
        task_manager.publish_task(Box::new(SaveChunksTask::new(storage.clone(), snapshots)));
        assert_eq!(storage.save_count(), 0);

        task_manager.flush();
        assert_eq!(storage.save_count(), 1);
        assert_eq!(storage.chunk_count(), 3);
    }
}
