//! # Collider Update Task
//!
//! Background rebuild of one chunk's collider. The task never touches a proxy:
//! it leaves its collider in the shared [`ColliderUpdateJob`] and the owning
//! [`ChunkEntityManager`](super::ChunkEntityManager) decides, on the simulation
//! thread, whether the result is still worth applying.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use cgmath::Vector3;

use crate::{
    core::{Handle, MtResource},
    server_state::{
        task_management::task::{CancellationToken, Task, TaskResult},
        voxels::{
            block::{BlockIndex, BlockLibrary},
            chunk::{ChunkGridView, ChunkIndices},
            collider::{Collider, ColliderBuilder},
        },
    },
};

/// Shared state of one rebuild request.
#[derive(Debug)]
pub struct ColliderUpdateJob {
    indices: ChunkIndices,
    proxy: Handle,
    generation: u64,
    token: CancellationToken,
    completions: AtomicUsize,
    collider: Mutex<Option<Collider>>,
}

impl ColliderUpdateJob {
    /// Creates the job for a rebuild request.
    pub fn new(indices: ChunkIndices, proxy: Handle, generation: u64) -> Self {
        Self {
            indices,
            proxy,
            generation,
            token: CancellationToken::new(),
            completions: AtomicUsize::new(0),
            collider: Mutex::new(None),
        }
    }

    /// Chunk being rebuilt.
    pub fn indices(&self) -> ChunkIndices {
        self.indices
    }

    /// Proxy that should receive the collider.
    pub fn proxy(&self) -> Handle {
        self.proxy
    }

    /// Per-chunk request counter value this job was issued with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Marks the job as superseded. Never blocks.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the job was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `true` once the worker is done with the job, whatever the outcome.
    pub fn is_complete(&self) -> bool {
        self.completions.load(Ordering::Acquire) > 0
    }

    /// Takes the collider produced by the job, if any.
    pub fn take_collider(&self) -> Option<Collider> {
        self.collider
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn publish(&self, collider: Collider) {
        *self.collider.lock().unwrap_or_else(PoisonError::into_inner) = Some(collider);
    }

    fn complete(&self) {
        self.completions.fetch_add(1, Ordering::AcqRel);
    }
}

/// A task that builds a chunk collider from the chunk's grid.
pub struct ColliderUpdateTask {
    job: Arc<ColliderUpdateJob>,
    grid: MtResource<Vec<BlockIndex>>,
    size: Vector3<u32>,
    block_size: f32,
    builder: Arc<dyn ColliderBuilder>,
    library: Arc<BlockLibrary>,
}

impl ColliderUpdateTask {
    /// Creates a new collider update task.
    ///
    /// # Arguments
    /// * `job` - Shared job state, also held by the manager
    /// * `grid` - Read handle to the chunk grid
    /// * `size` - Dimensions of the chunk in voxels
    /// * `block_size` - Edge length of one voxel
    /// * `builder` - Geometry builder
    /// * `library` - Block properties consulted by the builder
    pub fn new(
        job: Arc<ColliderUpdateJob>,
        grid: MtResource<Vec<BlockIndex>>,
        size: Vector3<u32>,
        block_size: f32,
        builder: Arc<dyn ColliderBuilder>,
        library: Arc<BlockLibrary>,
    ) -> Self {
        ColliderUpdateTask {
            job,
            grid,
            size,
            block_size,
            builder,
            library,
        }
    }
}

impl Task for ColliderUpdateTask {
    fn process(&self) -> Box<dyn TaskResult> {
        if !self.job.is_cancelled() {
            let collider = {
                let blocks = self.grid.get();
                let view = ChunkGridView {
                    size: self.size,
                    block_size: self.block_size,
                    blocks: &blocks,
                };
                self.builder.build(&view, &self.library)
            };

            if !self.job.is_cancelled() {
                self.job.publish(collider);
            }
        }
        self.job.complete();

        Box::new(ColliderUpdateTaskResult)
    }
}

/// Completion marker. The manager picks the collider up from the job itself.
pub struct ColliderUpdateTaskResult;

impl TaskResult for ColliderUpdateTaskResult {
    fn handle_result(self: Box<Self>) -> Vec<Box<dyn Task>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HandleMap;
    use crate::server_state::voxels::{block::block_type::BlockType, collider::VoxelBoxColliderBuilder};

    fn task_for(job: &Arc<ColliderUpdateJob>, grid: &MtResource<Vec<BlockIndex>>) -> ColliderUpdateTask {
        ColliderUpdateTask::new(
            job.clone(),
            grid.clone(),
            Vector3::new(2, 1, 1),
            1.0,
            Arc::new(VoxelBoxColliderBuilder),
            Arc::new(BlockLibrary::standard()),
        )
    }

    fn proxy_handle() -> Handle {
        HandleMap::new().insert(())
    }

    #[test]
    fn completed_job_holds_the_collider() {
        let grid = MtResource::new(vec![BlockType::Stone.index(), BlockType::Empty.index()]);
        let job = Arc::new(ColliderUpdateJob::new(ChunkIndices::new(0, 0, 0), proxy_handle(), 1));

        task_for(&job, &grid).process();

        assert!(job.is_complete());
        let collider = job.take_collider().unwrap();
        assert_eq!(collider.box_count(), 1);
        assert_eq!(job.take_collider(), None);
    }

    #[test]
    fn cancelled_job_completes_without_a_collider() {
        let grid = MtResource::new(vec![BlockType::Stone.index(); 2]);
        let job = Arc::new(ColliderUpdateJob::new(ChunkIndices::new(0, 0, 0), proxy_handle(), 1));
        job.cancel();

        task_for(&job, &grid).process();

        assert!(job.is_complete());
        assert_eq!(job.take_collider(), None);
    }
}
