//! # Chunk Entity Manager
//!
//! This module keeps exactly one proxy entity per live chunk of a container and
//! keeps each proxy's collider eventually consistent with the chunk's grid.
//!
//! ## Rebuild Protocol
//!
//! - A new chunk gets a proxy and an immediate rebuild request.
//! - Block edits only mark the chunk as invalidated. Invalidations are coalesced
//!   and turned into at most one request per chunk per [`ChunkEntityManager::update`].
//! - Each request bumps the chunk's generation, cancels the job already in flight
//!   for that chunk and publishes a [`ColliderUpdateTask`] to the worker pool.
//! - `update` applies a finished job only if it was not cancelled, its generation
//!   is still the chunk's latest and its proxy still resolves.
//! - Removing a chunk cancels its job and forgets its invalidation, so nothing is
//!   ever applied to a proxy that no longer exists.
//!
//! ## Threading
//!
//! The manager lives on the simulation thread and reacts to container signals.
//! Workers only see the job state and a read handle to the chunk grid.

pub mod collider_update_task;

use std::{
    cell::RefCell,
    collections::{BTreeSet, HashMap},
    fmt,
    mem,
    rc::{Rc, Weak},
    sync::Arc,
};

use cgmath::Vector3;
use log::{debug, trace};

use crate::{
    core::{Handle, HandleMap, MtResource, Signal, StResource, SubscriptionId},
    server_state::{
        entities::EntityHandle,
        task_management::TaskManager,
        voxels::{
            block::{BlockIndex, BlockLibrary},
            chunk::ChunkIndices,
            chunk_container::{ChunkAdded, ChunkContainer, ChunkRemoved, ChunkUpdated},
            collider::{Collider, ColliderBuilder},
        },
    },
};

use collider_update_task::{ColliderUpdateJob, ColliderUpdateTask};

/// Physical stand-in for one chunk.
#[derive(Debug, Clone)]
pub struct ChunkProxy {
    /// Chunk the proxy stands for.
    pub indices: ChunkIndices,
    /// Container-space offset of the chunk.
    pub offset: Vector3<f32>,
    /// Entity owning the container, if any.
    pub parent: Option<EntityHandle>,
    /// Last applied collider. `None` until the first rebuild lands.
    pub collider: Option<Arc<Collider>>,
    /// Number of colliders applied to this proxy so far.
    pub collider_revision: u64,
}

#[derive(Clone)]
struct ChunkSource {
    grid: MtResource<Vec<BlockIndex>>,
    size: Vector3<u32>,
    block_size: f32,
}

#[derive(Default)]
struct ManagerState {
    proxies: HandleMap<ChunkProxy>,
    proxy_by_chunk: HashMap<ChunkIndices, Handle>,
    sources: HashMap<ChunkIndices, ChunkSource>,
    jobs: HashMap<ChunkIndices, Arc<ColliderUpdateJob>>,
    generations: HashMap<ChunkIndices, u64>,
    invalidated: BTreeSet<ChunkIndices>,
    applied_rebuilds: u64,
}

struct Shared {
    state: RefCell<ManagerState>,
    task_manager: StResource<TaskManager>,
    builder: Arc<dyn ColliderBuilder>,
    library: Arc<BlockLibrary>,
    owner: Option<EntityHandle>,
}

impl Shared {
    fn on_chunk_added(&self, event: &ChunkAdded) {
        {
            let mut state = self.state.borrow_mut();
            if state.proxy_by_chunk.contains_key(&event.indices) {
                return;
            }
            let proxy = state.proxies.insert(ChunkProxy {
                indices: event.indices,
                offset: event.offset,
                parent: self.owner,
                collider: None,
                collider_revision: 0,
            });
            state.proxy_by_chunk.insert(event.indices, proxy);
            state.sources.insert(
                event.indices,
                ChunkSource {
                    grid: event.grid.clone(),
                    size: event.size,
                    block_size: event.block_size,
                },
            );
        }
        self.request_rebuild(event.indices);
    }

    fn on_chunk_removed(&self, event: &ChunkRemoved) {
        let mut state = self.state.borrow_mut();
        if let Some(job) = state.jobs.remove(&event.indices) {
            job.cancel();
        }
        state.invalidated.remove(&event.indices);
        state.sources.remove(&event.indices);
        state.generations.remove(&event.indices);
        if let Some(proxy) = state.proxy_by_chunk.remove(&event.indices) {
            state.proxies.remove(proxy);
        }
    }

    fn on_chunk_updated(&self, event: &ChunkUpdated) {
        let mut state = self.state.borrow_mut();
        if state.proxy_by_chunk.contains_key(&event.indices) {
            state.invalidated.insert(event.indices);
        }
    }

    fn request_rebuild(&self, indices: ChunkIndices) -> bool {
        let task = {
            let mut state = self.state.borrow_mut();
            let Some(proxy) = state.proxy_by_chunk.get(&indices).copied() else {
                return false;
            };
            let Some(source) = state.sources.get(&indices).cloned() else {
                return false;
            };

            if let Some(previous) = state.jobs.remove(&indices) {
                previous.cancel();
                trace!("Superseded collider job {} for chunk {indices}", previous.generation());
            }

            let generation = state.generations.entry(indices).or_insert(0);
            *generation += 1;
            let job = Arc::new(ColliderUpdateJob::new(indices, proxy, *generation));
            state.jobs.insert(indices, job.clone());

            ColliderUpdateTask::new(
                job,
                source.grid,
                source.size,
                source.block_size,
                self.builder.clone(),
                self.library.clone(),
            )
        };

        self.task_manager.get_mut().publish_task(Box::new(task));
        true
    }

    fn apply_completed_jobs(&self) {
        let mut state = self.state.borrow_mut();
        let finished: Vec<ChunkIndices> = state
            .jobs
            .iter()
            .filter(|(_, job)| job.is_complete())
            .map(|(indices, _)| *indices)
            .collect();

        for indices in finished {
            let Some(job) = state.jobs.remove(&indices) else {
                continue;
            };
            if job.is_cancelled() {
                trace!("Dropped cancelled collider job for chunk {indices}");
                continue;
            }
            if state.generations.get(&indices) != Some(&job.generation()) {
                trace!("Dropped stale collider job for chunk {indices}");
                continue;
            }
            let Some(collider) = job.take_collider() else {
                continue;
            };
            let Some(proxy) = state.proxies.get_mut(job.proxy()) else {
                trace!("Dropped collider job for missing proxy of chunk {indices}");
                continue;
            };
            proxy.collider = Some(Arc::new(collider));
            proxy.collider_revision += 1;
            state.applied_rebuilds += 1;
        }
    }
}

/// Keeps one collider-carrying proxy per chunk of a container.
pub struct ChunkEntityManager {
    shared: Rc<Shared>,
    on_added: Signal<ChunkAdded>,
    on_removed: Signal<ChunkRemoved>,
    on_updated: Signal<ChunkUpdated>,
    subscriptions: Option<(SubscriptionId, SubscriptionId, SubscriptionId)>,
}

impl ChunkEntityManager {
    /// Creates a manager and subscribes it to `container`.
    ///
    /// Chunks already in the container are not picked up until
    /// [`fill_chunks`](Self::fill_chunks) is called.
    ///
    /// # Arguments
    /// * `container` - Container whose chunks get proxies
    /// * `task_manager` - Worker pool the rebuild jobs are published to
    /// * `builder` - Collider geometry builder
    /// * `library` - Block properties consulted by the builder
    /// * `owner` - Entity the proxies are parented to
    pub fn new(
        container: &ChunkContainer,
        task_manager: StResource<TaskManager>,
        builder: Arc<dyn ColliderBuilder>,
        library: Arc<BlockLibrary>,
        owner: Option<EntityHandle>,
    ) -> Self {
        let shared = Rc::new(Shared {
            state: RefCell::new(ManagerState::default()),
            task_manager,
            builder,
            library,
            owner,
        });

        let mut manager = Self {
            shared,
            on_added: container.on_chunk_added().clone(),
            on_removed: container.on_chunk_removed().clone(),
            on_updated: container.on_chunk_updated().clone(),
            subscriptions: None,
        };
        manager.connect();
        manager
    }

    fn connect(&mut self) {
        let weak: Weak<Shared> = Rc::downgrade(&self.shared);
        let added = self.on_added.connect(move |event: &ChunkAdded| {
            if let Some(shared) = weak.upgrade() {
                shared.on_chunk_added(event);
            }
        });

        let weak: Weak<Shared> = Rc::downgrade(&self.shared);
        let removed = self.on_removed.connect(move |event: &ChunkRemoved| {
            if let Some(shared) = weak.upgrade() {
                shared.on_chunk_removed(event);
            }
        });

        let weak: Weak<Shared> = Rc::downgrade(&self.shared);
        let updated = self.on_updated.connect(move |event: &ChunkUpdated| {
            if let Some(shared) = weak.upgrade() {
                shared.on_chunk_updated(event);
            }
        });

        self.subscriptions = Some((added, removed, updated));
    }

    /// Stops reacting to the container. Existing proxies are kept.
    pub fn disconnect(&mut self) {
        if let Some((added, removed, updated)) = self.subscriptions.take() {
            self.on_added.disconnect(added);
            self.on_removed.disconnect(removed);
            self.on_updated.disconnect(updated);
        }
    }

    /// Creates proxies (and initial rebuilds) for chunks that existed before
    /// the manager.
    pub fn fill_chunks(&self, container: &ChunkContainer) {
        for chunk in container.chunks() {
            self.shared.on_chunk_added(&ChunkAdded::from_chunk(chunk));
        }
        debug!("Chunk entity manager tracks {} chunk(s)", self.proxy_count());
    }

    /// Runs one update cycle: applies finished rebuilds, then issues one rebuild
    /// per chunk invalidated since the last cycle.
    pub fn update(&self) {
        self.shared.apply_completed_jobs();

        let invalidated = mem::take(&mut self.shared.state.borrow_mut().invalidated);
        for indices in invalidated {
            self.shared.request_rebuild(indices);
        }
    }

    /// Issues a rebuild for one chunk right away, superseding any job in flight.
    ///
    /// Returns `false` when the chunk has no proxy.
    pub fn request_rebuild(&self, indices: ChunkIndices) -> bool {
        self.shared.request_rebuild(indices)
    }

    /// Returns a copy of the proxy of a chunk.
    pub fn proxy(&self, indices: ChunkIndices) -> Option<ChunkProxy> {
        let state = self.shared.state.borrow();
        let handle = state.proxy_by_chunk.get(&indices)?;
        state.proxies.get(*handle).cloned()
    }

    /// Collider currently applied to a chunk's proxy.
    pub fn collider(&self, indices: ChunkIndices) -> Option<Arc<Collider>> {
        self.proxy(indices).and_then(|proxy| proxy.collider)
    }

    /// Number of live proxies.
    pub fn proxy_count(&self) -> usize {
        self.shared.state.borrow().proxies.len()
    }

    /// Total number of colliders applied since creation.
    pub fn applied_rebuilds(&self) -> u64 {
        self.shared.state.borrow().applied_rebuilds
    }

    /// Number of rebuild jobs issued but not yet integrated.
    pub fn pending_jobs(&self) -> usize {
        self.shared.state.borrow().jobs.len()
    }

    /// Number of chunks waiting for the next update cycle.
    pub fn invalidated_count(&self) -> usize {
        self.shared.state.borrow().invalidated.len()
    }
}

impl Drop for ChunkEntityManager {
    fn drop(&mut self) {
        self.disconnect();
        for job in self.shared.state.borrow().jobs.values() {
            job.cancel();
        }
    }
}

impl fmt::Debug for ChunkEntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkEntityManager")
            .field("proxies", &self.proxy_count())
            .field("pending_jobs", &self.pending_jobs())
            .field("applied_rebuilds", &self.applied_rebuilds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::voxels::{
        block::block_type::BlockType,
        chunk::CubeMapping,
        collider::VoxelBoxColliderBuilder,
    };

    struct Fixture {
        container: ChunkContainer,
        task_manager: StResource<TaskManager>,
        manager: ChunkEntityManager,
    }

    fn fixture() -> Fixture {
        let container =
            ChunkContainer::new(Vector3::new(4, 4, 4), 1.0, Arc::new(CubeMapping)).unwrap();
        let task_manager = StResource::new(TaskManager::new(0));
        let manager = ChunkEntityManager::new(
            &container,
            task_manager.clone(),
            Arc::new(VoxelBoxColliderBuilder),
            Arc::new(BlockLibrary::standard()),
            None,
        );
        Fixture {
            container,
            task_manager,
            manager,
        }
    }

    const CHUNK: ChunkIndices = ChunkIndices::new(0, 0, 0);

    #[test]
    fn new_chunks_get_a_proxy_and_an_initial_collider() {
        let mut fx = fixture();
        fx.container
            .add_chunk_with(CHUNK, |blocks| blocks[0] = BlockType::Stone.index())
            .unwrap();
        assert_eq!(fx.manager.proxy_count(), 1);
        assert_eq!(fx.manager.pending_jobs(), 1);
        assert!(fx.manager.collider(CHUNK).is_none());

        fx.task_manager.get_mut().flush();
        fx.manager.update();

        let proxy = fx.manager.proxy(CHUNK).unwrap();
        assert_eq!(proxy.collider_revision, 1);
        assert_eq!(proxy.collider.unwrap().box_count(), 1);
        assert_eq!(fx.manager.pending_jobs(), 0);
    }

    #[test]
    fn second_request_supersedes_the_first() {
        let mut fx = fixture();
        fx.container.add_chunk(CHUNK).unwrap();
        fx.task_manager.get_mut().flush();
        fx.manager.update();
        let before = fx.manager.applied_rebuilds();

        fx.container
            .update_block(CHUNK, Vector3::new(1, 1, 1), BlockType::Dirt.index())
            .unwrap();
        assert!(fx.manager.request_rebuild(CHUNK));
        fx.container
            .update_block(CHUNK, Vector3::new(1, 1, 1), BlockType::Glass.index())
            .unwrap();
        assert!(fx.manager.request_rebuild(CHUNK));

        fx.task_manager.get_mut().flush();
        fx.manager.update();

        assert_eq!(fx.manager.applied_rebuilds(), before + 1);
        let collider = fx.manager.collider(CHUNK).unwrap();
        assert_eq!(
            collider.block_at(Vector3::new(1, 1, 1)),
            Some(BlockType::Glass.index())
        );
    }

    #[test]
    fn edits_are_coalesced_per_update_cycle() {
        let mut fx = fixture();
        fx.container.add_chunk(CHUNK).unwrap();
        fx.task_manager.get_mut().flush();
        fx.manager.update();

        for x in 0..4 {
            fx.container
                .update_block(CHUNK, Vector3::new(x, 0, 0), BlockType::Stone.index())
                .unwrap();
        }
        assert_eq!(fx.manager.invalidated_count(), 1);
        assert_eq!(fx.manager.pending_jobs(), 0);

        fx.manager.update();
        assert_eq!(fx.manager.invalidated_count(), 0);
        assert_eq!(fx.manager.pending_jobs(), 1);
        assert_eq!(fx.task_manager.get().queued(), 1);

        fx.task_manager.get_mut().flush();
        fx.manager.update();
        assert_eq!(fx.manager.collider(CHUNK).unwrap().box_count(), 4);
    }

    #[test]
    fn removing_a_chunk_mid_rebuild_applies_nothing() {
        let mut fx = fixture();
        fx.container.add_chunk(CHUNK).unwrap();
        assert!(fx.container.remove_chunk(CHUNK));
        assert_eq!(fx.manager.proxy_count(), 0);
        assert_eq!(fx.manager.pending_jobs(), 0);

        fx.task_manager.get_mut().flush();
        fx.manager.update();

        assert_eq!(fx.manager.applied_rebuilds(), 0);
        assert!(fx.manager.proxy(CHUNK).is_none());
    }

    #[test]
    fn fill_chunks_picks_up_existing_chunks() {
        let mut container =
            ChunkContainer::new(Vector3::new(2, 2, 2), 1.0, Arc::new(CubeMapping)).unwrap();
        container.add_chunk(ChunkIndices::new(0, 0, 0)).unwrap();
        container.add_chunk(ChunkIndices::new(1, 0, 0)).unwrap();

        let task_manager = StResource::new(TaskManager::new(0));
        let manager = ChunkEntityManager::new(
            &container,
            task_manager.clone(),
            Arc::new(VoxelBoxColliderBuilder),
            Arc::new(BlockLibrary::standard()),
            None,
        );
        assert_eq!(manager.proxy_count(), 0);
        manager.fill_chunks(&container);
        assert_eq!(manager.proxy_count(), 2);
        assert_eq!(
            manager.proxy(ChunkIndices::new(1, 0, 0)).unwrap().offset,
            Vector3::new(2.0, 0.0, 0.0)
        );
    }

    #[test]
    fn disconnected_manager_ignores_the_container() {
        let mut fx = fixture();
        fx.manager.disconnect();
        fx.container.add_chunk(CHUNK).unwrap();
        assert_eq!(fx.manager.proxy_count(), 0);
        assert_eq!(fx.container.on_chunk_added().subscriber_count(), 0);
    }
}
