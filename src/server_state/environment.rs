//! # Server Environment
//!
//! An environment is one simulated space: a chunk container, the proxies that
//! give its chunks colliders, and the entities living in it.
//!
//! ## Replication Events
//!
//! Everything a session may need to hear about (entities created or destroyed,
//! chunks added or removed, blocks edited) is recorded as an [`EnvironmentEvent`]
//! and kept until the server drains the queue during its network tick.

use std::{collections::BTreeMap, fmt, mem, sync::Arc};

use cgmath::{Quaternion, Vector3};
use log::debug;

use crate::core::{HandleMap, StResource};

use super::{
    chunk_entities::ChunkEntityManager,
    entities::{EntityHandle, WorldEntity},
    task_management::TaskManager,
    voxels::{
        block::{BlockIndex, BlockLibrary},
        chunk::{ChunkError, ChunkIndices, VoxelChunk},
        chunk_container::{ChunkAdded, ChunkContainer, ChunkRemoved, ChunkUpdated},
        collider::ColliderBuilder,
        persistence::{self, ChunkSnapshot, ChunkStorage},
    },
};

/// Identifies an environment in a server instance.
pub type EnvironmentId = u32;

/// Environments of a server instance, by id.
pub type Environments = BTreeMap<EnvironmentId, ServerEnvironment>;

/// Change that sessions may need to replicate.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentEvent {
    /// A replicated entity was created.
    EntityCreated(EntityHandle),
    /// A replicated entity was destroyed.
    EntityDestroyed(EntityHandle),
    /// A chunk was added to the container.
    ChunkCreated(ChunkIndices),
    /// A chunk was removed from the container.
    ChunkDestroyed(ChunkIndices),
    /// A block of a chunk changed.
    BlockUpdated {
        /// Chunk holding the block.
        indices: ChunkIndices,
        /// Voxel coordinates of the block.
        coords: Vector3<u32>,
        /// Block now stored there.
        block: BlockIndex,
    },
}

/// One simulated space.
pub struct ServerEnvironment {
    id: EnvironmentId,
    name: String,
    container: ChunkContainer,
    chunk_entities: ChunkEntityManager,
    entities: HandleMap<WorldEntity>,
    root: EntityHandle,
    events: StResource<Vec<EnvironmentEvent>>,
}

impl ServerEnvironment {
    /// Creates an environment around `container`.
    ///
    /// Chunks already in the container get proxies right away. Later container
    /// changes are picked up through its signals.
    ///
    /// # Arguments
    /// * `id` - Identifier of the environment in its server instance
    /// * `name` - Name used for persistence and logs
    /// * `container` - Chunks of the environment
    /// * `task_manager` - Worker pool running collider rebuilds
    /// * `collider_builder` - Collider geometry builder
    /// * `block_library` - Block properties
    pub fn new(
        id: EnvironmentId,
        name: impl Into<String>,
        container: ChunkContainer,
        task_manager: StResource<TaskManager>,
        collider_builder: Arc<dyn ColliderBuilder>,
        block_library: Arc<BlockLibrary>,
    ) -> Self {
        let mut entities = HandleMap::new();
        let root = entities.insert(WorldEntity::hidden(Vector3::new(0.0, 0.0, 0.0)));

        let chunk_entities = ChunkEntityManager::new(
            &container,
            task_manager,
            collider_builder,
            block_library,
            Some(root),
        );
        chunk_entities.fill_chunks(&container);

        let events = StResource::new(Vec::new());

        let sink = events.clone();
        container.on_chunk_added().connect(move |event: &ChunkAdded| {
            sink.get_mut().push(EnvironmentEvent::ChunkCreated(event.indices));
        });
        let sink = events.clone();
        container.on_chunk_removed().connect(move |event: &ChunkRemoved| {
            sink.get_mut().push(EnvironmentEvent::ChunkDestroyed(event.indices));
        });
        let sink = events.clone();
        container.on_chunk_updated().connect(move |event: &ChunkUpdated| {
            sink.get_mut().push(EnvironmentEvent::BlockUpdated {
                indices: event.indices,
                coords: event.coords,
                block: event.block,
            });
        });

        Self {
            id,
            name: name.into(),
            container,
            chunk_entities,
            entities,
            root,
            events,
        }
    }

    /// Identifier of the environment.
    pub fn id(&self) -> EnvironmentId {
        self.id
    }

    /// Name of the environment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advances the environment by `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        for (_, entity) in self.entities.iter_mut() {
            entity.integrate(dt);
        }
        self.chunk_entities.update();
    }

    /// Adds an entity.
    pub fn create_entity(&mut self, entity: WorldEntity) -> EntityHandle {
        let replicated = entity.replicated;
        let handle = self.entities.insert(entity);
        if replicated {
            self.events.get_mut().push(EnvironmentEvent::EntityCreated(handle));
        }
        handle
    }

    /// Spawns a character controlled by `player`.
    pub fn create_character(
        &mut self,
        position: Vector3<f32>,
        rotation: Quaternion<f32>,
        player: u16,
    ) -> EntityHandle {
        self.create_entity(WorldEntity::character(position, rotation, player))
    }

    /// Removes an entity. The root entity cannot be destroyed.
    pub fn destroy_entity(&mut self, handle: EntityHandle) -> Option<WorldEntity> {
        if handle == self.root {
            return None;
        }
        let entity = self.entities.remove(handle)?;
        if entity.replicated {
            self.events.get_mut().push(EnvironmentEvent::EntityDestroyed(handle));
        }
        Some(entity)
    }

    /// Returns an entity.
    pub fn entity(&self, handle: EntityHandle) -> Option<&WorldEntity> {
        self.entities.get(handle)
    }

    /// Returns an entity mutably.
    pub fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut WorldEntity> {
        self.entities.get_mut(handle)
    }

    /// Entities that sessions are told about.
    pub fn replicated_entities(&self) -> impl Iterator<Item = (EntityHandle, &WorldEntity)> {
        self.entities.iter().filter(|(_, entity)| entity.replicated)
    }

    /// Number of entities, root included.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Entity that owns the chunk proxies.
    pub fn root(&self) -> EntityHandle {
        self.root
    }

    /// Writes a block.
    pub fn update_block(
        &self,
        indices: ChunkIndices,
        coords: Vector3<u32>,
        block: BlockIndex,
    ) -> Result<(), ChunkError> {
        self.container.update_block(indices, coords, block)
    }

    /// Returns a chunk.
    pub fn chunk(&self, indices: ChunkIndices) -> Option<&VoxelChunk> {
        self.container.chunk(indices)
    }

    /// Chunks of the environment.
    pub fn container(&self) -> &ChunkContainer {
        &self.container
    }

    /// Chunks of the environment, for adding and removing chunks.
    pub fn container_mut(&mut self) -> &mut ChunkContainer {
        &mut self.container
    }

    /// Chunk proxies of the environment.
    pub fn chunk_entities(&self) -> &ChunkEntityManager {
        &self.chunk_entities
    }

    /// Takes the events recorded since the last call.
    pub fn drain_events(&self) -> Vec<EnvironmentEvent> {
        mem::take(&mut *self.events.get_mut())
    }

    /// Copies every chunk for saving.
    pub fn snapshot_chunks(&self) -> Vec<ChunkSnapshot> {
        self.container
            .chunks()
            .map(|chunk| ChunkSnapshot {
                container: self.name.clone(),
                indices: chunk.indices(),
                size: chunk.size(),
                blocks: chunk.content(),
            })
            .collect()
    }

    /// Replaces chunk content with saved data and rebuilds the affected colliders.
    ///
    /// Returns the number of chunks loaded.
    pub fn load_chunks(&self, storage: &dyn ChunkStorage) -> usize {
        let loaded = persistence::load_container(storage, &self.name, &self.container);
        for indices in &loaded {
            self.chunk_entities.request_rebuild(*indices);
        }
        debug!("Environment {} loaded {} chunk(s)", self.name, loaded.len());
        loaded.len()
    }
}

impl fmt::Debug for ServerEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEnvironment")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("chunks", &self.container.chunk_count())
            .field("entities", &self.entities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::voxels::{
        block::block_type::BlockType, chunk::CubeMapping, collider::VoxelBoxColliderBuilder,
        persistence::InMemoryChunkStorage,
    };

    fn environment(task_manager: &StResource<TaskManager>) -> ServerEnvironment {
        let container =
            ChunkContainer::new(Vector3::new(4, 4, 4), 1.0, Arc::new(CubeMapping)).unwrap();
        ServerEnvironment::new(
            0,
            "test",
            container,
            task_manager.clone(),
            Arc::new(VoxelBoxColliderBuilder),
            Arc::new(BlockLibrary::standard()),
        )
    }

    #[test]
    fn root_entity_is_hidden_and_permanent() {
        let task_manager = StResource::new(TaskManager::new(0));
        let mut env = environment(&task_manager);
        assert_eq!(env.replicated_entities().count(), 0);
        assert!(env.destroy_entity(env.root()).is_none());
        assert!(env.drain_events().is_empty());
    }

    #[test]
    fn container_and_entity_changes_become_events() {
        let task_manager = StResource::new(TaskManager::new(0));
        let mut env = environment(&task_manager);
        let indices = ChunkIndices::new(0, 0, 0);

        env.container_mut().add_chunk(indices).unwrap();
        env.update_block(indices, Vector3::new(1, 2, 3), BlockType::Wood.index())
            .unwrap();
        let entity = env.create_character(
            Vector3::new(0.0, 1.0, 0.0),
            Quaternion::new(1.0, 0.0, 0.0, 0.0),
            0,
        );
        env.destroy_entity(entity);

        assert_eq!(
            env.drain_events(),
            vec![
                EnvironmentEvent::ChunkCreated(indices),
                EnvironmentEvent::BlockUpdated {
                    indices,
                    coords: Vector3::new(1, 2, 3),
                    block: BlockType::Wood.index(),
                },
                EnvironmentEvent::EntityCreated(entity),
                EnvironmentEvent::EntityDestroyed(entity),
            ]
        );
        assert!(env.drain_events().is_empty());
    }

    #[test]
    fn tick_moves_entities_and_applies_colliders() {
        let task_manager = StResource::new(TaskManager::new(0));
        let mut env = environment(&task_manager);
        let indices = ChunkIndices::new(0, 0, 0);
        env.container_mut()
            .add_chunk_with(indices, |blocks| blocks[0] = BlockType::Stone.index())
            .unwrap();

        let entity = env.create_character(
            Vector3::new(0.0, 0.0, 0.0),
            Quaternion::new(1.0, 0.0, 0.0, 0.0),
            0,
        );
        if let Some(character) = env.entity_mut(entity) {
            character.velocity = Vector3::new(2.0, 0.0, 0.0);
        }

        task_manager.get_mut().flush();
        env.tick(0.5);

        assert_eq!(env.entity(entity).unwrap().position, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(env.chunk_entities().collider(indices).unwrap().box_count(), 1);
    }

    #[test]
    fn saved_chunks_reload_and_rebuild() {
        let task_manager = StResource::new(TaskManager::new(0));
        let storage = InMemoryChunkStorage::new();
        let indices = ChunkIndices::new(0, 0, 0);

        let mut original = environment(&task_manager);
        original.container_mut().add_chunk(indices).unwrap();
        original
            .update_block(indices, Vector3::new(0, 0, 0), BlockType::Planks.index())
            .unwrap();
        storage.save(&original.snapshot_chunks()).unwrap();

        let mut restored = environment(&task_manager);
        restored.container_mut().add_chunk(indices).unwrap();
        assert_eq!(restored.load_chunks(&storage), 1);
        assert_eq!(
            restored.chunk(indices).unwrap().block(Vector3::new(0, 0, 0)),
            Some(BlockType::Planks.index())
        );

        task_manager.get_mut().flush();
        restored.tick(0.0);
        assert_eq!(
            restored
                .chunk_entities()
                .collider(indices)
                .unwrap()
                .block_at(Vector3::new(0, 0, 0)),
            Some(BlockType::Planks.index())
        );
    }
}
