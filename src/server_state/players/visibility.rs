//! # Session Visibility
//!
//! Each session sees the world through a [`SessionVisibilityHandler`]. The handler
//! maps world identities (entity handles, chunk indices) to small per-session
//! network ids and turns world changes into the packets that keep the client's
//! copy consistent.
//!
//! ## Lifecycle of a tracked item
//!
//! ```text
//! not visible -> pending creation -> visible -> pending deletion -> not visible
//! ```
//!
//! An id is assigned when the item becomes pending creation and released only
//! after the deletion packet naming it has been produced. An item destroyed while
//! still pending creation was never announced, so its id is released at once.

use std::collections::{BTreeMap, BTreeSet};

use cgmath::Vector3;
use log::{trace, warn};

use crate::{
    core::IdAllocator,
    network::protocol::packets::{
        BlockUpdate, ChunkCreate, ChunkDestroy, ChunkId, ChunkUpdate, ControlledCharacter,
        EntitiesCreation, EntitiesDelete, EntitiesStateUpdate, EntityCreationData, EntityId,
        EntityState, EntityStateData, PlayerControlledData, VoxelLocation,
    },
    network::protocol::Packet,
    server_state::{
        entities::{EntityHandle, WorldEntity},
        environment::{EnvironmentEvent, EnvironmentId, Environments, ServerEnvironment},
        voxels::{
            block::BlockIndex,
            chunk::{ChunkIndices, VoxelChunk},
        },
    },
};

use super::player_inputs::InputIndex;

type EntityKey = (EnvironmentId, EntityHandle);
type ChunkKey = (EnvironmentId, ChunkIndices);

/// Read access to the world state a handler replicates.
pub trait VisibilitySource {
    /// Returns a live entity.
    fn entity(&self, environment: EnvironmentId, handle: EntityHandle) -> Option<&WorldEntity>;

    /// Returns a live chunk.
    fn chunk(&self, environment: EnvironmentId, indices: ChunkIndices) -> Option<&VoxelChunk>;
}

impl VisibilitySource for Environments {
    fn entity(&self, environment: EnvironmentId, handle: EntityHandle) -> Option<&WorldEntity> {
        self.get(&environment)?.entity(handle)
    }

    fn chunk(&self, environment: EnvironmentId, indices: ChunkIndices) -> Option<&VoxelChunk> {
        self.get(&environment)?.chunk(indices)
    }
}

/// Replication state of one session.
#[derive(Debug, Default)]
pub struct SessionVisibilityHandler {
    entity_ids: IdAllocator,
    chunk_ids: IdAllocator,
    entities: BTreeMap<EntityKey, EntityId>,
    entity_keys: BTreeMap<EntityId, EntityKey>,
    chunks: BTreeMap<ChunkKey, ChunkId>,
    chunk_keys: BTreeMap<ChunkId, ChunkKey>,
    created_entities: BTreeSet<EntityId>,
    created_chunks: BTreeSet<ChunkId>,
    deleted_entities: Vec<EntityId>,
    deleted_chunks: Vec<ChunkId>,
    chunk_updates: BTreeMap<ChunkId, Vec<BlockUpdate>>,
    controlled_entity: Option<EntityKey>,
    last_input_index: InputIndex,
}

impl SessionVisibilityHandler {
    /// Creates a handler that sees nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an entity for creation. No-op while it is already tracked.
    ///
    /// # Returns
    /// The network id of the entity, or `None` when the id space is exhausted.
    pub fn create_entity(&mut self, environment: EnvironmentId, handle: EntityHandle) -> Option<EntityId> {
        let key = (environment, handle);
        if let Some(id) = self.entities.get(&key) {
            return Some(*id);
        }

        let Some(id) = self.entity_ids.allocate() else {
            warn!("No network id left for entity {handle:?}");
            return None;
        };
        self.entities.insert(key, id);
        self.entity_keys.insert(id, key);
        self.created_entities.insert(id);
        Some(id)
    }

    /// Stops tracking an entity.
    pub fn destroy_entity(&mut self, environment: EnvironmentId, handle: EntityHandle) {
        let Some(id) = self.entities.remove(&(environment, handle)) else {
            return;
        };
        self.entity_keys.remove(&id);

        if self.created_entities.remove(&id) {
            self.entity_ids.release(id);
        } else {
            self.deleted_entities.push(id);
        }
    }

    /// Queues a chunk for creation. No-op while it is already tracked.
    ///
    /// # Returns
    /// The network id of the chunk, or `None` when the id space is exhausted.
    pub fn create_chunk(&mut self, environment: EnvironmentId, indices: ChunkIndices) -> Option<ChunkId> {
        let key = (environment, indices);
        if let Some(id) = self.chunks.get(&key) {
            return Some(*id);
        }

        let Some(id) = self.chunk_ids.allocate() else {
            warn!("No network id left for chunk {indices}");
            return None;
        };
        self.chunks.insert(key, id);
        self.chunk_keys.insert(id, key);
        self.created_chunks.insert(id);
        Some(id)
    }

    /// Stops tracking a chunk, dropping any block edits not yet sent for it.
    pub fn destroy_chunk(&mut self, environment: EnvironmentId, indices: ChunkIndices) {
        let Some(id) = self.chunks.remove(&(environment, indices)) else {
            return;
        };
        self.chunk_keys.remove(&id);
        self.chunk_updates.remove(&id);

        if self.created_chunks.remove(&id) {
            self.chunk_ids.release(id);
        } else {
            self.deleted_chunks.push(id);
        }
    }

    /// Records a block edit of a visible chunk.
    ///
    /// Edits of chunks pending creation are dropped: their content is read when
    /// the creation packet is built.
    pub fn update_block(
        &mut self,
        environment: EnvironmentId,
        indices: ChunkIndices,
        coords: Vector3<u32>,
        block: BlockIndex,
    ) {
        let Some(&id) = self.chunks.get(&(environment, indices)) else {
            return;
        };
        if self.created_chunks.contains(&id) {
            return;
        }
        let Some(voxel) = VoxelLocation::from_coords(coords) else {
            warn!("Voxel {coords:?} of chunk {indices} does not fit a voxel location");
            return;
        };
        self.chunk_updates
            .entry(id)
            .or_default()
            .push(BlockUpdate { voxel, block });
    }

    /// Applies one change of an environment the player is registered in.
    pub fn handle_environment_event(&mut self, environment: EnvironmentId, event: &EnvironmentEvent) {
        match event {
            EnvironmentEvent::EntityCreated(handle) => {
                self.create_entity(environment, *handle);
            }
            EnvironmentEvent::EntityDestroyed(handle) => self.destroy_entity(environment, *handle),
            EnvironmentEvent::ChunkCreated(indices) => {
                self.create_chunk(environment, *indices);
            }
            EnvironmentEvent::ChunkDestroyed(indices) => self.destroy_chunk(environment, *indices),
            EnvironmentEvent::BlockUpdated {
                indices,
                coords,
                block,
            } => self.update_block(environment, *indices, *coords, *block),
        }
    }

    /// Queues every chunk and replicated entity of `environment` for creation.
    pub fn create_environment(&mut self, environment: &ServerEnvironment) {
        let id = environment.id();
        for indices in environment.container().chunk_indices() {
            self.create_chunk(id, indices);
        }
        for (handle, _) in environment.replicated_entities() {
            self.create_entity(id, handle);
        }
    }

    /// Stops tracking everything that belongs to `environment`.
    pub fn destroy_environment(&mut self, environment: EnvironmentId) {
        let entities: Vec<EntityKey> = self
            .entities
            .keys()
            .filter(|(env, _)| *env == environment)
            .copied()
            .collect();
        for (env, handle) in entities {
            self.destroy_entity(env, handle);
        }

        let chunks: Vec<ChunkKey> = self
            .chunks
            .keys()
            .filter(|(env, _)| *env == environment)
            .copied()
            .collect();
        for (env, indices) in chunks {
            self.destroy_chunk(env, indices);
        }

        if matches!(self.controlled_entity, Some((env, _)) if env == environment) {
            self.controlled_entity = None;
        }
    }

    /// Sets the entity the session's player controls.
    pub fn set_controlled_entity(&mut self, controlled: Option<(EnvironmentId, EntityHandle)>) {
        self.controlled_entity = controlled;
    }

    /// Records the index of the last input applied for the player.
    pub fn update_last_input_index(&mut self, index: InputIndex) {
        self.last_input_index = index;
    }

    /// Index of the last input applied for the player.
    pub fn last_input_index(&self) -> InputIndex {
        self.last_input_index
    }

    /// Resolves a client-supplied chunk id. Chunks pending creation are not known
    /// to the client yet and do not resolve.
    pub fn chunk_by_network_id(&self, id: ChunkId) -> Option<(EnvironmentId, ChunkIndices)> {
        if self.created_chunks.contains(&id) {
            return None;
        }
        self.chunk_keys.get(&id).copied()
    }

    /// Network id of a tracked entity.
    pub fn entity_id(&self, environment: EnvironmentId, handle: EntityHandle) -> Option<EntityId> {
        self.entities.get(&(environment, handle)).copied()
    }

    /// Network id of a tracked chunk.
    pub fn chunk_id(&self, environment: EnvironmentId, indices: ChunkIndices) -> Option<ChunkId> {
        self.chunks.get(&(environment, indices)).copied()
    }

    /// Number of tracked entities, pending ones included.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of tracked chunks, pending ones included.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Builds this network tick's packets.
    ///
    /// Creations are flushed before deletions and updates so that every packet
    /// only names ids the client has been told about. Ids of flushed deletions
    /// are released last.
    ///
    /// # Arguments
    /// * `tick_index` - Current tick, stamped on entity packets
    /// * `source` - World state to read content and positions from
    ///
    /// # Returns
    /// The packets, in the order they must be sent
    pub fn dispatch(&mut self, tick_index: u16, source: &dyn VisibilitySource) -> Vec<Packet> {
        let mut packets = Vec::new();

        self.flush_chunk_creations(source, &mut packets);

        for chunk_id in &self.deleted_chunks {
            packets.push(Packet::from(ChunkDestroy { chunk_id: *chunk_id }));
        }

        for (chunk_id, updates) in std::mem::take(&mut self.chunk_updates) {
            packets.push(Packet::from(ChunkUpdate { chunk_id, updates }));
        }

        self.flush_entity_creations(tick_index, source, &mut packets);

        if !self.deleted_entities.is_empty() {
            packets.push(Packet::from(EntitiesDelete {
                tick_index,
                entities: self.deleted_entities.clone(),
            }));
        }

        if let Some(update) = self.state_update(tick_index, source) {
            packets.push(Packet::from(update));
        }

        for id in self.deleted_chunks.drain(..) {
            self.chunk_ids.release(id);
        }
        for id in self.deleted_entities.drain(..) {
            self.entity_ids.release(id);
        }

        packets
    }

    fn flush_chunk_creations(&mut self, source: &dyn VisibilitySource, packets: &mut Vec<Packet>) {
        for chunk_id in std::mem::take(&mut self.created_chunks) {
            let Some(&(environment, indices)) = self.chunk_keys.get(&chunk_id) else {
                continue;
            };
            let Some(chunk) = source.chunk(environment, indices) else {
                trace!("Chunk {indices} vanished before its creation was sent");
                self.chunks.remove(&(environment, indices));
                self.chunk_keys.remove(&chunk_id);
                self.chunk_ids.release(chunk_id);
                continue;
            };
            let size = chunk.size();
            packets.push(Packet::from(ChunkCreate {
                chunk_id,
                location: indices,
                size: [size.x, size.y, size.z],
                block_size: chunk.block_size(),
                content: chunk.content(),
            }));
        }
    }

    fn flush_entity_creations(
        &mut self,
        tick_index: u16,
        source: &dyn VisibilitySource,
        packets: &mut Vec<Packet>,
    ) {
        let mut created = Vec::new();
        for entity_id in std::mem::take(&mut self.created_entities) {
            let Some(&(environment, handle)) = self.entity_keys.get(&entity_id) else {
                continue;
            };
            let Some(entity) = source.entity(environment, handle) else {
                trace!("Entity {handle:?} vanished before its creation was sent");
                self.entities.remove(&(environment, handle));
                self.entity_keys.remove(&entity_id);
                self.entity_ids.release(entity_id);
                continue;
            };
            created.push(EntityCreationData {
                entity_id,
                initial_state: EntityState {
                    rotation: entity.rotation,
                    position: entity.position,
                },
                player_controlled: entity
                    .controlling_player
                    .map(|controlling_player| PlayerControlledData { controlling_player }),
            });
        }

        if !created.is_empty() {
            packets.push(Packet::from(EntitiesCreation {
                tick_index,
                entities: created,
            }));
        }
    }

    fn state_update(&self, tick_index: u16, source: &dyn VisibilitySource) -> Option<EntitiesStateUpdate> {
        let controlled_character = self
            .controlled_entity
            .and_then(|(environment, handle)| source.entity(environment, handle))
            .map(|entity| ControlledCharacter {
                camera_pitch: entity.camera_pitch,
                camera_yaw: entity.camera_yaw,
                reference_rotation: entity.rotation,
                position: entity.position,
            });

        let entities: Vec<EntityStateData> = self
            .entities
            .iter()
            .filter(|(key, _)| Some(**key) != self.controlled_entity)
            .filter_map(|(&(environment, handle), &entity_id)| {
                let entity = source.entity(environment, handle)?;
                entity.is_moving.then(|| EntityStateData {
                    entity_id,
                    state: EntityState {
                        rotation: entity.rotation,
                        position: entity.position,
                    },
                })
            })
            .collect();

        if controlled_character.is_none() && entities.is_empty() {
            return None;
        }

        Some(EntitiesStateUpdate {
            tick_index,
            last_input_index: self.last_input_index,
            controlled_character,
            entities,
        })
    }
}
