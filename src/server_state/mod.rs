//! # Server State Module
//!
//! The authoritative simulation: environments of voxel chunks and entities, the
//! players acting on them, and the [`ServerInstance`] that drives both at a fixed
//! tick rate.
//!
//! ## Key Components
//!
//! * `ServerInstance` - Fixed-timestep driver owning players, environments and sessions
//! * `environment` - One simulated space: a chunk container, its chunk proxies and entities
//! * `chunk_entities` - Collider-carrying proxies kept in sync with chunk edits in the background
//! * `players` - Per-player state and per-session replication
//! * `task_management` - Worker pool for collider rebuilds and saves
//! * `voxels` - Blocks, chunks, containers, generation and persistence
//!
//! ## Update Cycle
//!
//! ```text
//! update(elapsed)
//!   ├─ save clock
//!   ├─ poll sessions  (handshakes, edits, inputs)
//!   ├─ on_tick × N    (inputs → environments → on_network_tick)
//!   └─ flush sessions
//! ```
//!
//! Everything here runs on the simulation thread. Worker threads only ever read
//! chunk grids and write chunk files.

use std::{mem, sync::Arc, time::Duration};

use bitvec::prelude::BitVec;
use cgmath::{Quaternion, Vector3};
use log::{debug, info};
use thiserror::Error;

use crate::{
    application_state::config::ServerConfig,
    core::{SlotPool, StResource},
    network::{
        protocol::{
            packets::{ChatMessage, GameData, Nickname, PlayerData, PlayerJoin, PlayerLeave, CHAT_MAX_MESSAGE_LENGTH},
            BoundedString, Packet,
        },
        SessionManager, SessionOutbox,
    },
};

use entities::EntityHandle;
use environment::{EnvironmentId, Environments, ServerEnvironment};
use players::{PlayerIndex, ServerPlayer};
use task_management::TaskManager;
use voxels::{
    block::{BlockIndex, BlockLibrary},
    chunk::{ChunkError, ChunkIndices, DeformedMapping},
    chunk_container::ChunkContainer,
    collider::ColliderBuilder,
    generation::WorldGenerator,
    persistence::ChunkStorage,
    tasks::save_chunks_task::SaveChunksTask,
};

pub mod chunk_entities;
pub mod entities;
pub mod environment;
pub mod players;
pub mod task_management;
pub mod voxels;

/// Scheduling hint returned while the server is paused.
pub const PAUSED_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Name of the environment created at startup.
pub const PLANET_ENVIRONMENT_NAME: &str = "planet";

/// Errors raised while building or reshaping the world.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A chunk operation failed.
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    /// No environment has this id.
    #[error("environment {0} does not exist")]
    UnknownEnvironment(EnvironmentId),
}

/// Collaborators a server instance is built with.
pub struct ServerServices {
    /// Worker pool for collider rebuilds and saves.
    pub task_manager: StResource<TaskManager>,
    /// Where chunks are saved and loaded.
    pub storage: Arc<dyn ChunkStorage>,
    /// Fills fresh chunks.
    pub generator: Box<dyn WorldGenerator>,
    /// Builds chunk colliders.
    pub collider_builder: Arc<dyn ColliderBuilder>,
    /// Properties of every block.
    pub block_library: Arc<BlockLibrary>,
}

/// Fixed-timestep server driver.
pub struct ServerInstance {
    services: ServerServices,
    tick_duration: Duration,
    save_interval: Duration,
    pause_when_empty: bool,
    tick_accumulator: Duration,
    save_accumulator: Duration,
    tick_index: u16,
    players: SlotPool<ServerPlayer>,
    new_players: BitVec,
    disconnected_players: BitVec,
    retired_players: Vec<usize>,
    environments: Environments,
    next_environment_id: EnvironmentId,
    planet_id: EnvironmentId,
    spawn_position: Vector3<f32>,
    session_managers: Vec<SessionManager>,
}

impl ServerInstance {
    /// Builds the planet environment from generated content and any saved chunks.
    ///
    /// # Arguments
    /// * `config` - Validated server settings
    /// * `services` - Task pool, storage, generator and collider builder
    ///
    /// # Returns
    /// The instance, or the chunk error that prevented building the planet
    pub fn new(config: &ServerConfig, services: ServerServices) -> Result<Self, ServerError> {
        let chunk_size = Vector3::from(config.chunk_size);
        let [count_x, count_y, count_z] = config.planet_chunk_count;
        let low = |count: u32| -((count / 2) as i32);
        let first = ChunkIndices::new(low(count_x), low(count_y), low(count_z));

        let center_on = |first: i32, count: u32, extent: u32| {
            (first as f32 + count as f32 / 2.0) * extent as f32 * config.block_size
        };
        let center = Vector3::new(
            center_on(first.x, count_x, chunk_size.x),
            center_on(first.y, count_y, chunk_size.y),
            center_on(first.z, count_z, chunk_size.z),
        );

        let mut container = ChunkContainer::new(
            chunk_size,
            config.block_size,
            Arc::new(DeformedMapping::new(center, config.planet_corner_radius)),
        )?;
        for z in 0..count_z as i32 {
            for y in 0..count_y as i32 {
                for x in 0..count_x as i32 {
                    let indices = ChunkIndices::new(first.x + x, first.y + y, first.z + z);
                    container.add_chunk_with(indices, |blocks| {
                        services.generator.generate(indices, chunk_size, blocks)
                    })?;
                }
            }
        }

        let spawn_position = services.generator.spawn_position() * config.block_size;
        let mut instance = Self {
            services,
            tick_duration: config.tick_duration(),
            save_interval: config.save_interval(),
            pause_when_empty: config.pause_when_empty,
            tick_accumulator: Duration::ZERO,
            save_accumulator: Duration::ZERO,
            tick_index: 0,
            players: SlotPool::new(),
            new_players: BitVec::new(),
            disconnected_players: BitVec::new(),
            retired_players: Vec::new(),
            environments: Environments::new(),
            next_environment_id: 0,
            planet_id: 0,
            spawn_position,
            session_managers: Vec::new(),
        };

        instance.planet_id = instance.create_environment(PLANET_ENVIRONMENT_NAME, container);
        if let Some(planet) = instance.environments.get(&instance.planet_id) {
            planet.load_chunks(instance.services.storage.as_ref());
            planet.drain_events();
        }

        info!(
            "Planet ready with {} chunk(s) of {:?}, ticking at {:?}",
            count_x * count_y * count_z,
            config.chunk_size,
            instance.tick_duration
        );
        Ok(instance)
    }

    /// Adds a session manager polled and flushed by [`update`](Self::update).
    pub fn add_session_manager(&mut self, manager: SessionManager) {
        self.session_managers.push(manager);
    }

    /// Session managers of the instance.
    pub fn session_managers(&self) -> &[SessionManager] {
        &self.session_managers
    }

    /// Advances the server by `elapsed` wall-clock time.
    ///
    /// Runs as many whole ticks as fit in the accumulated time.
    ///
    /// # Returns
    /// How long the caller may wait before the next tick is due
    pub fn update(&mut self, elapsed: Duration) -> Duration {
        self.save_accumulator += elapsed;
        if self.save_accumulator >= self.save_interval {
            self.save_accumulator = Duration::ZERO;
            self.save();
        }

        // Saves keep flowing through the pool while ticks are paused.
        self.pump_tasks();
        self.poll_sessions();

        if self.pause_when_empty && self.players.is_empty() {
            self.tick_accumulator = Duration::ZERO;
            // Nobody to simulate for; still settle departures so their slots free up.
            self.on_network_tick();
            self.flush_sessions();
            return PAUSED_UPDATE_INTERVAL;
        }

        self.tick_accumulator += elapsed;
        while self.tick_accumulator >= self.tick_duration {
            self.tick_accumulator -= self.tick_duration;
            self.on_tick();
        }

        self.flush_sessions();
        self.tick_duration - self.tick_accumulator
    }

    fn pump_tasks(&self) {
        let mut task_manager = self.services.task_manager.get_mut();
        task_manager.process_completed_tasks();
        task_manager.process_queued_tasks();
    }

    fn poll_sessions(&mut self) {
        let mut managers = mem::take(&mut self.session_managers);
        for manager in &mut managers {
            manager.poll(self);
        }
        managers.append(&mut self.session_managers);
        self.session_managers = managers;
    }

    fn flush_sessions(&mut self) {
        for manager in &mut self.session_managers {
            manager.flush();
        }
    }

    /// Runs one simulation tick.
    pub fn on_tick(&mut self) {
        self.tick_index = self.tick_index.wrapping_add(1);
        self.pump_tasks();

        for (_, player) in self.players.iter_mut() {
            player.tick(&mut self.environments);
        }

        let dt = self.tick_duration.as_secs_f32();
        for environment in self.environments.values_mut() {
            environment.tick(dt);
        }

        self.on_network_tick();
    }

    /// Replicates this tick's changes to every player.
    pub fn on_network_tick(&mut self) {
        for (id, environment) in &self.environments {
            let events = environment.drain_events();
            if events.is_empty() {
                continue;
            }
            for (_, player) in self.players.iter_mut() {
                if !player.is_in_environment(*id) {
                    continue;
                }
                for event in &events {
                    player.visibility_mut().handle_environment_event(*id, event);
                }
            }
        }

        let disconnected = mem::take(&mut self.disconnected_players);
        for index in disconnected.iter_ones() {
            let leave = Packet::from(PlayerLeave {
                index: index as PlayerIndex,
            });
            for (_, player) in self.players.iter() {
                player.send(&leave);
            }
        }

        let joined = mem::take(&mut self.new_players);
        if joined.any() {
            let roster: Vec<PlayerData> = self
                .players
                .iter()
                .map(|(_, player)| PlayerData {
                    index: player.index(),
                    nickname: player.nickname().clone(),
                })
                .collect();

            for index in joined.iter_ones() {
                let Some(newcomer) = self.players.get(index) else {
                    continue;
                };
                let join = Packet::from(PlayerJoin {
                    index: newcomer.index(),
                    nickname: newcomer.nickname().clone(),
                });
                for (other_index, other) in self.players.iter() {
                    let other_is_new = joined.get(other_index).map(|bit| *bit).unwrap_or(false);
                    if !other_is_new {
                        other.send(&join);
                    }
                }
                newcomer.send(&Packet::from(GameData {
                    players: roster.clone(),
                    tick_index: self.tick_index,
                }));
            }
        }

        for (_, player) in self.players.iter_mut() {
            player.dispatch_visibility(self.tick_index, &self.environments);
        }

        for index in self.retired_players.drain(..) {
            self.players.release(index);
        }
    }

    /// Creates a player for an authenticated session.
    ///
    /// The slot is reserved first so the player is built knowing its own index.
    /// The player is registered in the planet and announced on the next network tick.
    ///
    /// # Returns
    /// The new player's index, or `None` when every index is taken
    pub fn create_player(
        &mut self,
        nickname: Nickname,
        outbox: StResource<SessionOutbox>,
    ) -> Option<PlayerIndex> {
        let slot = self.players.reserve();
        let Ok(index) = PlayerIndex::try_from(slot) else {
            self.players.release(slot);
            return None;
        };

        let mut player = ServerPlayer::new(index, nickname, outbox);
        if let Some(planet) = self.environments.get(&self.planet_id) {
            player.add_to_environment(planet);
        }
        info!("Player {index} ({}) joined", player.nickname());
        self.players.construct(slot, player);
        set_bit(&mut self.new_players, slot);
        Some(index)
    }

    /// Removes a player and its character.
    ///
    /// The slot stays retired until the end of the next network tick, so the
    /// index is not handed out again while packets may still name it.
    pub fn destroy_player(&mut self, index: PlayerIndex) -> bool {
        let slot = usize::from(index);
        let Some(mut player) = self.players.take(slot) else {
            return false;
        };
        player.destroy(&mut self.environments);
        info!("Player {index} ({}) left", player.nickname());

        set_bit(&mut self.disconnected_players, slot);
        if slot < self.new_players.len() {
            self.new_players.set(slot, false);
        }
        self.retired_players.push(slot);
        true
    }

    /// Spawns a fresh character for a player in the planet.
    pub fn respawn_player(&mut self, index: PlayerIndex) -> Option<EntityHandle> {
        let planet = self.planet_id;
        let position = self.spawn_position;
        let player = self.players.get_mut(usize::from(index))?;
        player.respawn(
            &mut self.environments,
            planet,
            position,
            Quaternion::new(1.0, 0.0, 0.0, 0.0),
        )
    }

    /// Writes a block. This is the single entry point for block edits.
    pub fn update_block(
        &mut self,
        environment: EnvironmentId,
        indices: ChunkIndices,
        coords: Vector3<u32>,
        block: BlockIndex,
    ) -> Result<(), ChunkError> {
        let environment = self
            .environments
            .get(&environment)
            .ok_or(ChunkError::Missing(indices))?;
        environment.update_block(indices, coords, block)
    }

    /// Sends a chat message to every player.
    pub fn broadcast_chat_message(
        &self,
        message: BoundedString<CHAT_MAX_MESSAGE_LENGTH>,
        sender: Option<PlayerIndex>,
    ) {
        match sender {
            Some(index) => info!("[chat] player {index}: {message}"),
            None => info!("[chat] {message}"),
        }
        let packet = Packet::from(ChatMessage {
            player_index: sender,
            message,
        });
        for (_, player) in self.players.iter() {
            player.send(&packet);
        }
    }

    /// Creates an environment around `container`.
    pub fn create_environment(&mut self, name: &str, container: ChunkContainer) -> EnvironmentId {
        let id = self.next_environment_id;
        self.next_environment_id += 1;
        let environment = ServerEnvironment::new(
            id,
            name,
            container,
            self.services.task_manager.clone(),
            self.services.collider_builder.clone(),
            self.services.block_library.clone(),
        );
        debug!("Created environment {id} ({name})");
        self.environments.insert(id, environment);
        id
    }

    /// Destroys an environment after unregistering every player from it.
    pub fn destroy_environment(&mut self, id: EnvironmentId) -> Result<(), ServerError> {
        if !self.environments.contains_key(&id) {
            return Err(ServerError::UnknownEnvironment(id));
        }
        for (_, player) in self.players.iter_mut() {
            player.remove_from_environment(id);
        }
        self.environments.remove(&id);
        debug!("Destroyed environment {id}");
        Ok(())
    }

    /// Registers a player in an environment.
    pub fn add_player_to_environment(
        &mut self,
        index: PlayerIndex,
        id: EnvironmentId,
    ) -> Result<(), ServerError> {
        let environment = self
            .environments
            .get(&id)
            .ok_or(ServerError::UnknownEnvironment(id))?;
        if let Some(player) = self.players.get_mut(usize::from(index)) {
            player.add_to_environment(environment);
        }
        Ok(())
    }

    /// Snapshots every environment's chunks and saves them in the background.
    pub fn save(&mut self) {
        let snapshots: Vec<_> = self
            .environments
            .values()
            .flat_map(ServerEnvironment::snapshot_chunks)
            .collect();
        if snapshots.is_empty() {
            return;
        }
        info!("Saving {} chunk(s)", snapshots.len());
        let task = SaveChunksTask::new(self.services.storage.clone(), snapshots);
        self.services.task_manager.get_mut().publish_task(Box::new(task));
    }

    /// Saves one last time and waits for background work to finish.
    pub fn shutdown(&mut self) {
        info!("Shutting down");
        self.save();
        self.services.task_manager.get_mut().flush();
        self.flush_sessions();
    }

    /// Index of the last tick run.
    pub fn tick_index(&self) -> u16 {
        self.tick_index
    }

    /// Duration of one tick.
    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Number of connected players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Returns a player.
    pub fn player(&self, index: PlayerIndex) -> Option<&ServerPlayer> {
        self.players.get(usize::from(index))
    }

    /// Returns a player mutably.
    pub fn player_mut(&mut self, index: PlayerIndex) -> Option<&mut ServerPlayer> {
        self.players.get_mut(usize::from(index))
    }

    /// Returns an environment.
    pub fn environment(&self, id: EnvironmentId) -> Option<&ServerEnvironment> {
        self.environments.get(&id)
    }

    /// Returns an environment mutably.
    pub fn environment_mut(&mut self, id: EnvironmentId) -> Option<&mut ServerEnvironment> {
        self.environments.get_mut(&id)
    }

    /// Id of the environment created at startup.
    pub fn planet_environment_id(&self) -> EnvironmentId {
        self.planet_id
    }

    /// Where characters spawn in the planet.
    pub fn spawn_position(&self) -> Vector3<f32> {
        self.spawn_position
    }

    /// Worker pool of the instance.
    pub fn task_manager(&self) -> &StResource<TaskManager> {
        &self.services.task_manager
    }

    /// Properties of every block.
    pub fn block_library(&self) -> &BlockLibrary {
        &self.services.block_library
    }
}

fn set_bit(bits: &mut BitVec, index: usize) {
    if bits.len() <= index {
        bits.resize(index + 1, false);
    }
    bits.set(index, true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        network::protocol::PacketAttributeTable,
        server_state::voxels::{
            collider::VoxelBoxColliderBuilder, generation::FlatWorldGenerator,
            persistence::InMemoryChunkStorage,
        },
    };

    fn config(pause_when_empty: bool) -> ServerConfig {
        ServerConfig {
            planet_chunk_count: [2, 1, 1],
            chunk_size: [4, 4, 4],
            planet_corner_radius: 0.0,
            pause_when_empty,
            save_interval_secs: 5,
            ..ServerConfig::default()
        }
    }

    fn instance_with(
        config: &ServerConfig,
        storage: Arc<InMemoryChunkStorage>,
    ) -> ServerInstance {
        instance_with_workers(config, storage, 0)
    }

    fn instance_with_workers(
        config: &ServerConfig,
        storage: Arc<InMemoryChunkStorage>,
        workers: usize,
    ) -> ServerInstance {
        let services = ServerServices {
            task_manager: StResource::new(TaskManager::new(workers)),
            storage,
            generator: Box::new(FlatWorldGenerator::new(1)),
            collider_builder: Arc::new(VoxelBoxColliderBuilder),
            block_library: Arc::new(BlockLibrary::standard()),
        };
        ServerInstance::new(config, services).unwrap()
    }

    fn outbox() -> StResource<SessionOutbox> {
        StResource::new(SessionOutbox::new(Arc::new(
            PacketAttributeTable::server_defaults(),
        )))
    }

    #[test]
    fn planet_is_built_from_generated_chunks() {
        let instance = instance_with(&config(true), Arc::new(InMemoryChunkStorage::new()));
        let planet = instance.environment(instance.planet_environment_id()).unwrap();
        assert_eq!(
            planet.container().chunk_indices(),
            vec![ChunkIndices::new(-1, 0, 0), ChunkIndices::new(0, 0, 0)]
        );
        assert_eq!(planet.chunk_entities().proxy_count(), 2);
    }

    #[test]
    fn runs_whole_ticks_and_returns_remaining_time() {
        let mut instance = instance_with(&config(false), Arc::new(InMemoryChunkStorage::new()));
        let tick = instance.tick_duration();

        let hint = instance.update(tick * 3 + tick / 3);
        assert_eq!(instance.tick_index(), 3);
        assert_eq!(hint, tick - tick / 3);

        let hint = instance.update(tick - tick / 3);
        assert_eq!(instance.tick_index(), 4);
        assert_eq!(hint, tick);
    }

    #[test]
    fn pauses_without_players() {
        let mut instance = instance_with(&config(true), Arc::new(InMemoryChunkStorage::new()));
        let tick = instance.tick_duration();
        assert_eq!(instance.update(tick * 10), PAUSED_UPDATE_INTERVAL);
        assert_eq!(instance.tick_index(), 0);

        instance.create_player(Nickname::new("Ann").unwrap(), outbox());
        instance.update(tick * 2);
        assert_eq!(instance.tick_index(), 2);
    }

    #[test]
    fn save_clock_is_independent_of_ticks() {
        let storage = Arc::new(InMemoryChunkStorage::new());
        let mut instance = instance_with(&config(true), storage.clone());

        instance.update(Duration::from_secs(3));
        instance.update(Duration::from_secs(3));
        instance.task_manager().get_mut().flush();
        assert_eq!(storage.save_count(), 1);
        assert_eq!(storage.chunk_count(), 2);
    }

    #[test]
    fn saves_reach_storage_while_paused() {
        let storage = Arc::new(InMemoryChunkStorage::new());
        let config = ServerConfig {
            save_interval_secs: 1,
            ..config(true)
        };
        let mut instance = instance_with_workers(&config, storage.clone(), 1);

        for _ in 0..5 {
            assert_eq!(instance.update(Duration::from_secs(1)), PAUSED_UPDATE_INTERVAL);
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while storage.save_count() < 5 && std::time::Instant::now() < deadline {
            instance.update(Duration::ZERO);
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(instance.tick_index(), 0);
        assert_eq!(storage.save_count(), 5);
        assert_eq!(storage.chunk_count(), 2);
        assert_eq!(instance.task_manager().get().queued(), 0);
    }

    #[test]
    fn player_slots_are_reused_only_after_network_tick() {
        let mut instance = instance_with(&config(false), Arc::new(InMemoryChunkStorage::new()));
        let first = instance.create_player(Nickname::new("Ann").unwrap(), outbox()).unwrap();
        assert!(instance.respawn_player(first).is_some());
        assert!(instance.destroy_player(first));

        let second = instance.create_player(Nickname::new("Ben").unwrap(), outbox()).unwrap();
        assert_ne!(first, second);

        instance.on_tick();
        let third = instance.create_player(Nickname::new("Cat").unwrap(), outbox()).unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn new_players_get_roster_and_others_get_join() {
        let mut instance = instance_with(&config(false), Arc::new(InMemoryChunkStorage::new()));
        let ann_outbox = outbox();
        instance.create_player(Nickname::new("Ann").unwrap(), ann_outbox.clone());
        instance.on_tick();
        ann_outbox.get_mut().take_packets();

        let ben_outbox = outbox();
        instance.create_player(Nickname::new("Ben").unwrap(), ben_outbox.clone());
        instance.on_tick();

        let ann_kinds: Vec<_> = ann_outbox.get_mut().take_packets().iter().map(|p| p.kind).collect();
        assert_eq!(ann_kinds, vec![crate::network::protocol::PacketKind::PlayerJoin]);

        let ben_packets = ben_outbox.get_mut().take_packets();
        let game_data = Packet::decode(&ben_packets[0].payload).unwrap();
        let Packet::GameData(game_data) = game_data else {
            panic!("expected game data first");
        };
        assert_eq!(game_data.players.len(), 2);
        assert_eq!(game_data.tick_index, 2);
    }
}
