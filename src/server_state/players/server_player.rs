//! Server-side state of one connected player.

use std::collections::{BTreeSet, VecDeque};

use cgmath::{Quaternion, Vector3};
use log::debug;

use crate::{
    core::StResource,
    network::{
        protocol::{packets::Nickname, Packet},
        session::SessionOutbox,
    },
    server_state::{
        entities::{EntityHandle, WorldEntity},
        environment::{EnvironmentId, Environments, ServerEnvironment},
    },
};

use super::{
    player_inputs::PlayerInputs,
    visibility::{SessionVisibilityHandler, VisibilitySource},
    PlayerIndex,
};

/// Number of input frames kept before the oldest is dropped.
pub const MAX_QUEUED_INPUTS: usize = 64;

/// A player owned by the server's player pool.
#[derive(Debug)]
pub struct ServerPlayer {
    index: PlayerIndex,
    nickname: Nickname,
    outbox: StResource<SessionOutbox>,
    controlled_entity: Option<(EnvironmentId, EntityHandle)>,
    inputs: VecDeque<PlayerInputs>,
    visibility: SessionVisibilityHandler,
    environments: BTreeSet<EnvironmentId>,
}

impl ServerPlayer {
    /// Creates a player with its pool index already known.
    ///
    /// # Arguments
    /// * `index` - Slot of the player in the pool
    /// * `nickname` - Validated nickname
    /// * `outbox` - Outgoing queue of the player's session
    pub fn new(index: PlayerIndex, nickname: Nickname, outbox: StResource<SessionOutbox>) -> Self {
        Self {
            index,
            nickname,
            outbox,
            controlled_entity: None,
            inputs: VecDeque::new(),
            visibility: SessionVisibilityHandler::new(),
            environments: BTreeSet::new(),
        }
    }

    /// Index of the player in the pool.
    pub fn index(&self) -> PlayerIndex {
        self.index
    }

    /// Nickname of the player.
    pub fn nickname(&self) -> &Nickname {
        &self.nickname
    }

    /// Character the player controls, if spawned.
    pub fn controlled_entity(&self) -> Option<(EnvironmentId, EntityHandle)> {
        self.controlled_entity
    }

    /// Replication state of the player's session.
    pub fn visibility(&self) -> &SessionVisibilityHandler {
        &self.visibility
    }

    /// Replication state of the player's session.
    pub fn visibility_mut(&mut self) -> &mut SessionVisibilityHandler {
        &mut self.visibility
    }

    /// Environments the player is registered in.
    pub fn environments(&self) -> impl Iterator<Item = EnvironmentId> + '_ {
        self.environments.iter().copied()
    }

    /// Returns `true` while the player is registered in `environment`.
    pub fn is_in_environment(&self, environment: EnvironmentId) -> bool {
        self.environments.contains(&environment)
    }

    /// Number of input frames waiting to be applied.
    pub fn queued_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Queues one frame of input. The oldest frame is dropped once the queue is full.
    pub fn push_inputs(&mut self, inputs: PlayerInputs) {
        if self.inputs.len() >= MAX_QUEUED_INPUTS {
            if let Some(dropped) = self.inputs.pop_front() {
                debug!(
                    "Input queue of player {} is full, dropping input {}",
                    self.index, dropped.index
                );
            }
        }
        self.inputs.push_back(inputs);
    }

    /// Applies the oldest queued input to the controlled character.
    pub fn tick(&mut self, environments: &mut Environments) {
        let Some(inputs) = self.inputs.pop_front() else {
            return;
        };

        if let Some((environment, handle)) = self.controlled_entity {
            if let Some(entity) = environments
                .get_mut(&environment)
                .and_then(|env| env.entity_mut(handle))
            {
                entity.apply_inputs(&inputs);
            }
        }
        self.visibility.update_last_input_index(inputs.index);
    }

    /// Replaces the controlled character with a fresh one in `environment`.
    ///
    /// # Returns
    /// The new character, or `None` when the environment does not exist
    pub fn respawn(
        &mut self,
        environments: &mut Environments,
        environment: EnvironmentId,
        position: Vector3<f32>,
        rotation: Quaternion<f32>,
    ) -> Option<EntityHandle> {
        self.destroy(environments);

        let env = environments.get_mut(&environment)?;
        let handle = env.create_entity(WorldEntity::character(position, rotation, self.index));
        self.controlled_entity = Some((environment, handle));
        self.visibility.set_controlled_entity(self.controlled_entity);
        Some(handle)
    }

    /// Removes the controlled character from the world.
    pub fn destroy(&mut self, environments: &mut Environments) {
        if let Some((environment, handle)) = self.controlled_entity.take() {
            if let Some(env) = environments.get_mut(&environment) {
                env.destroy_entity(handle);
            }
        }
        self.visibility.set_controlled_entity(None);
    }

    /// Registers the player in an environment and queues its content for creation.
    pub fn add_to_environment(&mut self, environment: &ServerEnvironment) {
        if self.environments.insert(environment.id()) {
            self.visibility.create_environment(environment);
        }
    }

    /// Unregisters the player from an environment and forgets its content.
    pub fn remove_from_environment(&mut self, environment: EnvironmentId) {
        if self.environments.remove(&environment) {
            self.visibility.destroy_environment(environment);
            if matches!(self.controlled_entity, Some((env, _)) if env == environment) {
                self.controlled_entity = None;
            }
        }
    }

    /// Queues a packet on the player's session.
    pub fn send(&self, packet: &Packet) {
        self.outbox.get_mut().send(packet);
    }

    /// Builds and queues this network tick's replication packets.
    pub fn dispatch_visibility(&mut self, tick_index: u16, source: &dyn VisibilitySource) {
        let packets = self.visibility.dispatch(tick_index, source);
        let mut outbox = self.outbox.get_mut();
        for packet in &packets {
            outbox.send(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        network::protocol::{PacketAttributeTable, PacketKind},
        server_state::{
            task_management::TaskManager,
            voxels::{
                block::BlockLibrary, chunk::CubeMapping, chunk_container::ChunkContainer,
                collider::VoxelBoxColliderBuilder,
            },
        },
    };

    fn setup() -> (StResource<TaskManager>, Environments, ServerPlayer) {
        let task_manager = StResource::new(TaskManager::new(0));
        let container =
            ChunkContainer::new(Vector3::new(2, 2, 2), 1.0, Arc::new(CubeMapping)).unwrap();
        let environment = ServerEnvironment::new(
            0,
            "test",
            container,
            task_manager.clone(),
            Arc::new(VoxelBoxColliderBuilder),
            Arc::new(BlockLibrary::standard()),
        );
        let mut environments = Environments::new();
        environments.insert(0, environment);

        let outbox = StResource::new(SessionOutbox::new(Arc::new(
            PacketAttributeTable::server_defaults(),
        )));
        let player = ServerPlayer::new(3, Nickname::new("Alice").unwrap(), outbox);
        (task_manager, environments, player)
    }

    fn identity() -> Quaternion<f32> {
        Quaternion::new(1.0, 0.0, 0.0, 0.0)
    }

    #[test]
    fn inputs_are_applied_one_per_tick_oldest_first() {
        let (_tasks, mut environments, mut player) = setup();
        let handle = player
            .respawn(&mut environments, 0, Vector3::new(0.0, 0.0, 0.0), identity())
            .unwrap();

        for index in 0..3 {
            player.push_inputs(PlayerInputs {
                index,
                flags: PlayerInputs::MOVE_RIGHT,
                pitch: 0.0,
                yaw: 0.0,
            });
        }

        player.tick(&mut environments);
        assert_eq!(player.visibility().last_input_index(), 0);
        assert_eq!(player.queued_inputs(), 2);
        let entity = environments[&0].entity(handle).unwrap();
        assert!(entity.velocity.x > 0.0);
    }

    #[test]
    fn full_queue_drops_oldest_input() {
        let (_tasks, mut environments, mut player) = setup();
        for index in 0..=MAX_QUEUED_INPUTS {
            player.push_inputs(PlayerInputs {
                index: index as u8,
                ..PlayerInputs::default()
            });
        }
        assert_eq!(player.queued_inputs(), MAX_QUEUED_INPUTS);

        player.tick(&mut environments);
        assert_eq!(player.visibility().last_input_index(), 1);
    }

    #[test]
    fn respawn_replaces_previous_character() {
        let (_tasks, mut environments, mut player) = setup();
        let first = player
            .respawn(&mut environments, 0, Vector3::new(0.0, 0.0, 0.0), identity())
            .unwrap();
        let second = player
            .respawn(&mut environments, 0, Vector3::new(1.0, 0.0, 0.0), identity())
            .unwrap();

        assert!(environments[&0].entity(first).is_none());
        assert_eq!(
            environments[&0].entity(second).unwrap().controlling_player,
            Some(3)
        );
        assert_eq!(player.controlled_entity(), Some((0, second)));

        player.destroy(&mut environments);
        assert!(environments[&0].entity(second).is_none());
        assert_eq!(player.controlled_entity(), None);
    }

    #[test]
    fn joining_environment_queues_its_content() {
        let (_tasks, mut environments, mut player) = setup();
        let env = environments.get_mut(&0).unwrap();
        env.container_mut()
            .add_chunk(crate::server_state::voxels::chunk::ChunkIndices::new(0, 0, 0))
            .unwrap();
        env.create_entity(WorldEntity::new(Vector3::new(0.0, 0.0, 0.0), identity()));

        player.add_to_environment(&environments[&0]);
        assert!(player.is_in_environment(0));
        player.dispatch_visibility(0, &environments);

        let kinds: Vec<PacketKind> = player
            .outbox
            .get_mut()
            .take_packets()
            .iter()
            .map(|packet| packet.kind)
            .collect();
        assert_eq!(kinds, vec![PacketKind::ChunkCreate, PacketKind::EntitiesCreation]);

        player.remove_from_environment(0);
        assert!(!player.is_in_environment(0));
        assert_eq!(player.visibility().chunk_count(), 0);
    }
}
