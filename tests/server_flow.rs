use std::{sync::Arc, time::Duration};

use cgmath::Vector3;
use voxel_server::{
    application_state::config::ServerConfig,
    core::StResource,
    network::{
        protocol::{
            packets::{
                AuthRequest, ChunkId, Nickname, PlaceBlock, SendChatMessage, VoxelLocation,
            },
            version::{GAME_VERSION, MAX_CLIENT_VERSION, MIN_CLIENT_VERSION},
            AuthError, BoundedString, Packet, PacketKind,
        },
        transport::{LocalClient, LocalConnector, LocalTransport},
        DisconnectionType, SessionManager,
    },
    server_state::{
        players::PlayerIndex,
        task_management::TaskManager,
        voxels::{
            block::{block_type::BlockType, BlockLibrary},
            chunk::ChunkIndices,
            collider::VoxelBoxColliderBuilder,
            generation::FlatWorldGenerator,
            persistence::InMemoryChunkStorage,
        },
        ServerInstance, ServerServices,
    },
};

const ORIGIN: ChunkIndices = ChunkIndices::new(0, 0, 0);

struct Harness {
    instance: ServerInstance,
    connector: LocalConnector,
    storage: Arc<InMemoryChunkStorage>,
}

impl Harness {
    fn new() -> Self {
        let config = ServerConfig {
            planet_chunk_count: [2, 1, 2],
            chunk_size: [4, 4, 4],
            planet_corner_radius: 0.0,
            pause_when_empty: false,
            ..ServerConfig::default()
        };
        let storage = Arc::new(InMemoryChunkStorage::new());
        let services = ServerServices {
            task_manager: StResource::new(TaskManager::new(0)),
            storage: storage.clone(),
            generator: Box::new(FlatWorldGenerator::new(7)),
            collider_builder: Arc::new(VoxelBoxColliderBuilder),
            block_library: Arc::new(BlockLibrary::standard()),
        };
        let mut instance = ServerInstance::new(&config, services).unwrap();

        let transport = LocalTransport::new();
        let connector = transport.connector();
        instance.add_session_manager(SessionManager::new(Box::new(transport)));

        Self {
            instance,
            connector,
            storage,
        }
    }

    fn tick(&mut self) {
        let tick = self.instance.tick_duration();
        self.instance.update(tick);
    }

    fn poll(&mut self) {
        self.instance.update(Duration::ZERO);
    }

    fn finish_background_work(&mut self) {
        self.instance.task_manager().get_mut().flush();
    }

    fn join(&mut self, nickname: &str) -> (LocalClient, PlayerIndex) {
        let mut client = self.connector.connect();
        client.send(&auth_request(GAME_VERSION, nickname));
        self.poll();

        let packets = client.receive();
        let Some(Packet::AuthResponse(response)) = packets.first() else {
            panic!("expected an auth response, got {packets:?}");
        };
        let index = response.result.unwrap();
        assert!(matches!(packets.get(1), Some(Packet::NetworkStrings(_))));
        (client, index)
    }

    fn planet_collider_block(&self, indices: ChunkIndices, coords: Vector3<u32>) -> Option<u8> {
        let planet = self
            .instance
            .environment(self.instance.planet_environment_id())
            .unwrap();
        planet
            .chunk_entities()
            .collider(indices)
            .and_then(|collider| collider.block_at(coords))
    }

    fn planet_applied_rebuilds(&self) -> u64 {
        self.instance
            .environment(self.instance.planet_environment_id())
            .unwrap()
            .chunk_entities()
            .applied_rebuilds()
    }
}

fn auth_request(game_version: u32, nickname: &str) -> Packet {
    Packet::from(AuthRequest {
        game_version,
        nickname: Nickname::new(nickname).unwrap(),
    })
}

fn chunk_id_of(packets: &[Packet], location: ChunkIndices) -> ChunkId {
    packets
        .iter()
        .find_map(|packet| match packet {
            Packet::ChunkCreate(create) if create.location == location => Some(create.chunk_id),
            _ => None,
        })
        .unwrap()
}

fn kinds(packets: &[Packet]) -> Vec<PacketKind> {
    packets.iter().map(Packet::kind).collect()
}

#[test]
fn outdated_client_is_told_to_upgrade() {
    let mut harness = Harness::new();
    let mut client = harness.connector.connect();
    client.send(&auth_request(MIN_CLIENT_VERSION - 1, "Alice"));
    harness.poll();

    let packets = client.receive();
    assert_eq!(packets.len(), 1);
    let Packet::AuthResponse(response) = &packets[0] else {
        panic!("expected an auth response");
    };
    assert_eq!(response.result, Err(AuthError::UpgradeRequired));
    assert_eq!(client.disconnection(), Some(DisconnectionType::Later));
    assert_eq!(harness.instance.player_count(), 0);
}

#[test]
fn newer_client_is_told_the_server_is_outdated() {
    let mut harness = Harness::new();
    let mut client = harness.connector.connect();
    client.send(&auth_request(MAX_CLIENT_VERSION + 1, "Alice"));
    harness.poll();

    let Some(Packet::AuthResponse(response)) = client.receive().into_iter().next() else {
        panic!("expected an auth response");
    };
    assert_eq!(response.result, Err(AuthError::ServerIsOutdated));
}

#[test]
fn untrimmed_nickname_is_a_protocol_error() {
    let mut harness = Harness::new();
    let mut client = harness.connector.connect();
    client.send(&auth_request(GAME_VERSION, "  Bob"));
    harness.poll();

    let Some(Packet::AuthResponse(response)) = client.receive().into_iter().next() else {
        panic!("expected an auth response");
    };
    assert_eq!(response.result, Err(AuthError::ProtocolError));
    assert_eq!(client.disconnection(), Some(DisconnectionType::Later));
    assert_eq!(harness.instance.player_count(), 0);
}

#[test]
fn truncated_auth_request_is_rejected_gracefully() {
    let mut harness = Harness::new();
    let mut client = harness.connector.connect();
    client.send_raw(vec![PacketKind::AuthRequest.opcode(), 1]);
    harness.poll();

    let packets = client.receive();
    assert_eq!(kinds(&packets), vec![PacketKind::AuthResponse]);
    assert_eq!(client.disconnection(), Some(DisconnectionType::Later));
}

#[test]
fn unknown_opcode_before_authentication_is_a_kick() {
    let mut harness = Harness::new();
    let mut client = harness.connector.connect();
    client.send_raw(vec![250]);
    harness.poll();

    assert!(client.receive().is_empty());
    assert_eq!(client.disconnection(), Some(DisconnectionType::Kick));
}

#[test]
fn joining_player_sees_the_world_and_the_roster() {
    let mut harness = Harness::new();
    let (mut alice, alice_index) = harness.join("Alice");
    harness.tick();

    let packets = alice.receive();
    let Some(Packet::GameData(game_data)) = packets.first() else {
        panic!("expected game data first, got {:?}", kinds(&packets));
    };
    assert_eq!(game_data.players.len(), 1);
    assert_eq!(game_data.players[0].index, alice_index);
    assert_eq!(game_data.players[0].nickname.as_str(), "Alice");

    let chunk_creates = packets
        .iter()
        .filter(|packet| packet.kind() == PacketKind::ChunkCreate)
        .count();
    assert_eq!(chunk_creates, 4);

    let creation = packets
        .iter()
        .find_map(|packet| match packet {
            Packet::EntitiesCreation(creation) => Some(creation),
            _ => None,
        })
        .unwrap();
    assert_eq!(creation.entities.len(), 1);
    assert_eq!(
        creation.entities[0]
            .player_controlled
            .map(|data| data.controlling_player),
        Some(alice_index)
    );

    let (_bob, bob_index) = harness.join("Bob");
    harness.tick();
    let packets = alice.receive();
    let join = packets
        .iter()
        .find_map(|packet| match packet {
            Packet::PlayerJoin(join) => Some(join),
            _ => None,
        })
        .unwrap();
    assert_eq!(join.index, bob_index);
}

#[test]
fn placed_block_reaches_every_client_and_the_collider() {
    let mut harness = Harness::new();
    let (mut alice, _) = harness.join("Alice");
    let (mut bob, _) = harness.join("Bob");
    harness.tick();
    harness.finish_background_work();

    let alice_chunk = chunk_id_of(&alice.receive(), ORIGIN);
    let bob_chunk = chunk_id_of(&bob.receive(), ORIGIN);

    let voxel = VoxelLocation { x: 3, y: 3, z: 2 };
    let stone = BlockType::Stone.index();
    assert_eq!(harness.planet_collider_block(ORIGIN, voxel.coords()), None);

    alice.send(&Packet::from(PlaceBlock {
        chunk_id: alice_chunk,
        voxel,
        block: stone,
    }));
    harness.tick();

    let update = bob
        .receive()
        .into_iter()
        .find_map(|packet| match packet {
            Packet::ChunkUpdate(update) => Some(update),
            _ => None,
        })
        .unwrap();
    assert_eq!(update.chunk_id, bob_chunk);
    assert_eq!(update.updates.len(), 1);
    assert_eq!(update.updates[0].voxel, voxel);
    assert_eq!(update.updates[0].block, stone);
    assert!(alice
        .receive()
        .iter()
        .any(|packet| packet.kind() == PacketKind::ChunkUpdate));

    harness.finish_background_work();
    harness.tick();
    assert_eq!(
        harness.planet_collider_block(ORIGIN, voxel.coords()),
        Some(stone)
    );
}

#[test]
fn edits_in_one_tick_cost_one_rebuild() {
    let mut harness = Harness::new();
    let (mut alice, _) = harness.join("Alice");
    harness.tick();
    harness.finish_background_work();
    harness.tick();

    let chunk_id = chunk_id_of(&alice.receive(), ORIGIN);
    let before = harness.planet_applied_rebuilds();

    for x in 0..3 {
        alice.send(&Packet::from(PlaceBlock {
            chunk_id,
            voxel: VoxelLocation { x, y: 3, z: 0 },
            block: BlockType::Planks.index(),
        }));
    }
    harness.tick();
    harness.finish_background_work();
    harness.tick();

    assert_eq!(harness.planet_applied_rebuilds(), before + 1);
    for x in 0..3 {
        let voxel = VoxelLocation { x, y: 3, z: 0 };
        assert_eq!(
            harness.planet_collider_block(ORIGIN, voxel.coords()),
            Some(BlockType::Planks.index())
        );
    }
}

#[test]
fn unknown_block_is_ignored() {
    let mut harness = Harness::new();
    let (mut alice, _) = harness.join("Alice");
    harness.tick();
    let chunk_id = chunk_id_of(&alice.receive(), ORIGIN);

    alice.send(&Packet::from(PlaceBlock {
        chunk_id,
        voxel: VoxelLocation { x: 0, y: 3, z: 0 },
        block: 200,
    }));
    harness.tick();

    assert!(alice.is_connected());
    assert!(!alice
        .receive()
        .iter()
        .any(|packet| packet.kind() == PacketKind::ChunkUpdate));
}

#[test]
fn chat_is_broadcast_with_the_sender() {
    let mut harness = Harness::new();
    let (mut alice, alice_index) = harness.join("Alice");
    let (mut bob, _) = harness.join("Bob");
    harness.tick();
    alice.receive();
    bob.receive();

    alice.send(&Packet::from(SendChatMessage {
        message: BoundedString::new("hello").unwrap(),
    }));
    harness.poll();

    let chat = bob
        .receive()
        .into_iter()
        .find_map(|packet| match packet {
            Packet::ChatMessage(chat) => Some(chat),
            _ => None,
        })
        .unwrap();
    assert_eq!(chat.player_index, Some(alice_index));
    assert_eq!(chat.message.as_str(), "hello");
}

#[test]
fn unexpected_packet_kicks_and_removes_the_player() {
    let mut harness = Harness::new();
    let (mut alice, alice_index) = harness.join("Alice");
    let (mut bob, _) = harness.join("Bob");
    harness.tick();
    bob.receive();

    alice.send(&auth_request(GAME_VERSION, "Alice"));
    harness.tick();

    alice.receive();
    assert_eq!(alice.disconnection(), Some(DisconnectionType::Kick));
    assert_eq!(harness.instance.player_count(), 1);

    let packets = bob.receive();
    assert!(packets.iter().any(|packet| matches!(
        packet,
        Packet::PlayerLeave(leave) if leave.index == alice_index
    )));
    assert!(packets
        .iter()
        .any(|packet| packet.kind() == PacketKind::EntitiesDelete));
}

#[test]
fn disconnected_player_leaves_and_frees_its_index() {
    let mut harness = Harness::new();
    let (mut alice, alice_index) = harness.join("Alice");
    let (mut bob, _) = harness.join("Bob");
    harness.tick();
    bob.receive();

    alice.disconnect();
    harness.tick();
    assert_eq!(harness.instance.player_count(), 1);
    assert!(bob.receive().iter().any(|packet| matches!(
        packet,
        Packet::PlayerLeave(leave) if leave.index == alice_index
    )));

    let (_carol, carol_index) = harness.join("Carol");
    assert_eq!(carol_index, alice_index);
}

#[test]
fn shutdown_saves_the_planet() {
    let mut harness = Harness::new();
    harness.instance.shutdown();
    assert_eq!(harness.storage.save_count(), 1);
    assert_eq!(harness.storage.chunk_count(), 4);
}
