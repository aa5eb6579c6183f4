//! # Packet Catalog
//!
//! Every message exchanged between client and server. A packet on the wire is a
//! one-byte opcode (the kind's position in the catalog) followed by the
//! kind-specific payload.
//!
//! ## Catalog
//! | Opcode | Kind | Direction |
//! |---|---|---|
//! | 0 | AuthRequest | client → server |
//! | 1 | AuthResponse | server → client |
//! | 2 | ChatMessage | server → client |
//! | 3 | ChunkCreate | server → client |
//! | 4 | ChunkDestroy | server → client |
//! | 5 | ChunkUpdate | server → client |
//! | 6 | EntitiesCreation | server → client |
//! | 7 | EntitiesDelete | server → client |
//! | 8 | EntitiesStateUpdate | server → client |
//! | 9 | GameData | server → client |
//! | 10 | MineBlock | client → server |
//! | 11 | NetworkStrings | server → client |
//! | 12 | PlaceBlock | client → server |
//! | 13 | PlayerJoin | server → client |
//! | 14 | PlayerLeave | server → client |
//! | 15 | SendChatMessage | client → server |
//! | 16 | UpdatePlayerInputs | client → server |
//!
//! Packet fields mirror the wire layout and are named after it.

#![allow(missing_docs)]

use std::fmt;

use cgmath::{Quaternion, Vector3};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use thiserror::Error;

use crate::server_state::{
    players::{player_inputs::InputIndex, player_inputs::PlayerInputs, PlayerIndex},
    voxels::{block::BlockIndex, chunk::ChunkIndices},
};

use super::codec::{
    decode_exact, BoundedString, CompressedSigned, CompressedUnsigned, Decode, DecodeError, Encode,
};

/// Maximum nickname length, in bytes.
pub const PLAYER_MAX_NICKNAME_LENGTH: usize = 16;
/// Maximum length of a chat message broadcast by the server, in bytes.
pub const CHAT_MAX_MESSAGE_LENGTH: usize = 1024;
/// Maximum length of a chat message sent by a player, in bytes.
pub const CHAT_MAX_PLAYER_MESSAGE_LENGTH: usize = 256;
/// Maximum length of a network string, in bytes.
pub const NETWORK_STRING_MAX_LENGTH: usize = 1024;

/// Player nickname.
pub type Nickname = BoundedString<PLAYER_MAX_NICKNAME_LENGTH>;

/// Session-local chunk id.
pub type ChunkId = u16;

/// Session-local entity id.
pub type EntityId = u16;

/// Reason an authentication was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum AuthError {
    /// The client is newer than the server.
    ServerIsOutdated = 0,
    /// The client is older than the server accepts.
    UpgradeRequired = 1,
    /// The request was malformed.
    ProtocolError = 2,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthError::ServerIsOutdated => "server is outdated",
            AuthError::UpgradeRequired => "upgrade required",
            AuthError::ProtocolError => "protocol error",
        })
    }
}

/// Voxel coordinates inside a chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VoxelLocation {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

impl VoxelLocation {
    /// Converts chunk voxel coordinates, or returns `None` if one doesn't fit a byte.
    pub fn from_coords(coords: Vector3<u32>) -> Option<Self> {
        Some(Self {
            x: u8::try_from(coords.x).ok()?,
            y: u8::try_from(coords.y).ok()?,
            z: u8::try_from(coords.z).ok()?,
        })
    }

    /// Voxel coordinates as a vector.
    pub fn coords(&self) -> Vector3<u32> {
        Vector3::new(u32::from(self.x), u32::from(self.y), u32::from(self.z))
    }
}

/// Position and orientation of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub rotation: Quaternion<f32>,
    pub position: Vector3<f32>,
}

/// Marks an entity as controlled by a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerControlledData {
    pub controlling_player: PlayerIndex,
}

/// Authentication request, the first packet a client sends.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub game_version: u32,
    pub nickname: Nickname,
}

/// Answer to [`AuthRequest`]. Carries the player index on success.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub result: Result<PlayerIndex, AuthError>,
}

/// Chat line; `player_index` is `None` for server messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub player_index: Option<PlayerIndex>,
    pub message: BoundedString<CHAT_MAX_MESSAGE_LENGTH>,
}

/// A chunk became visible to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCreate {
    pub chunk_id: ChunkId,
    pub location: ChunkIndices,
    pub size: [u32; 3],
    pub block_size: f32,
    pub content: Vec<BlockIndex>,
}

/// A chunk left the session's view.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDestroy {
    pub chunk_id: ChunkId,
}

/// One block change inside a [`ChunkUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockUpdate {
    pub voxel: VoxelLocation,
    pub block: BlockIndex,
}

/// Batched block changes of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkUpdate {
    pub chunk_id: ChunkId,
    pub updates: Vec<BlockUpdate>,
}

/// Initial data of a newly visible entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCreationData {
    pub entity_id: EntityId,
    pub initial_state: EntityState,
    pub player_controlled: Option<PlayerControlledData>,
}

/// Entities that became visible during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitiesCreation {
    pub tick_index: u16,
    pub entities: Vec<EntityCreationData>,
}

/// Entities that left the session's view during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitiesDelete {
    pub tick_index: u16,
    pub entities: Vec<EntityId>,
}

/// Server-side view of the session's own character.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlledCharacter {
    pub camera_pitch: f32,
    pub camera_yaw: f32,
    pub reference_rotation: Quaternion<f32>,
    pub position: Vector3<f32>,
}

/// New state of one moving entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityStateData {
    pub entity_id: EntityId,
    pub state: EntityState,
}

/// Per-tick state of moving entities.
///
/// `last_input_index` is the last input of the session's player the server
/// applied, so the client can drop or replay its own pending inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitiesStateUpdate {
    pub tick_index: u16,
    pub last_input_index: InputIndex,
    pub controlled_character: Option<ControlledCharacter>,
    pub entities: Vec<EntityStateData>,
}

/// One roster entry of [`GameData`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerData {
    pub index: PlayerIndex,
    pub nickname: Nickname,
}

/// Roster snapshot sent to a player after it joined.
#[derive(Debug, Clone, PartialEq)]
pub struct GameData {
    pub players: Vec<PlayerData>,
    pub tick_index: u16,
}

/// Client request to clear a block.
#[derive(Debug, Clone, PartialEq)]
pub struct MineBlock {
    pub chunk_id: ChunkId,
    pub voxel: VoxelLocation,
}

/// Indexed string table (block names) sent after authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkStrings {
    pub start_id: u32,
    pub strings: Vec<BoundedString<NETWORK_STRING_MAX_LENGTH>>,
}

/// Client request to place a block.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceBlock {
    pub chunk_id: ChunkId,
    pub voxel: VoxelLocation,
    pub block: BlockIndex,
}

/// Another player joined.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerJoin {
    pub index: PlayerIndex,
    pub nickname: Nickname,
}

/// A player left.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerLeave {
    pub index: PlayerIndex,
}

/// Chat line typed by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SendChatMessage {
    pub message: BoundedString<CHAT_MAX_PLAYER_MESSAGE_LENGTH>,
}

/// Input frame of the client's player.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlayerInputs {
    pub inputs: PlayerInputs,
}

impl Encode for VoxelLocation {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.x, self.y, self.z]);
    }
}

impl Decode for VoxelLocation {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            x: u8::decode(inp)?,
            y: u8::decode(inp)?,
            z: u8::decode(inp)?,
        })
    }
}

impl Encode for EntityState {
    fn encode(&self, out: &mut Vec<u8>) {
        self.rotation.encode(out);
        self.position.encode(out);
    }
}

impl Decode for EntityState {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            rotation: Quaternion::decode(inp)?,
            position: Vector3::decode(inp)?,
        })
    }
}

impl Encode for PlayerControlledData {
    fn encode(&self, out: &mut Vec<u8>) {
        self.controlling_player.encode(out);
    }
}

impl Decode for PlayerControlledData {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            controlling_player: PlayerIndex::decode(inp)?,
        })
    }
}

impl Encode for AuthRequest {
    fn encode(&self, out: &mut Vec<u8>) {
        self.game_version.encode(out);
        self.nickname.encode(out);
    }
}

impl Decode for AuthRequest {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            game_version: u32::decode(inp)?,
            nickname: Nickname::decode(inp)?,
        })
    }
}

impl Encode for AuthResponse {
    fn encode(&self, out: &mut Vec<u8>) {
        match self.result {
            Ok(index) => {
                true.encode(out);
                index.encode(out);
            }
            Err(error) => {
                false.encode(out);
                (error as u8).encode(out);
            }
        }
    }
}

impl Decode for AuthResponse {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        if bool::decode(inp)? {
            return Ok(Self {
                result: Ok(PlayerIndex::decode(inp)?),
            });
        }
        let raw = u8::decode(inp)?;
        let error = AuthError::from_u8(raw).ok_or(DecodeError::InvalidValue {
            field: "AuthError",
            value: u32::from(raw),
        })?;
        Ok(Self { result: Err(error) })
    }
}

impl Encode for ChatMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        self.player_index.encode(out);
        self.message.encode(out);
    }
}

impl Decode for ChatMessage {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            player_index: Option::decode(inp)?,
            message: BoundedString::decode(inp)?,
        })
    }
}

impl Encode for ChunkCreate {
    fn encode(&self, out: &mut Vec<u8>) {
        self.chunk_id.encode(out);
        CompressedSigned(self.location.x).encode(out);
        CompressedSigned(self.location.y).encode(out);
        CompressedSigned(self.location.z).encode(out);
        for extent in self.size {
            CompressedUnsigned(extent).encode(out);
        }
        self.block_size.encode(out);
        self.content.encode(out);
    }
}

impl Decode for ChunkCreate {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        let chunk_id = ChunkId::decode(inp)?;
        let location = ChunkIndices::new(
            CompressedSigned::decode(inp)?.0,
            CompressedSigned::decode(inp)?.0,
            CompressedSigned::decode(inp)?.0,
        );
        let size = [
            CompressedUnsigned::decode(inp)?.0,
            CompressedUnsigned::decode(inp)?.0,
            CompressedUnsigned::decode(inp)?.0,
        ];
        let block_size = f32::decode(inp)?;
        let content = Vec::<BlockIndex>::decode(inp)?;

        let expected = size.iter().map(|extent| *extent as usize).product::<usize>();
        if content.len() != expected {
            return Err(DecodeError::InvalidValue {
                field: "ChunkCreate::content",
                value: u32::try_from(content.len()).unwrap_or(u32::MAX),
            });
        }
        Ok(Self {
            chunk_id,
            location,
            size,
            block_size,
            content,
        })
    }
}

impl Encode for ChunkDestroy {
    fn encode(&self, out: &mut Vec<u8>) {
        self.chunk_id.encode(out);
    }
}

impl Decode for ChunkDestroy {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            chunk_id: ChunkId::decode(inp)?,
        })
    }
}

impl Encode for BlockUpdate {
    fn encode(&self, out: &mut Vec<u8>) {
        self.voxel.encode(out);
        self.block.encode(out);
    }
}

impl Decode for BlockUpdate {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            voxel: VoxelLocation::decode(inp)?,
            block: BlockIndex::decode(inp)?,
        })
    }
}

impl Encode for ChunkUpdate {
    fn encode(&self, out: &mut Vec<u8>) {
        self.chunk_id.encode(out);
        self.updates.encode(out);
    }
}

impl Decode for ChunkUpdate {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            chunk_id: ChunkId::decode(inp)?,
            updates: Vec::decode(inp)?,
        })
    }
}

impl Encode for EntityCreationData {
    fn encode(&self, out: &mut Vec<u8>) {
        self.entity_id.encode(out);
        self.initial_state.encode(out);
        self.player_controlled.encode(out);
    }
}

impl Decode for EntityCreationData {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            entity_id: EntityId::decode(inp)?,
            initial_state: EntityState::decode(inp)?,
            player_controlled: Option::decode(inp)?,
        })
    }
}

impl Encode for EntitiesCreation {
    fn encode(&self, out: &mut Vec<u8>) {
        self.tick_index.encode(out);
        self.entities.encode(out);
    }
}

impl Decode for EntitiesCreation {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            tick_index: u16::decode(inp)?,
            entities: Vec::decode(inp)?,
        })
    }
}

impl Encode for EntitiesDelete {
    fn encode(&self, out: &mut Vec<u8>) {
        self.tick_index.encode(out);
        self.entities.encode(out);
    }
}

impl Decode for EntitiesDelete {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            tick_index: u16::decode(inp)?,
            entities: Vec::decode(inp)?,
        })
    }
}

impl Encode for ControlledCharacter {
    fn encode(&self, out: &mut Vec<u8>) {
        self.camera_pitch.encode(out);
        self.camera_yaw.encode(out);
        self.reference_rotation.encode(out);
        self.position.encode(out);
    }
}

impl Decode for ControlledCharacter {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            camera_pitch: f32::decode(inp)?,
            camera_yaw: f32::decode(inp)?,
            reference_rotation: Quaternion::decode(inp)?,
            position: Vector3::decode(inp)?,
        })
    }
}

impl Encode for EntityStateData {
    fn encode(&self, out: &mut Vec<u8>) {
        self.entity_id.encode(out);
        self.state.encode(out);
    }
}

impl Decode for EntityStateData {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            entity_id: EntityId::decode(inp)?,
            state: EntityState::decode(inp)?,
        })
    }
}

impl Encode for EntitiesStateUpdate {
    fn encode(&self, out: &mut Vec<u8>) {
        self.tick_index.encode(out);
        self.last_input_index.encode(out);
        self.controlled_character.encode(out);
        self.entities.encode(out);
    }
}

impl Decode for EntitiesStateUpdate {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            tick_index: u16::decode(inp)?,
            last_input_index: InputIndex::decode(inp)?,
            controlled_character: Option::decode(inp)?,
            entities: Vec::decode(inp)?,
        })
    }
}

impl Encode for PlayerData {
    fn encode(&self, out: &mut Vec<u8>) {
        self.index.encode(out);
        self.nickname.encode(out);
    }
}

impl Decode for PlayerData {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            index: PlayerIndex::decode(inp)?,
            nickname: Nickname::decode(inp)?,
        })
    }
}

impl Encode for GameData {
    fn encode(&self, out: &mut Vec<u8>) {
        self.players.encode(out);
        self.tick_index.encode(out);
    }
}

impl Decode for GameData {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            players: Vec::decode(inp)?,
            tick_index: u16::decode(inp)?,
        })
    }
}

impl Encode for MineBlock {
    fn encode(&self, out: &mut Vec<u8>) {
        self.chunk_id.encode(out);
        self.voxel.encode(out);
    }
}

impl Decode for MineBlock {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            chunk_id: ChunkId::decode(inp)?,
            voxel: VoxelLocation::decode(inp)?,
        })
    }
}

impl Encode for NetworkStrings {
    fn encode(&self, out: &mut Vec<u8>) {
        CompressedUnsigned(self.start_id).encode(out);
        self.strings.encode(out);
    }
}

impl Decode for NetworkStrings {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            start_id: CompressedUnsigned::decode(inp)?.0,
            strings: Vec::decode(inp)?,
        })
    }
}

impl Encode for PlaceBlock {
    fn encode(&self, out: &mut Vec<u8>) {
        self.chunk_id.encode(out);
        self.voxel.encode(out);
        self.block.encode(out);
    }
}

impl Decode for PlaceBlock {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            chunk_id: ChunkId::decode(inp)?,
            voxel: VoxelLocation::decode(inp)?,
            block: BlockIndex::decode(inp)?,
        })
    }
}

impl Encode for PlayerJoin {
    fn encode(&self, out: &mut Vec<u8>) {
        self.index.encode(out);
        self.nickname.encode(out);
    }
}

impl Decode for PlayerJoin {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            index: PlayerIndex::decode(inp)?,
            nickname: Nickname::decode(inp)?,
        })
    }
}

impl Encode for PlayerLeave {
    fn encode(&self, out: &mut Vec<u8>) {
        self.index.encode(out);
    }
}

impl Decode for PlayerLeave {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            index: PlayerIndex::decode(inp)?,
        })
    }
}

impl Encode for SendChatMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        self.message.encode(out);
    }
}

impl Decode for SendChatMessage {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            message: BoundedString::decode(inp)?,
        })
    }
}

impl Encode for UpdatePlayerInputs {
    fn encode(&self, out: &mut Vec<u8>) {
        self.inputs.encode(out);
    }
}

impl Decode for UpdatePlayerInputs {
    fn decode(inp: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            inputs: PlayerInputs::decode(inp)?,
        })
    }
}

/// Failure to turn bytes into a [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketDecodeError {
    /// The message had no opcode.
    #[error("empty message")]
    Empty,
    /// The opcode is not in the catalog.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    /// The opcode is known but its payload is malformed.
    #[error("failed to deserialize {kind}: {source}")]
    Deserialization {
        /// Kind named by the opcode.
        kind: PacketKind,
        /// What went wrong.
        #[source]
        source: DecodeError,
    },
}

macro_rules! packet_catalog {
    ($($name:ident = $opcode:literal),* $(,)?) => {
        /// Packet kind; the discriminant is the wire opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
        #[repr(u8)]
        pub enum PacketKind {
            $($name = $opcode),*
        }

        impl PacketKind {
            /// Every kind, in opcode order.
            pub const ALL: &'static [PacketKind] = &[$(PacketKind::$name),*];

            /// Name of the kind.
            pub fn name(self) -> &'static str {
                match self {
                    $(PacketKind::$name => stringify!($name)),*
                }
            }

            /// Wire opcode.
            pub fn opcode(self) -> u8 {
                self as u8
            }
        }

        /// Any packet of the catalog.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Packet {
            $($name($name)),*
        }

        impl Packet {
            /// Kind of the packet.
            pub fn kind(&self) -> PacketKind {
                match self {
                    $(Packet::$name(_) => PacketKind::$name),*
                }
            }

            /// Encodes the packet, opcode first.
            pub fn encode(&self) -> Vec<u8> {
                let mut out = vec![self.kind().opcode()];
                match self {
                    $(Packet::$name(packet) => packet.encode(&mut out)),*
                }
                out
            }

            /// Decodes a complete message.
            pub fn decode(bytes: &[u8]) -> Result<Packet, PacketDecodeError> {
                let (&opcode, payload) = bytes.split_first().ok_or(PacketDecodeError::Empty)?;
                let kind = PacketKind::from_u8(opcode).ok_or(PacketDecodeError::UnknownOpcode(opcode))?;
                let wrap = |source| PacketDecodeError::Deserialization { kind, source };
                match kind {
                    $(PacketKind::$name => decode_exact::<$name>(payload).map(Packet::$name).map_err(wrap)),*
                }
            }
        }

        $(
            impl From<$name> for Packet {
                fn from(packet: $name) -> Self {
                    Packet::$name(packet)
                }
            }
        )*
    };
}

packet_catalog! {
    AuthRequest = 0,
    AuthResponse = 1,
    ChatMessage = 2,
    ChunkCreate = 3,
    ChunkDestroy = 4,
    ChunkUpdate = 5,
    EntitiesCreation = 6,
    EntitiesDelete = 7,
    EntitiesStateUpdate = 8,
    GameData = 9,
    MineBlock = 10,
    NetworkStrings = 11,
    PlaceBlock = 12,
    PlayerJoin = 13,
    PlayerLeave = 14,
    SendChatMessage = 15,
    UpdatePlayerInputs = 16,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
