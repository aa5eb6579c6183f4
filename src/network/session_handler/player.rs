//! Gameplay packets of an authenticated session.

use log::warn;

use crate::{
    network::{
        protocol::{
            packets::{ChunkId, VoxelLocation, CHAT_MAX_MESSAGE_LENGTH},
            BoundedString, Packet,
        },
        session::NetworkSession,
    },
    server_state::{
        players::PlayerIndex,
        voxels::block::{BlockIndex, EMPTY_BLOCK},
        ServerInstance,
    },
};

use super::kick_unexpected;

/// Handles a packet of an authenticated session.
pub fn handle(
    session: &mut NetworkSession,
    index: PlayerIndex,
    packet: Packet,
    instance: &mut ServerInstance,
) {
    match packet {
        Packet::MineBlock(mine) => edit_block(instance, index, mine.chunk_id, mine.voxel, EMPTY_BLOCK),
        Packet::PlaceBlock(place) => {
            if !instance.block_library().contains(place.block) {
                warn!("Player {index} tried to place unknown block {}", place.block);
                return;
            }
            edit_block(instance, index, place.chunk_id, place.voxel, place.block);
        }
        Packet::UpdatePlayerInputs(update) => {
            if let Some(player) = instance.player_mut(index) {
                player.push_inputs(update.inputs);
            }
        }
        Packet::SendChatMessage(chat) => {
            let message = BoundedString::<CHAT_MAX_MESSAGE_LENGTH>::truncated(chat.message.as_str());
            instance.broadcast_chat_message(message, Some(index));
        }
        packet => kick_unexpected(session, &packet),
    }
}

fn edit_block(
    instance: &mut ServerInstance,
    index: PlayerIndex,
    chunk_id: ChunkId,
    voxel: VoxelLocation,
    block: BlockIndex,
) {
    let Some((environment, indices)) = instance
        .player(index)
        .and_then(|player| player.visibility().chunk_by_network_id(chunk_id))
    else {
        warn!("Player {index} edited unknown chunk id {chunk_id}");
        return;
    };

    if let Err(error) = instance.update_block(environment, indices, voxel.coords(), block) {
        warn!("Player {index} sent an invalid block edit: {error}");
    }
}
