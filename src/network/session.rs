//! Per-connection session state.

use std::sync::Arc;

use log::trace;

use crate::{core::StResource, server_state::players::PlayerIndex};

use super::{
    protocol::{Packet, PacketAttributeTable, PacketAttributes, PacketKind},
    transport::{DisconnectionType, PeerId},
};

/// An encoded packet waiting to be handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingPacket {
    /// Kind of the packet.
    pub kind: PacketKind,
    /// Channel and reliability it is sent with.
    pub attributes: PacketAttributes,
    /// Encoded packet, opcode first.
    pub payload: Vec<u8>,
}

/// Outgoing queue of a session, shared with the session's player.
#[derive(Debug)]
pub struct SessionOutbox {
    attributes: Arc<PacketAttributeTable>,
    packets: Vec<OutgoingPacket>,
    disconnection: Option<DisconnectionType>,
}

impl SessionOutbox {
    /// Creates an empty outbox sending with `attributes`.
    pub fn new(attributes: Arc<PacketAttributeTable>) -> Self {
        Self {
            attributes,
            packets: Vec::new(),
            disconnection: None,
        }
    }

    /// Encodes and queues a packet.
    ///
    /// # Returns
    /// `false` when the session is being disconnected and the packet was dropped
    pub fn send(&mut self, packet: &Packet) -> bool {
        if self.disconnection.is_some() {
            trace!("Dropping {} for a disconnecting session", packet.kind());
            return false;
        }
        let kind = packet.kind();
        self.packets.push(OutgoingPacket {
            kind,
            attributes: self.attributes.get(kind),
            payload: packet.encode(),
        });
        true
    }

    /// Requests a disconnection. A kick overrides a pending graceful disconnection.
    pub fn disconnect(&mut self, kind: DisconnectionType) {
        self.disconnection = match (self.disconnection, kind) {
            (Some(DisconnectionType::Kick), _) => Some(DisconnectionType::Kick),
            _ => Some(kind),
        };
    }

    /// Pending disconnection, if any.
    pub fn disconnection(&self) -> Option<DisconnectionType> {
        self.disconnection
    }

    /// Takes the queued packets.
    pub fn take_packets(&mut self) -> Vec<OutgoingPacket> {
        std::mem::take(&mut self.packets)
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not authenticated.
    Initial,
    /// Authenticated and controlling a player.
    Player(PlayerIndex),
}

/// One client connection.
#[derive(Debug)]
pub struct NetworkSession {
    peer: PeerId,
    state: SessionState,
    protocol_version: Option<u32>,
    outbox: StResource<SessionOutbox>,
}

impl NetworkSession {
    /// Creates an unauthenticated session.
    pub fn new(peer: PeerId, attributes: Arc<PacketAttributeTable>) -> Self {
        Self {
            peer,
            state: SessionState::Initial,
            protocol_version: None,
            outbox: StResource::new(SessionOutbox::new(attributes)),
        }
    }

    /// Peer of the session.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Protocol state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Player of an authenticated session.
    pub fn player_index(&self) -> Option<PlayerIndex> {
        match self.state {
            SessionState::Initial => None,
            SessionState::Player(index) => Some(index),
        }
    }

    /// Moves the session into the player state.
    pub fn authenticate(&mut self, index: PlayerIndex, protocol_version: u32) {
        self.state = SessionState::Player(index);
        self.protocol_version = Some(protocol_version);
    }

    /// Game version the client authenticated with.
    pub fn protocol_version(&self) -> Option<u32> {
        self.protocol_version
    }

    /// Outgoing queue of the session.
    pub fn outbox(&self) -> &StResource<SessionOutbox> {
        &self.outbox
    }

    /// Queues a packet.
    pub fn send(&self, packet: &Packet) -> bool {
        self.outbox.get_mut().send(packet)
    }

    /// Requests a disconnection.
    pub fn disconnect(&self, kind: DisconnectionType) {
        self.outbox.get_mut().disconnect(kind);
    }

    /// Returns `true` once a disconnection has been requested.
    pub fn is_disconnecting(&self) -> bool {
        self.outbox.get().disconnection().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{packets::PlayerLeave, PacketAttributes};

    #[test]
    fn outbox_stops_queueing_once_disconnecting() {
        let mut outbox = SessionOutbox::new(Arc::new(PacketAttributeTable::server_defaults()));
        assert!(outbox.send(&Packet::from(PlayerLeave { index: 1 })));
        outbox.disconnect(DisconnectionType::Later);
        assert!(!outbox.send(&Packet::from(PlayerLeave { index: 2 })));

        let packets = outbox.take_packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].attributes, PacketAttributes::reliable(0));
        assert!(outbox.is_empty());
    }

    #[test]
    fn kick_overrides_graceful_disconnection() {
        let mut outbox = SessionOutbox::new(Arc::new(PacketAttributeTable::server_defaults()));
        outbox.disconnect(DisconnectionType::Kick);
        outbox.disconnect(DisconnectionType::Later);
        assert_eq!(outbox.disconnection(), Some(DisconnectionType::Kick));
    }
}
