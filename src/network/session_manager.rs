//! Sessions of one transport.

use std::{collections::BTreeMap, sync::Arc};

use log::{debug, info, trace};

use crate::server_state::ServerInstance;

use super::{
    protocol::PacketAttributeTable,
    session::NetworkSession,
    session_handler,
    transport::{DisconnectionType, PeerId, Transport, TransportEvent},
};

/// Owns a transport and the sessions of its peers.
pub struct SessionManager {
    transport: Box<dyn Transport>,
    attributes: Arc<PacketAttributeTable>,
    sessions: BTreeMap<PeerId, NetworkSession>,
}

impl SessionManager {
    /// Creates a manager over `transport`, sending with the server's packet attributes.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_attributes(transport, PacketAttributeTable::server_defaults())
    }

    /// Creates a manager with an explicit attribute table.
    pub fn with_attributes(transport: Box<dyn Transport>, attributes: PacketAttributeTable) -> Self {
        Self {
            transport,
            attributes: Arc::new(attributes),
            sessions: BTreeMap::new(),
        }
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns a session.
    pub fn session(&self, peer: PeerId) -> Option<&NetworkSession> {
        self.sessions.get(&peer)
    }

    /// Drains transport events and runs every received packet through the
    /// session's handler.
    pub fn poll(&mut self, instance: &mut ServerInstance) {
        for event in self.transport.poll() {
            match event {
                TransportEvent::Connected(peer) => {
                    debug!("Peer {peer} connected");
                    self.sessions
                        .insert(peer, NetworkSession::new(peer, self.attributes.clone()));
                }
                TransportEvent::Received { peer, payload, .. } => {
                    let Some(session) = self.sessions.get_mut(&peer) else {
                        continue;
                    };
                    if session.is_disconnecting() {
                        trace!("Ignoring packet from disconnecting peer {peer}");
                        continue;
                    }
                    session_handler::handle_payload(session, &payload, instance);

                    if session.outbox().get().disconnection() == Some(DisconnectionType::Kick) {
                        if let Some(index) = session.player_index() {
                            instance.destroy_player(index);
                        }
                    }
                }
                TransportEvent::Disconnected(peer) => {
                    let Some(session) = self.sessions.remove(&peer) else {
                        continue;
                    };
                    debug!("Peer {peer} disconnected");
                    let kicked =
                        session.outbox().get().disconnection() == Some(DisconnectionType::Kick);
                    if let (Some(index), false) = (session.player_index(), kicked) {
                        instance.destroy_player(index);
                    }
                }
            }
        }
    }

    /// Hands every queued packet to the transport and carries out requested
    /// disconnections.
    pub fn flush(&mut self) {
        let mut closed = Vec::new();
        for (peer, session) in &self.sessions {
            let (packets, disconnection) = {
                let mut outbox = session.outbox().get_mut();
                (outbox.take_packets(), outbox.disconnection())
            };

            if disconnection == Some(DisconnectionType::Kick) {
                self.transport.disconnect(*peer, DisconnectionType::Kick);
                closed.push(*peer);
                continue;
            }

            for packet in packets {
                self.transport.send(
                    *peer,
                    packet.attributes.channel,
                    packet.attributes.reliability,
                    packet.payload,
                );
            }

            if disconnection == Some(DisconnectionType::Later) {
                self.transport.disconnect(*peer, DisconnectionType::Later);
                closed.push(*peer);
            }
        }

        for peer in closed {
            if self.sessions.remove(&peer).is_some() {
                info!("Closed session of peer {peer}");
            }
        }
    }
}
