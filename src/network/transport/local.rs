//! In-process transport over `std::sync::mpsc` channels.
//!
//! The server side is a [`LocalTransport`]. Clients are created through a
//! [`LocalConnector`], which can be cloned and kept after the transport itself
//! has been handed to a session manager.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
};

use log::{debug, warn};

use crate::network::protocol::{Packet, Reliability};

use super::{DisconnectionType, PeerId, Transport, TransportEvent};

enum ServerInbound {
    Connected(PeerId, Sender<ClientInbound>),
    Received { peer: PeerId, channel: u8, payload: Vec<u8> },
    Disconnected(PeerId),
}

enum ClientInbound {
    Payload { channel: u8, payload: Vec<u8> },
    Disconnected(DisconnectionType),
}

/// Server side of the in-process transport.
pub struct LocalTransport {
    inbound: Receiver<ServerInbound>,
    connector: LocalConnector,
    peers: HashMap<PeerId, Sender<ClientInbound>>,
}

impl LocalTransport {
    /// Creates a transport with no peers.
    pub fn new() -> Self {
        let (sender, inbound) = mpsc::channel();
        Self {
            inbound,
            connector: LocalConnector {
                sender,
                next_peer: Arc::new(AtomicU32::new(0)),
            },
            peers: HashMap::new(),
        }
    }

    /// Returns a handle that creates clients of this transport.
    pub fn connector(&self) -> LocalConnector {
        self.connector.clone()
    }

    /// Connects a new client.
    pub fn connect(&self) -> LocalClient {
        self.connector.connect()
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LocalTransport {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.inbound.try_recv() {
            match message {
                ServerInbound::Connected(peer, sender) => {
                    self.peers.insert(peer, sender);
                    events.push(TransportEvent::Connected(peer));
                }
                ServerInbound::Received {
                    peer,
                    channel,
                    payload,
                } => {
                    if self.peers.contains_key(&peer) {
                        events.push(TransportEvent::Received {
                            peer,
                            channel,
                            payload,
                        });
                    }
                }
                ServerInbound::Disconnected(peer) => {
                    if self.peers.remove(&peer).is_some() {
                        events.push(TransportEvent::Disconnected(peer));
                    }
                }
            }
        }
        events
    }

    fn send(&mut self, peer: PeerId, channel: u8, _reliability: Reliability, payload: Vec<u8>) {
        if let Some(sender) = self.peers.get(&peer) {
            if sender.send(ClientInbound::Payload { channel, payload }).is_err() {
                debug!("Local peer {peer} is gone");
            }
        }
    }

    fn disconnect(&mut self, peer: PeerId, kind: DisconnectionType) {
        if let Some(sender) = self.peers.remove(&peer) {
            let _ = sender.send(ClientInbound::Disconnected(kind));
        }
    }
}

/// Creates clients of a [`LocalTransport`].
#[derive(Clone)]
pub struct LocalConnector {
    sender: Sender<ServerInbound>,
    next_peer: Arc<AtomicU32>,
}

impl LocalConnector {
    /// Connects a new client. The server sees it on its next poll.
    pub fn connect(&self) -> LocalClient {
        let peer = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let (sender, inbound) = mpsc::channel();
        let connected = self.sender.send(ServerInbound::Connected(peer, sender)).is_ok();
        if !connected {
            warn!("Local transport is gone, client {peer} starts disconnected");
        }
        LocalClient {
            peer,
            outbound: self.sender.clone(),
            inbound,
            connected,
            disconnection: None,
        }
    }
}

/// Client end of the in-process transport.
pub struct LocalClient {
    peer: PeerId,
    outbound: Sender<ServerInbound>,
    inbound: Receiver<ClientInbound>,
    connected: bool,
    disconnection: Option<DisconnectionType>,
}

impl LocalClient {
    /// Peer id the server knows this client by.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Sends a packet on channel 0.
    pub fn send(&self, packet: &Packet) {
        self.send_raw(packet.encode());
    }

    /// Sends raw bytes on channel 0.
    pub fn send_raw(&self, payload: Vec<u8>) {
        if !self.connected {
            return;
        }
        let _ = self.outbound.send(ServerInbound::Received {
            peer: self.peer,
            channel: 0,
            payload,
        });
    }

    /// Returns every payload received since the last call, with its channel.
    pub fn receive_raw(&mut self) -> Vec<(u8, Vec<u8>)> {
        let mut payloads = Vec::new();
        while let Ok(message) = self.inbound.try_recv() {
            match message {
                ClientInbound::Payload { channel, payload } => payloads.push((channel, payload)),
                ClientInbound::Disconnected(kind) => {
                    self.connected = false;
                    self.disconnection = Some(kind);
                }
            }
        }
        payloads
    }

    /// Returns every packet received since the last call. Undecodable payloads
    /// are skipped.
    pub fn receive(&mut self) -> Vec<Packet> {
        self.receive_raw()
            .into_iter()
            .filter_map(|(_, payload)| match Packet::decode(&payload) {
                Ok(packet) => Some(packet),
                Err(error) => {
                    warn!("Local client {} received a bad packet: {error}", self.peer);
                    None
                }
            })
            .collect()
    }

    /// Returns `false` once either side disconnected. Server-side disconnections
    /// are seen after [`receive`](Self::receive) drained them.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// How the server disconnected this client, if it did.
    pub fn disconnection(&self) -> Option<DisconnectionType> {
        self.disconnection
    }

    /// Closes the connection.
    pub fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            let _ = self.outbound.send(ServerInbound::Disconnected(self.peer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::packets::PlayerLeave;

    #[test]
    fn connect_send_and_disconnect() {
        let mut transport = LocalTransport::new();
        let mut client = transport.connect();
        client.send(&Packet::from(PlayerLeave { index: 2 }));

        let events = transport.poll();
        assert_eq!(events[0], TransportEvent::Connected(client.peer()));
        assert!(matches!(events[1], TransportEvent::Received { channel: 0, .. }));

        transport.send(client.peer(), 1, Reliability::Reliable, vec![14, 1, 0]);
        transport.disconnect(client.peer(), DisconnectionType::Later);

        assert_eq!(client.receive(), vec![Packet::from(PlayerLeave { index: 1 })]);
        assert!(!client.is_connected());
        assert_eq!(client.disconnection(), Some(DisconnectionType::Later));
    }

    #[test]
    fn client_disconnect_reaches_server_once() {
        let mut transport = LocalTransport::new();
        let mut client = transport.connector().connect();
        client.disconnect();
        client.disconnect();

        let events = transport.poll();
        assert_eq!(
            events,
            vec![
                TransportEvent::Connected(client.peer()),
                TransportEvent::Disconnected(client.peer())
            ]
        );
        client.send_raw(vec![0]);
        assert!(transport.poll().is_empty());
    }
}
