//! # Transports
//!
//! A transport moves opaque payloads between the server and its peers. Sessions
//! never block on it: [`Transport::poll`] returns whatever arrived since the last
//! call and [`Transport::send`] only queues.
//!
//! ## Implementations
//! - `LocalTransport`: in-process channels, used by tests and embedded clients
//! - `TcpTransport`: length-framed TCP with one reader and one writer thread per peer

use super::protocol::Reliability;

pub mod local;
pub mod tcp;

pub use local::{LocalClient, LocalConnector, LocalTransport};
pub use tcp::TcpTransport;

/// Identifies a peer of a transport.
pub type PeerId = u32;

/// How a peer is disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectionType {
    /// Deliver what was already sent, then close.
    Later,
    /// Close at once.
    Kick,
}

/// Something that happened on a transport since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer connected.
    Connected(PeerId),
    /// A peer sent a message.
    Received {
        /// Sender.
        peer: PeerId,
        /// Channel the message arrived on.
        channel: u8,
        /// Encoded packet.
        payload: Vec<u8>,
    },
    /// A peer went away.
    Disconnected(PeerId),
}

/// Non-blocking message transport.
pub trait Transport {
    /// Returns the events since the last call.
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Queues a payload for a peer. Unknown peers are ignored.
    fn send(&mut self, peer: PeerId, channel: u8, reliability: Reliability, payload: Vec<u8>);

    /// Disconnects a peer.
    fn disconnect(&mut self, peer: PeerId, kind: DisconnectionType);
}
