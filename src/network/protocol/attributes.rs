//! Per-packet delivery attributes.

use std::collections::HashMap;

use super::packets::PacketKind;

/// Delivery guarantee of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// Delivered in order, retransmitted if lost.
    Reliable,
    /// May be dropped.
    Unreliable,
}

/// Channel and reliability a packet kind is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketAttributes {
    /// Logical channel.
    pub channel: u8,
    /// Delivery guarantee.
    pub reliability: Reliability,
}

impl PacketAttributes {
    /// Reliable delivery on `channel`.
    pub const fn reliable(channel: u8) -> Self {
        Self {
            channel,
            reliability: Reliability::Reliable,
        }
    }

    /// Unreliable delivery on `channel`.
    pub const fn unreliable(channel: u8) -> Self {
        Self {
            channel,
            reliability: Reliability::Unreliable,
        }
    }
}

impl Default for PacketAttributes {
    fn default() -> Self {
        Self::reliable(0)
    }
}

/// Immutable map from packet kind to delivery attributes. Built once and shared
/// by every session of a session manager.
#[derive(Debug, Clone)]
pub struct PacketAttributeTable {
    entries: HashMap<PacketKind, PacketAttributes>,
}

impl PacketAttributeTable {
    /// Builds a table from explicit entries. Unlisted kinds use channel 0, reliable.
    pub fn new(entries: impl IntoIterator<Item = (PacketKind, PacketAttributes)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Attributes used by the server.
    ///
    /// Session and roster messages go reliable on channel 0. World replication goes
    /// on channel 1, reliable except for state updates, which are superseded
    /// every tick.
    pub fn server_defaults() -> Self {
        use PacketKind::*;
        Self::new([
            (AuthResponse, PacketAttributes::reliable(0)),
            (ChatMessage, PacketAttributes::reliable(0)),
            (GameData, PacketAttributes::reliable(0)),
            (PlayerJoin, PacketAttributes::reliable(0)),
            (PlayerLeave, PacketAttributes::reliable(0)),
            (NetworkStrings, PacketAttributes::reliable(0)),
            (ChunkCreate, PacketAttributes::reliable(1)),
            (ChunkDestroy, PacketAttributes::reliable(1)),
            (ChunkUpdate, PacketAttributes::reliable(1)),
            (EntitiesCreation, PacketAttributes::reliable(1)),
            (EntitiesDelete, PacketAttributes::reliable(1)),
            (EntitiesStateUpdate, PacketAttributes::unreliable(1)),
        ])
    }

    /// Attributes of `kind`.
    pub fn get(&self, kind: PacketKind) -> PacketAttributes {
        self.entries.get(&kind).copied().unwrap_or_default()
    }
}
