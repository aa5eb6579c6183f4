//! # Protocol
//!
//! Wire format of the client/server protocol.
//!
//! ## Key Components
//! - `codec`: encoding primitives (compressed integers, bounded strings, optionals)
//! - `packets`: the packet catalog and its opcode framing
//! - `attributes`: per-kind channel and reliability
//! - `version`: game version packing and the accepted client range

pub mod attributes;
pub mod codec;
pub mod packets;
pub mod version;

pub use attributes::{PacketAttributeTable, PacketAttributes, Reliability};
pub use codec::{BoundedString, DecodeError, StringTooLong};
pub use packets::{AuthError, Packet, PacketDecodeError, PacketKind};
