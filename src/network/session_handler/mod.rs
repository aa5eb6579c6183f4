//! # Session Handlers
//!
//! The protocol state machine of a session. Each state has its own handler:
//!
//! - `initial`: the authentication handshake
//! - `player`: gameplay packets of an authenticated session
//!
//! Handlers never return errors to their caller. Protocol failures end in a
//! graceful or an immediate disconnection of the offending session and nothing
//! else.

use log::warn;

use crate::server_state::ServerInstance;

use super::{
    protocol::{Packet, PacketDecodeError},
    session::{NetworkSession, SessionState},
    transport::DisconnectionType,
};

pub mod initial;
pub mod player;

/// Decodes one payload and hands it to the handler of the session's state.
pub fn handle_payload(session: &mut NetworkSession, payload: &[u8], instance: &mut ServerInstance) {
    let decoded = Packet::decode(payload);
    match session.state() {
        SessionState::Initial => initial::handle(session, decoded, instance),
        SessionState::Player(index) => match decoded {
            Ok(packet) => player::handle(session, index, packet, instance),
            Err(error) => kick(session, &error),
        },
    }
}

/// Disconnects a session at once for a packet it should never have sent.
pub(crate) fn kick(session: &NetworkSession, error: &PacketDecodeError) {
    warn!("Kicking peer {}: {error}", session.peer());
    session.disconnect(DisconnectionType::Kick);
}

/// Disconnects a session at once for a well-formed packet that is not valid in
/// its current state.
pub(crate) fn kick_unexpected(session: &NetworkSession, packet: &Packet) {
    warn!(
        "Kicking peer {}: unexpected {} packet",
        session.peer(),
        packet.kind()
    );
    session.disconnect(DisconnectionType::Kick);
}
