//! Authentication handshake.

use log::{info, warn};

use crate::{
    network::{
        protocol::{
            packets::{AuthRequest, AuthResponse, NetworkStrings},
            version::{version_string, MAX_CLIENT_VERSION, MIN_CLIENT_VERSION},
            AuthError, BoundedString, Packet, PacketDecodeError, PacketKind,
        },
        session::NetworkSession,
        transport::DisconnectionType,
    },
    server_state::ServerInstance,
};

use super::{kick, kick_unexpected};

/// Handles a packet of an unauthenticated session.
///
/// Only `AuthRequest` is accepted. A request that fails to decode is answered
/// with a protocol error before closing; anything else is a kick.
pub fn handle(
    session: &mut NetworkSession,
    decoded: Result<Packet, PacketDecodeError>,
    instance: &mut ServerInstance,
) {
    match decoded {
        Ok(Packet::AuthRequest(request)) => authenticate(session, request, instance),
        Ok(packet) => kick_unexpected(session, &packet),
        Err(PacketDecodeError::Deserialization {
            kind: PacketKind::AuthRequest,
            source,
        }) => {
            warn!("Peer {} sent a malformed auth request: {source}", session.peer());
            reject(session, AuthError::ProtocolError);
        }
        Err(error) => kick(session, &error),
    }
}

/// Checks a request against the accepted versions and nickname rules.
pub fn validate(request: &AuthRequest) -> Result<(), AuthError> {
    if request.game_version < MIN_CLIENT_VERSION {
        return Err(AuthError::UpgradeRequired);
    }
    if request.game_version > MAX_CLIENT_VERSION {
        return Err(AuthError::ServerIsOutdated);
    }

    let nickname = request.nickname.as_str();
    let trimmed = nickname.trim();
    if trimmed.is_empty() || trimmed != nickname {
        return Err(AuthError::ProtocolError);
    }
    Ok(())
}

fn authenticate(session: &mut NetworkSession, request: AuthRequest, instance: &mut ServerInstance) {
    info!(
        "Peer {} authenticating as {:?} with version {}",
        session.peer(),
        request.nickname.as_str(),
        version_string(request.game_version)
    );

    if let Err(error) = validate(&request) {
        info!("Peer {} rejected: {error}", session.peer());
        reject(session, error);
        return;
    }

    let Some(index) = instance.create_player(request.nickname, session.outbox().clone()) else {
        warn!("No player slot left for peer {}", session.peer());
        reject(session, AuthError::ProtocolError);
        return;
    };

    session.authenticate(index, request.game_version);
    session.send(&Packet::from(AuthResponse { result: Ok(index) }));
    session.send(&Packet::from(NetworkStrings {
        start_id: 0,
        strings: instance
            .block_library()
            .names()
            .map(BoundedString::truncated)
            .collect(),
    }));
    instance.respawn_player(index);
}

fn reject(session: &NetworkSession, error: AuthError) {
    session.send(&Packet::from(AuthResponse { result: Err(error) }));
    session.disconnect(DisconnectionType::Later);
}
