//! # Network Module
//!
//! Everything between the simulation and the wire.
//!
//! ## Key Components
//! - `protocol`: packet catalog and binary codec
//! - `transport`: non-blocking message transports (in-process and TCP)
//! - `session`: per-connection protocol state and outgoing queue
//! - `session_handler`: the handshake and gameplay state machine
//! - `session_manager`: ties a transport's peers to sessions
//!
//! ## Flow
//! A [`SessionManager`] is polled once per server update. Received payloads are
//! decoded and handled against the [`ServerInstance`](crate::server_state::ServerInstance),
//! which queues replies in session outboxes. The manager flushes those outboxes
//! to its transport at the end of the update.

pub mod protocol;
pub mod session;
pub mod session_handler;
pub mod session_manager;
pub mod transport;

pub use session::{NetworkSession, SessionOutbox, SessionState};
pub use session_manager::SessionManager;
pub use transport::{DisconnectionType, PeerId, Transport, TransportEvent};
