//! # Players
//!
//! Everything the server keeps per connected player.
//!
//! ## Key Components
//! - `ServerPlayer`: identity, input queue, controlled character and environment membership
//! - `SessionVisibilityHandler`: what the player's client believes exists, and the
//!   packets that keep it in sync
//! - `PlayerInputs`: one frame of client input

pub mod player_inputs;
pub mod server_player;
pub mod visibility;

pub use player_inputs::{InputIndex, PlayerInputs};
pub use server_player::ServerPlayer;
pub use visibility::{SessionVisibilityHandler, VisibilitySource};

/// Stable index of a player in the server's player pool.
pub type PlayerIndex = u16;
