#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Voxel Server
//!
//! The authoritative core of a multiplayer voxel game server.
//!
//! The server owns a deformed voxel planet, simulates it at a fixed tick rate,
//! and keeps every connected client's partial view of the world in sync over a
//! small binary protocol.
//!
//! ## Key Modules
//!
//! * `application_state` - Process lifecycle: configuration, command line and run loop
//! * `core` - Shared containers and concurrency primitives
//! * `network` - Protocol codec, transports, sessions and the handshake state machine
//! * `server_state` - Voxel chunks, environments, players and background tasks
//!
//! ## Architecture
//!
//! The simulation runs on a single thread. Collider rebuilds and saves are
//! published to a worker pool and their results are applied back on the
//! simulation thread at the start of a tick. Superseded rebuilds are cancelled,
//! so a burst of edits to one chunk costs one applied rebuild.
//!
//! ## Usage
//!
//! ```no_run
//! fn main() -> anyhow::Result<()> {
//!     voxel_server::run()
//! }
//! ```

use anyhow::Context;
use clap::Parser;
use log::{info, LevelFilter};

use application_state::{command_line::Args, config::ServerConfig, ApplicationState};

pub mod application_state;
pub mod core;
pub mod network;
pub mod server_state;

/// Starts the server and blocks until it is stopped.
pub fn run() -> anyhow::Result<()> {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .filter_level(LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized");

    let args = Args::parse();
    let mut config = ServerConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    args.apply(&mut config);

    let mut state = ApplicationState::new(&config)?;
    state.watch_console();
    info!("Type `{}` to save and exit", application_state::STOP_COMMAND);
    state.run();
    Ok(())
}
