//! # Application State Management
//!
//! This module handles the server process lifecycle, including:
//! - Configuration loading and command-line overrides
//! - Building the simulation and its network listener
//! - The run loop and an orderly shutdown

pub mod command_line;
pub mod config;

use std::{
    io::{self, BufRead},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use anyhow::Context;
use log::{info, warn};

use crate::{
    core::StResource,
    network::{transport::TcpTransport, SessionManager},
    server_state::{
        task_management::TaskManager,
        voxels::{
            block::BlockLibrary, collider::VoxelBoxColliderBuilder,
            generation::FlatWorldGenerator, persistence::FileChunkStorage,
        },
        ServerInstance, ServerServices,
    },
};

use config::ServerConfig;

/// Console command that stops the server.
pub const STOP_COMMAND: &str = "stop";

/// A running server process.
///
/// Owns the simulation and the flag that ends its run loop.
pub struct ApplicationState {
    /// The simulation and its sessions
    pub instance: ServerInstance,

    /// Set to end the run loop
    pub stop: Arc<AtomicBool>,

    /// Timestamp of the last update, for elapsed time calculations
    pub last_update_time: web_time::Instant,
}

impl ApplicationState {
    /// Builds the server described by `config` and starts listening.
    ///
    /// # Arguments
    /// * `config` - Validated server settings
    ///
    /// # Returns
    /// The ready application, or the first setup step that failed
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let workers = config.resolved_worker_threads();
        info!("Starting {workers} task worker(s)");

        let services = ServerServices {
            task_manager: StResource::new(TaskManager::new(workers)),
            storage: Arc::new(FileChunkStorage::new(config.save_directory.clone())),
            generator: Box::new(FlatWorldGenerator::new(config.world_seed)),
            collider_builder: Arc::new(VoxelBoxColliderBuilder),
            block_library: Arc::new(BlockLibrary::standard()),
        };
        let mut instance =
            ServerInstance::new(config, services).context("failed to build the planet")?;

        let transport = TcpTransport::bind(config.bind_address.as_str())
            .with_context(|| format!("failed to bind {}", config.bind_address))?;
        info!("Listening on {}", transport.local_addr());
        instance.add_session_manager(SessionManager::new(Box::new(transport)));

        Ok(Self {
            instance,
            stop: Arc::new(AtomicBool::new(false)),
            last_update_time: web_time::Instant::now(),
        })
    }

    /// Stops the run loop when `stop` is typed on standard input.
    pub fn watch_console(&self) {
        let stop = self.stop.clone();
        let watcher = thread::Builder::new()
            .name("console".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if line.trim() == STOP_COMMAND {
                        stop.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            });
        if let Err(error) = watcher {
            warn!("Console watcher unavailable: {error}");
        }
    }

    /// Updates the server until the stop flag is set, then shuts down.
    pub fn run(&mut self) {
        self.last_update_time = web_time::Instant::now();
        while !self.stop.load(Ordering::Relaxed) {
            let now = web_time::Instant::now();
            let elapsed = now - self.last_update_time;
            self.last_update_time = now;

            let wait = self.instance.update(elapsed);
            thread::sleep(wait);
        }
        self.instance.shutdown();
    }
}
