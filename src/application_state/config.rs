//! # Server Configuration
//!
//! The server reads a JSON file into [`ServerConfig`]. Every field has a
//! default, so a partial file (or no file at all) is a valid configuration.
//!
//! ```json
//! {
//!     "bind_address": "0.0.0.0:29536",
//!     "save_interval_secs": 60,
//!     "planet_chunk_count": [3, 3, 3]
//! }
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::transport::tcp::MAX_FRAME_LEN;

/// Upper bound on the non-voxel bytes of a framed `ChunkCreate`.
const CHUNK_CREATE_OVERHEAD: usize = 64;

/// Failure to load a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The file is not valid JSON for a configuration.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Settings of a server process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    pub bind_address: String,
    /// Directory chunk files are saved in.
    pub save_directory: PathBuf,
    /// Seconds between two automatic saves.
    pub save_interval_secs: u64,
    /// Seed of the world generator.
    pub world_seed: u64,
    /// Number of chunks of the planet along each axis.
    pub planet_chunk_count: [u32; 3],
    /// Dimensions of every chunk, in voxels.
    pub chunk_size: [u32; 3],
    /// Edge length of one voxel.
    pub block_size: f32,
    /// Radius of the rounded planet corners, in world units.
    pub planet_corner_radius: f32,
    /// Skip ticks while no player is connected.
    pub pause_when_empty: bool,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Background worker threads. 0 picks one less than the available cores.
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:29536".to_string(),
            save_directory: PathBuf::from("save/chunks"),
            save_interval_secs: 30,
            world_seed: 42,
            planet_chunk_count: [5, 5, 5],
            chunk_size: [32, 32, 32],
            block_size: 1.0,
            planet_corner_radius: 16.0,
            pause_when_empty: true,
            tick_rate: 30,
            worker_threads: 0,
        }
    }
}

impl ServerConfig {
    /// Loads a configuration file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_json(&contents).map_err(|source| match source {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive"));
        }
        if self.save_interval_secs == 0 {
            return Err(ConfigError::Invalid("save_interval_secs must be positive"));
        }
        if self.chunk_size.contains(&0) {
            return Err(ConfigError::Invalid("chunk_size must be positive on every axis"));
        }
        if self.chunk_size.iter().any(|extent| *extent > 256) {
            return Err(ConfigError::Invalid("chunk_size may not exceed 256 on any axis"));
        }
        let volume: usize = self.chunk_size.iter().map(|extent| *extent as usize).product();
        if volume + CHUNK_CREATE_OVERHEAD > MAX_FRAME_LEN {
            return Err(ConfigError::Invalid("chunk_size volume exceeds the frame limit"));
        }
        if !(self.block_size > 0.0) {
            return Err(ConfigError::Invalid("block_size must be positive"));
        }
        if self.planet_corner_radius < 0.0 {
            return Err(ConfigError::Invalid("planet_corner_radius may not be negative"));
        }
        Ok(())
    }

    /// Duration of one simulation tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    /// Time between two automatic saves.
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    /// Number of worker threads to start.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|cores| cores.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }
}
