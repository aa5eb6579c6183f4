//! # Voxel Server Entry Point
//!
//! Calls into the library's `run()` function to load the configuration and
//! start the server.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release -- --config server.json
//! ```

fn main() -> anyhow::Result<()> {
    voxel_server::run()
}
