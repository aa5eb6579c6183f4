//! Command-line arguments of the server binary.

use std::path::PathBuf;

use clap::Parser;

use super::config::ServerConfig;

/// Arguments of the `voxel-server` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "voxel-server", about = "Authoritative voxel world server")]
pub struct Args {
    /// JSON configuration file. Missing files fall back to the defaults.
    #[arg(long, default_value = "server.json")]
    pub config: PathBuf,
    /// Overrides the configured listen address.
    #[arg(long)]
    pub bind: Option<String>,
    /// Overrides the configured save directory.
    #[arg(long)]
    pub save_dir: Option<PathBuf>,
}

impl Args {
    /// Applies the overrides given on the command line.
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(save_dir) = &self.save_dir {
            config.save_directory = save_dir.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_configured_values() {
        let args = Args::parse_from(["voxel-server", "--bind", "127.0.0.1:4000", "--save-dir", "/tmp/w"]);
        assert_eq!(args.config, PathBuf::from("server.json"));

        let mut config = ServerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.bind_address, "127.0.0.1:4000");
        assert_eq!(config.save_directory, PathBuf::from("/tmp/w"));
    }

    #[test]
    fn no_overrides_keep_the_file_values() {
        let args = Args::parse_from(["voxel-server", "--config", "other.json"]);
        let mut config = ServerConfig::default();
        args.apply(&mut config);
        assert_eq!(config, ServerConfig::default());
        assert_eq!(args.config, PathBuf::from("other.json"));
    }
}
