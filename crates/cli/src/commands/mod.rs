pub mod api;
pub mod config_cmd;
pub mod events;
pub mod generate;
pub mod serve;

use contextrelay_config::{AppConfig, ConfigError};
use std::path::{Path, PathBuf};

/// Load configuration from `--config` when given, else the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
}

pub fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}
