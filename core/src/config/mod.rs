//! Configuration management
//!
//! One immutable `Config` is built at startup and shared by reference with
//! every session. Nothing in the streaming core reads the environment.

pub mod store;

pub use store::{
    Config, IndexConfig, PipelineBackend, PipelineConfig, ServerConfig, StreamConfig,
    WorkerConfig,
};

use std::path::PathBuf;

/// File name looked up in the working directory and the config directory
pub const CONFIG_FILE_NAME: &str = "crewstream.toml";

/// Prefix of environment overrides, e.g. `CREWSTREAM__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "CREWSTREAM";

/// Find the configuration file in standard locations
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        let path = cwd.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(dir) = get_config_dir() {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Get the configuration directory path
pub fn get_config_dir() -> Option<PathBuf> {
    if let Some(dir) = dirs::config_dir() {
        return Some(dir.join("crewstream"));
    }

    dirs::home_dir().map(|home| home.join(".config").join("crewstream"))
}

/// Default location used by `config init` when no path is given
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Default download location for the embedding model
pub fn get_model_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("crewstream").join("models"))
}
