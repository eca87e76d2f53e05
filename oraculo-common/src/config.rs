//! Configuration file discovery and database path resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Application folder name under the platform config/data directories
pub const APP_DIR: &str = "oraculo";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "ORACULO_CONFIG";

/// Environment variable naming an explicit database file
pub const DATABASE_ENV_VAR: &str = "ORACULO_DATABASE";

/// Config file resolution, first hit wins:
/// 1. Command-line argument
/// 2. `ORACULO_CONFIG` environment variable
/// 3. `<config_dir>/oraculo/config.toml`, when the file exists
///
/// Returns `None` when no file is configured; callers run on defaults.
/// An explicitly named file that does not exist is a configuration error.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = cli_arg {
        return require_exists(path.to_path_buf()).map(Some);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return require_exists(PathBuf::from(path)).map(Some);
        }
    }

    Ok(default_config_file().filter(|p| p.exists()))
}

fn require_exists(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {}", path.display())))
    }
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Database file resolution, first hit wins:
/// 1. Command-line argument
/// 2. `ORACULO_DATABASE` environment variable
/// 3. `database_path` from the TOML config
/// 4. OS-dependent default under the local data directory
pub fn resolve_database_path(cli_arg: Option<&Path>, config_value: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = config_value {
        return path.to_path_buf();
    }

    default_data_folder().join("oraculo.db")
}

/// Get OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./oraculo_data"))
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}
