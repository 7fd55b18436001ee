//! # Configuration Module
//!
//! This module handles configuration management and data directory setup for
//! Moodlist. It provides platform-appropriate data storage locations, loads the
//! optional JSON config file and ensures necessary directories exist.
//!
//! ## Data Storage
//!
//! Moodlist stores its database and config in the platform-standard data directory:
//! - Linux: `~/.local/share/moodlist/`
//! - macOS: `~/Library/Application Support/moodlist/`
//! - Windows: `%APPDATA%\moodlist\`
//!
//! ## Config File
//!
//! `config.json` in the data directory. Every field is optional:
//!
//! ```json
//! {
//!   "spotify_client_id": "...",
//!   "spotify_client_secret": "...",
//!   "seed": 42,
//!   "max_iterations": 100,
//!   "refresh_auth_at_start": true
//! }
//! ```
//!
//! Credentials given on the command line or through the environment win over
//! the file.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cluster::KMeansConfig;
use crate::remote::SpotifyCredentials;

/// Returns the Moodlist data directory, creating it if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The moodlist subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let moodlist_dir = data_dir.join("moodlist");
    fs::create_dir_all(&moodlist_dir).with_context(|| {
        format!(
            "Failed to create Moodlist data directory at {}. Please check file permissions.",
            moodlist_dir.display()
        )
    })?;

    Ok(moodlist_dir)
}

/// Returns the platform-appropriate database file path.
///
/// # Examples
///
/// ```no_run
/// use moodlist::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Database location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Errors
///
/// See [`get_data_dir`].
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("moodlist.db"))
}

/// Location of the optional config file.
///
/// # Errors
///
/// See [`get_data_dir`].
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("config.json"))
}

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub seed: Option<u64>,
    pub max_iterations: Option<usize>,
    pub refresh_auth_at_start: Option<bool>,
}

impl FileConfig {
    /// Read a config file. A missing file is an empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON in config file {}", path.display()))
    }
}

/// Configuration for runtime behavior
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// `None` means every song is estimated.
    pub spotify: Option<SpotifyCredentials>,
    pub kmeans: KMeansConfig,
    pub refresh_auth_at_start: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: get_db_path().unwrap_or_else(|_| PathBuf::from("moodlist.db")),
            spotify: None,
            kmeans: KMeansConfig::default(),
            refresh_auth_at_start: true,
        }
    }
}

/// Values that override the config file, typically from CLI flags and env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub seed: Option<u64>,
}

impl RuntimeConfig {
    /// Load `config.json` from the data directory and apply `overrides`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory or config file is unusable.
    pub fn load(overrides: Overrides) -> Result<Self> {
        let file = FileConfig::load(&get_config_path()?)?;
        let db_path = match overrides.db_path.clone() {
            Some(path) => path,
            None => get_db_path()?,
        };
        Ok(Self::from_parts(db_path, file, overrides))
    }

    /// Merge a parsed config file with overrides. Overrides win field by field.
    #[must_use]
    pub fn from_parts(db_path: PathBuf, file: FileConfig, overrides: Overrides) -> Self {
        let client_id = overrides.spotify_client_id.or(file.spotify_client_id);
        let client_secret = overrides.spotify_client_secret.or(file.spotify_client_secret);
        let spotify = match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) if !client_id.is_empty() && !client_secret.is_empty() => {
                Some(SpotifyCredentials {
                    client_id,
                    client_secret,
                })
            }
            _ => None,
        };

        let mut kmeans = KMeansConfig::default();
        if let Some(max_iterations) = file.max_iterations {
            kmeans = kmeans.with_max_iterations(max_iterations);
        }
        if let Some(seed) = overrides.seed.or(file.seed) {
            kmeans = kmeans.with_seed(seed);
        }

        Self {
            db_path,
            spotify,
            kmeans,
            refresh_auth_at_start: file.refresh_auth_at_start.unwrap_or(true),
        }
    }

    /// Create configuration with explicit database path
    pub fn with_db_path(db_path: PathBuf) -> Self {
        Self {
            db_path,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_db_path_returns_valid_path() {
        let path = get_db_path().expect("Should get valid path");
        assert_eq!(path.file_name().unwrap(), "moodlist.db");
        let parent = path.parent().expect("Database path should have parent");
        assert_eq!(parent.file_name().unwrap(), "moodlist");
        assert!(parent.is_dir());
    }

    #[test]
    fn test_missing_config_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, FileConfig::default());
    }

    #[test]
    fn test_config_file_parses_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"seed": 7, "max_iterations": 25}"#).unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_iterations, Some(25));
        assert!(config.spotify_client_id.is_none());
    }

    #[test]
    fn test_invalid_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let file = FileConfig {
            spotify_client_id: Some("file-id".to_string()),
            spotify_client_secret: Some("file-secret".to_string()),
            seed: Some(1),
            max_iterations: Some(10),
            refresh_auth_at_start: Some(false),
        };
        let overrides = Overrides {
            spotify_client_id: Some("cli-id".to_string()),
            seed: Some(99),
            ..Overrides::default()
        };

        let config = RuntimeConfig::from_parts(PathBuf::from("/tmp/x.db"), file, overrides);
        let spotify = config.spotify.unwrap();
        assert_eq!(spotify.client_id, "cli-id");
        assert_eq!(spotify.client_secret, "file-secret");
        assert_eq!(config.kmeans.seed, Some(99));
        assert_eq!(config.kmeans.max_iterations, 10);
        assert!(!config.refresh_auth_at_start);
    }

    #[test]
    fn test_partial_credentials_mean_offline() {
        let file = FileConfig {
            spotify_client_id: Some("only-id".to_string()),
            ..FileConfig::default()
        };
        let config = RuntimeConfig::from_parts(PathBuf::from("x.db"), file, Overrides::default());
        assert!(config.spotify.is_none());
        assert!(config.refresh_auth_at_start);
    }

    #[test]
    fn test_runtime_config_with_db_path() {
        let config = RuntimeConfig::with_db_path(PathBuf::from("/tmp/test.db"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/test.db"));
        assert!(config.spotify.is_none());
    }
}
