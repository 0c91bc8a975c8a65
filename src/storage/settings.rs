//! Config file storage
//!
//! Loads and saves inference configuration as JSON.

use crate::storage::{get_data_dir, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Path of the config file used when none is given on the command line
pub fn default_config_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("config.json"))
}

/// Load a config from an explicit path
///
/// A missing file yields defaults; a corrupt file is an error.
pub fn load_config<T>(path: &Path) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::info!("Config file {} not found, using defaults", path.display());
        return Ok(T::default());
    }

    let json = fs::read_to_string(path)?;
    let config = serde_json::from_str(&json)?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load the config from the default location
///
/// Returns defaults if the file doesn't exist or is corrupted
pub fn load_default_config<T>() -> T
where
    T: DeserializeOwned + Default,
{
    match default_config_path() {
        Ok(path) => load_config_or_default(&path),
        Err(e) => {
            tracing::warn!("Failed to locate config, using defaults: {}", e);
            T::default()
        }
    }
}

fn load_config_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    load_config(path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config {}, using defaults: {}", path.display(), e);
        T::default()
    })
}

/// Save a config to disk
pub fn save_config<T: Serialize>(path: &Path, config: &T) -> Result<(), StorageError> {
    // Ensure the parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;

    tracing::debug!("Saved config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InferenceConfig, MultimodalConfig};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config: InferenceConfig = load_config(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, InferenceConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = InferenceConfig::for_model("models/llava.gguf");
        config.n_ctx = 2048;
        config.seed = Some(42);
        save_config(&path, &config).unwrap();

        let loaded: InferenceConfig = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let result: Result<InferenceConfig, _> = load_config(&path);
        assert!(matches!(result, Err(StorageError::Json(_))));
    }

    #[test]
    fn test_corrupt_implicit_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config: InferenceConfig = load_config_or_default(&path);
        assert_eq!(config, InferenceConfig::default());
    }

    #[test]
    fn test_multimodal_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mm.json");
        let config = MultimodalConfig {
            inference: InferenceConfig::for_model("llava.gguf"),
            clip_model_path: Some(PathBuf::from("mmproj-model-f16.gguf")),
        };
        save_config(&path, &config).unwrap();

        let loaded: MultimodalConfig = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
