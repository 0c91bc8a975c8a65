//! Persistent storage
//!
//! This module handles config persistence and model downloads.

pub mod huggingface;
pub mod settings;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not determine the data directory")]
    NoDataDir,
}

/// Platform data directory for this application
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("", "", "decoplan")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}
