//! Model types
//!
//! Describes a loaded model as reported by the engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Information about a loaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Display name of the model
    pub name: String,
    /// Path to the GGUF file
    pub path: PathBuf,
    /// Model file size in bytes
    pub size_bytes: u64,
    /// Context size of the engine context, in tokens
    pub context_size: usize,
}
