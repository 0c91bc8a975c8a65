//! Shared type definitions
//!
//! Configuration and model metadata shared across the crate.

pub mod config;
pub mod model;

pub use config::{ConfigError, InferenceConfig, MultimodalConfig};
pub use model::ModelInfo;
