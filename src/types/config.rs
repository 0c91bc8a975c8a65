//! Configuration types
//!
//! Inference and multimodal configuration structures.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Hard configuration errors that cannot be clamped away.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Model path is empty")]
    MissingModelPath,
    #[error("Context size must be greater than zero")]
    ZeroContext,
    #[error("Batch size must be greater than zero")]
    ZeroBatch,
}

/// Parameters for loading a model and generating text from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Path to the GGUF model file
    pub model_path: PathBuf,
    /// Context size in tokens
    pub n_ctx: u32,
    /// Layers to offload to the GPU (negative = all layers)
    pub n_gpu_layers: i32,
    /// Logical batch size for prompt processing
    pub n_batch: u32,
    /// Physical micro-batch size
    pub n_ubatch: u32,
    /// Maximum number of tokens to generate
    pub n_predict: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    /// Sampling seed (None = random)
    pub seed: Option<u32>,
    pub use_mmap: bool,
    pub use_mlock: bool,
    /// Worker threads (None = hardware concurrency)
    pub n_threads: Option<u32>,
    /// Forward llama.cpp's own log output.
    ///
    /// Fixed by the first model loaded in the process; later values are ignored.
    pub engine_logs: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            n_ctx: 4096,
            n_gpu_layers: -1,
            n_batch: 512,
            n_ubatch: 512,
            n_predict: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            seed: None,
            use_mmap: true,
            use_mlock: false,
            n_threads: None,
            engine_logs: false,
        }
    }
}

impl InferenceConfig {
    /// Create a config for the given model with default parameters
    pub fn for_model(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Self::default()
        }
    }

    /// Reject values the engine cannot work with at all.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.model_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingModelPath);
        }
        if self.n_ctx == 0 {
            return Err(ConfigError::ZeroContext);
        }
        if self.n_batch == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        Ok(())
    }

    /// Validate sampling and batching values
    ///
    /// Out-of-range values are clamped rather than rejected.
    pub fn validate(&mut self) {
        let temperature = self.temperature.clamp(0.0, 2.0);
        if temperature != self.temperature {
            tracing::warn!("Temperature {} out of range, using {}", self.temperature, temperature);
            self.temperature = temperature;
        }

        let top_p = self.top_p.clamp(0.0, 1.0);
        if top_p != self.top_p {
            tracing::warn!("top_p {} out of range, using {}", self.top_p, top_p);
            self.top_p = top_p;
        }

        if self.top_k <= 0 {
            tracing::warn!("top_k {} is not positive, using 40", self.top_k);
            self.top_k = 40;
        }

        let max_predict = self.n_ctx.max(1);
        let n_predict = self.n_predict.clamp(1, max_predict);
        if n_predict != self.n_predict {
            tracing::warn!("n_predict {} out of range, using {}", self.n_predict, n_predict);
            self.n_predict = n_predict;
        }

        if self.n_ubatch == 0 || self.n_ubatch > self.n_batch {
            tracing::warn!(
                "n_ubatch {} must be in 1..={}, using {}",
                self.n_ubatch,
                self.n_batch,
                self.n_batch
            );
            self.n_ubatch = self.n_batch;
        }
    }

    /// Number of worker threads to hand to the engine
    pub fn effective_threads(&self) -> u32 {
        crate::system::resources::resolve_threads(self.n_threads)
    }

    /// GPU layer count in the engine's unsigned form; negative means all layers.
    pub fn gpu_layers_for_engine(&self) -> u32 {
        u32::try_from(self.n_gpu_layers).unwrap_or(u32::MAX)
    }
}

/// Configuration for image-conditioned generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultimodalConfig {
    #[serde(flatten)]
    pub inference: InferenceConfig,
    /// Path to the vision projector ("mmproj") file
    pub clip_model_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InferenceConfig::default();
        assert_eq!(config.n_ctx, 4096);
        assert_eq!(config.n_gpu_layers, -1);
        assert_eq!(config.n_batch, 512);
        assert_eq!(config.n_predict, 512);
        assert_eq!(config.top_k, 40);
        assert!(config.seed.is_none());
        assert!(config.use_mmap);
        assert!(!config.use_mlock);
    }

    #[test]
    fn test_check_rejects_missing_model() {
        let config = InferenceConfig::default();
        assert!(matches!(config.check(), Err(ConfigError::MissingModelPath)));

        let mut config = InferenceConfig::for_model("model.gguf");
        assert!(config.check().is_ok());

        config.n_ctx = 0;
        assert!(matches!(config.check(), Err(ConfigError::ZeroContext)));
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = InferenceConfig::for_model("model.gguf");
        config.temperature = 5.0;
        config.top_p = -0.5;
        config.top_k = 0;
        config.n_predict = 100_000;
        config.n_ubatch = 1024;
        config.validate();

        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.top_p, 0.0);
        assert_eq!(config.top_k, 40);
        assert_eq!(config.n_predict, config.n_ctx);
        assert_eq!(config.n_ubatch, config.n_batch);
    }

    #[test]
    fn test_gpu_layers_negative_means_all() {
        let mut config = InferenceConfig::default();
        assert_eq!(config.gpu_layers_for_engine(), u32::MAX);
        config.n_gpu_layers = 20;
        assert_eq!(config.gpu_layers_for_engine(), 20);
    }

    #[test]
    fn test_config_serialization() {
        let config = InferenceConfig::for_model("models/llama.gguf");
        let json = serde_json::to_string(&config).expect("Failed to serialize");
        let deserialized: InferenceConfig =
            serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: InferenceConfig =
            serde_json::from_str(r#"{"model_path": "m.gguf", "n_ctx": 2048}"#).unwrap();
        assert_eq!(config.n_ctx, 2048);
        assert_eq!(config.top_k, 40);
    }

    #[test]
    fn test_multimodal_config_flattens() {
        let config: MultimodalConfig = serde_json::from_str(
            r#"{"model_path": "llava.gguf", "clip_model_path": "mmproj.gguf", "n_predict": 64}"#,
        )
        .unwrap();
        assert_eq!(config.inference.model_path, PathBuf::from("llava.gguf"));
        assert_eq!(config.inference.n_predict, 64);
        assert_eq!(config.clip_model_path, Some(PathBuf::from("mmproj.gguf")));
    }
}
