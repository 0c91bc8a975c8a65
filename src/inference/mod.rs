//! LLM inference engine
//!
//! This module handles all interaction with llama-cpp for model loading and inference.

pub mod backend;
pub mod engine;
pub mod llama;
pub mod model;
pub mod multimodal;
pub mod streaming;

// Re-export main types for convenience
pub use backend::{DecodeSession, ModelBackend, TokenId};
pub use engine::{EngineError, GenerationStats, LlmWrapper, StopReason};
pub use llama::LlamaCppBackend;
pub use model::{validate_gguf, GgufMetadata, ModelError, GGUF_MAGIC};
pub use multimodal::{
    load_image, ImageFormat, ImageInput, MultimodalProcessor, ProcessorError, PromptStyle,
};
pub use streaming::{StreamToken, TokenUtf8Buffer};
