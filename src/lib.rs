//! decoplan LLM library
//!
//! Local GGUF inference on top of llama.cpp: a text generation wrapper, a
//! multimodal processor that degrades to text-only, and a model downloader.

pub mod cli;
pub mod inference;
pub mod logging;
pub mod storage;
pub mod system;
pub mod types;

pub use inference::{
    EngineError, GenerationStats, LlmWrapper, MultimodalProcessor, ProcessorError, StopReason,
    StreamToken,
};
pub use types::{InferenceConfig, ModelInfo, MultimodalConfig};
