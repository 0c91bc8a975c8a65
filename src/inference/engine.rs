//! Text generation on top of a loaded engine backend
//!
//! `LlmWrapper` owns the loaded model and drives tokenize -> prefill ->
//! sample/feed loops. All tensor work happens inside the backend.

use crate::inference::backend::{ModelBackend, TokenId};
use crate::inference::llama::LlamaCppBackend;
use crate::inference::model::ModelError;
use crate::inference::streaming::{StreamToken, TokenUtf8Buffer};
use crate::types::{ConfigError, InferenceConfig, ModelInfo};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Failed to initialize llama backend: {0}")]
    Backend(String),
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Failed to create context: {0}")]
    ContextCreate(String),
    #[error("Model not loaded")]
    NotLoaded,
    #[error("Prompt produced no tokens")]
    EmptyPrompt,
    #[error("Prompt too long for context size ({tokens} tokens, context holds {n_ctx})")]
    PromptTooLong { tokens: usize, n_ctx: usize },
    #[error("Tokenization failed: {0}")]
    Tokenize(String),
    #[error("Detokenization failed: {0}")]
    Detokenize(String),
    #[error("{0}")]
    Decode(String),
    #[error("Failed to start generation thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Why a generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The model produced an end-of-generation token
    EndOfGeneration,
    /// `n_predict` tokens were generated
    MaxTokens,
    /// No room left in the context window
    ContextFull,
    /// The stop flag was raised
    Cancelled,
    /// The engine failed to evaluate a generated token
    DecodeFailed,
}

/// Counters for a finished generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

impl GenerationStats {
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.generated_tokens as f64 / secs
        } else {
            0.0
        }
    }
}

/// Application-level handle to a loaded model
pub struct LlmWrapper {
    backend: Option<Arc<dyn ModelBackend>>,
    config: InferenceConfig,
}

impl Default for LlmWrapper {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmWrapper {
    pub fn new() -> Self {
        Self {
            backend: None,
            config: InferenceConfig::default(),
        }
    }

    /// Load the model described by `config` through llama.cpp.
    ///
    /// Any previously loaded model is released first.
    pub fn initialize(&mut self, config: InferenceConfig) -> Result<(), EngineError> {
        self.cleanup();
        let config = Self::prepare_config(config)?;
        let backend = LlamaCppBackend::load(&config)?;
        self.install(config, Arc::new(backend));
        Ok(())
    }

    /// Use an already constructed backend instead of loading through llama.cpp.
    pub fn initialize_with_backend(
        &mut self,
        config: InferenceConfig,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<(), EngineError> {
        self.cleanup();
        let config = Self::prepare_config(config)?;
        self.install(config, backend);
        Ok(())
    }

    fn prepare_config(mut config: InferenceConfig) -> Result<InferenceConfig, EngineError> {
        config.check()?;
        config.validate();
        Ok(config)
    }

    fn install(&mut self, config: InferenceConfig, backend: Arc<dyn ModelBackend>) {
        tracing::info!("Model loaded successfully: {}", backend.model_name());
        tracing::info!("Context size: {} tokens", backend.context_size());
        self.config = config;
        self.backend = Some(backend);
    }

    /// Release the model. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if self.backend.take().is_some() {
            tracing::debug!("Model released");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    /// Model description, empty when nothing is loaded
    pub fn model_name(&self) -> String {
        self.backend
            .as_ref()
            .map(|b| b.model_name())
            .unwrap_or_default()
    }

    /// Context size in tokens, 0 when nothing is loaded
    pub fn context_size(&self) -> usize {
        self.backend.as_ref().map_or(0, |b| b.context_size())
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.backend.as_ref().map(|b| ModelInfo {
            name: b.model_name(),
            path: self.config.model_path.clone(),
            size_bytes: b.size_bytes(),
            context_size: b.context_size(),
        })
    }

    fn loaded(&self) -> Result<&Arc<dyn ModelBackend>, EngineError> {
        self.backend.as_ref().ok_or(EngineError::NotLoaded)
    }

    pub fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<TokenId>, EngineError> {
        self.loaded()?.tokenize(text, add_bos)
    }

    /// Concatenate the pieces of `tokens` into text, skipping tokens with no piece.
    pub fn detokenize(&self, tokens: &[TokenId]) -> Result<String, EngineError> {
        let backend = self.loaded()?;
        let mut bytes = Vec::with_capacity(tokens.len() * 4);
        for &token in tokens {
            match backend.token_to_piece(token) {
                Ok(piece) => bytes.extend(piece),
                Err(e) => tracing::warn!("Skipping token {}: {}", token, e),
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Generate a full completion for `prompt`.
    pub fn generate(&self, prompt: &str) -> Result<String, EngineError> {
        let mut output = String::new();
        self.generate_streaming(prompt, |piece| output.push_str(piece))?;
        Ok(output)
    }

    /// Generate, handing each decoded fragment to `callback` as it arrives.
    pub fn generate_streaming<F>(
        &self,
        prompt: &str,
        callback: F,
    ) -> Result<GenerationStats, EngineError>
    where
        F: FnMut(&str),
    {
        let backend = self.loaded()?;
        let tokens = prepare_prompt(backend.as_ref(), prompt)?;
        run_generation(backend.as_ref(), &self.config, &tokens, None, callback)
    }

    /// Generate on a worker thread.
    ///
    /// Fragments arrive as `StreamToken::Token`, followed by exactly one `Done`
    /// or `Error`. Setting the returned flag stops generation after the current
    /// token.
    pub fn generate_stream(
        &self,
        prompt: &str,
    ) -> Result<(Receiver<StreamToken>, Arc<AtomicBool>), EngineError> {
        let backend = Arc::clone(self.loaded()?);
        let tokens = prepare_prompt(backend.as_ref(), prompt)?;
        let config = self.config.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let worker_stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("llm-generate".to_string())
            .spawn(move || {
                let result = run_generation(
                    backend.as_ref(),
                    &config,
                    &tokens,
                    Some(&worker_stop),
                    |piece| {
                        if tx.send(StreamToken::Token(piece.to_string())).is_err() {
                            // Receiver gone, nobody is listening.
                            worker_stop.store(true, Ordering::Relaxed);
                        }
                    },
                );
                let last = match result {
                    Ok(stats) => StreamToken::Done(stats),
                    Err(e) => {
                        tracing::error!("Generation failed: {}", e);
                        StreamToken::Error(e.to_string())
                    }
                };
                let _ = tx.send(last);
            })?;

        Ok((rx, stop))
    }
}

/// Tokenize `prompt` with BOS and check it fits the context.
fn prepare_prompt(backend: &dyn ModelBackend, prompt: &str) -> Result<Vec<TokenId>, EngineError> {
    let tokens = backend.tokenize(prompt, true)?;
    if tokens.is_empty() {
        return Err(EngineError::EmptyPrompt);
    }

    let n_ctx = backend.context_size();
    if tokens.len() > n_ctx {
        return Err(EngineError::PromptTooLong {
            tokens: tokens.len(),
            n_ctx,
        });
    }
    Ok(tokens)
}

fn run_generation<F>(
    backend: &dyn ModelBackend,
    config: &InferenceConfig,
    prompt_tokens: &[TokenId],
    stop: Option<&AtomicBool>,
    mut on_text: F,
) -> Result<GenerationStats, EngineError>
where
    F: FnMut(&str),
{
    let started = Instant::now();
    let n_ctx = backend.context_size();
    let n_predict = config.n_predict as usize;

    let mut session = backend.new_session(config)?;
    session.prefill(prompt_tokens)?;

    let mut utf8 = TokenUtf8Buffer::new();
    let mut n_past = prompt_tokens.len();
    let mut generated = 0usize;

    let stop_reason = loop {
        if generated >= n_predict {
            break StopReason::MaxTokens;
        }
        if stop.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            break StopReason::Cancelled;
        }

        let token = session.sample()?;
        if backend.is_end_of_generation(token) {
            break StopReason::EndOfGeneration;
        }

        match backend.token_to_piece(token) {
            Ok(piece) => {
                if let Some(text) = utf8.push(&piece) {
                    on_text(&text);
                }
            }
            Err(e) => tracing::warn!("Skipping token {}: {}", token, e),
        }
        generated += 1;

        if generated >= n_predict {
            break StopReason::MaxTokens;
        }
        if n_past >= n_ctx {
            tracing::warn!(n_past, n_ctx, "context window full, stopping generation");
            break StopReason::ContextFull;
        }
        if let Err(e) = session.feed(token) {
            tracing::error!("Failed to decode token: {}", e);
            break StopReason::DecodeFailed;
        }
        n_past += 1;
    };

    if let Some(rest) = utf8.flush() {
        on_text(&rest);
    }

    let stats = GenerationStats {
        prompt_tokens: prompt_tokens.len(),
        generated_tokens: generated,
        stop_reason,
        elapsed: started.elapsed(),
    };
    tracing::debug!(
        "Generated {} tokens ({:?}) in {:.2}s, {:.1} tok/s",
        stats.generated_tokens,
        stats.stop_reason,
        stats.elapsed.as_secs_f64(),
        stats.tokens_per_second()
    );
    Ok(stats)
}
