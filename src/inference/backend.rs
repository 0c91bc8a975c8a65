//! Engine seam
//!
//! Everything the wrapper needs from an inference engine, split into the loaded
//! model (shared, read-only) and a per-generation decode session.

use crate::inference::engine::EngineError;
use crate::types::InferenceConfig;

/// Vocabulary index as used by the engine
pub type TokenId = i32;

/// A loaded model
pub trait ModelBackend: Send + Sync {
    /// Convert text to token ids, optionally prepending the BOS token.
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<TokenId>, EngineError>;

    /// Raw bytes of a single token. May be an incomplete UTF-8 sequence.
    fn token_to_piece(&self, token: TokenId) -> Result<Vec<u8>, EngineError>;

    /// End-of-generation check (EOS, EOT and friends)
    fn is_end_of_generation(&self, token: TokenId) -> bool;

    fn model_name(&self) -> String;

    /// Context size in tokens of the sessions this backend creates
    fn context_size(&self) -> usize;

    /// Model file size in bytes, when known
    fn size_bytes(&self) -> u64 {
        0
    }

    /// Start a generation with a fresh context and sampling chain.
    fn new_session(
        &self,
        config: &InferenceConfig,
    ) -> Result<Box<dyn DecodeSession + '_>, EngineError>;
}

/// One autoregressive generation
pub trait DecodeSession {
    /// Evaluate the prompt tokens.
    fn prefill(&mut self, tokens: &[TokenId]) -> Result<(), EngineError>;

    /// Sample the next token from the last evaluated position.
    fn sample(&mut self) -> Result<TokenId, EngineError>;

    /// Evaluate a generated token so the next one can be sampled.
    fn feed(&mut self, token: TokenId) -> Result<(), EngineError>;
}
