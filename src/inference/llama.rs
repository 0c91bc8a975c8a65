//! llama.cpp backend
//!
//! Pass-through to `llama-cpp-2`: model and context creation, batched decode,
//! the sampling chain and the tokenizer all live in the engine.
//!
//! Tokenizing and rendering pieces go straight to `llama-cpp-sys-2`: the safe
//! wrapper always parses special tokens and drops byte-fallback pieces.

use crate::inference::backend::{DecodeSession, ModelBackend, TokenId};
use crate::inference::engine::EngineError;
use crate::inference::model::validate_gguf;
use crate::system::resources::warn_if_model_exceeds_memory;
use crate::types::InferenceConfig;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_sys_2::{llama_model, llama_vocab};
use once_cell::sync::OnceCell;
use std::ffi::c_char;
use std::num::NonZeroU32;
use std::ptr::NonNull;

/// Seed value that makes the dist sampler pick a random seed
const LLAMA_DEFAULT_SEED: u32 = 0xFFFF_FFFF;

/// Initial piece buffer; longer pieces are retried at the reported size.
const PIECE_BUFFER_LEN: usize = 32;

// `LlamaModel` is `#[repr(transparent)]` over its model pointer.
const _: () =
    assert!(std::mem::size_of::<LlamaModel>() == std::mem::size_of::<NonNull<llama_model>>());

struct SharedBackend {
    backend: LlamaBackend,
    engine_logs: bool,
}

// llama.cpp's backend may only be initialized once per process.
static LLAMA_BACKEND: OnceCell<SharedBackend> = OnceCell::new();

fn shared_backend(engine_logs: bool) -> Result<&'static LlamaBackend, EngineError> {
    let shared = LLAMA_BACKEND.get_or_try_init(|| {
        let mut backend =
            LlamaBackend::init().map_err(|e| EngineError::Backend(e.to_string()))?;
        if !engine_logs {
            backend.void_logs();
        }
        tracing::debug!("llama.cpp backend initialized");
        Ok::<_, EngineError>(SharedBackend {
            backend,
            engine_logs,
        })
    })?;

    if shared.engine_logs != engine_logs {
        tracing::debug!(
            "engine_logs = {} ignored, backend already initialized with engine_logs = {}",
            engine_logs,
            shared.engine_logs
        );
    }
    Ok(&shared.backend)
}

/// Call a llama.cpp fill-buffer function, growing the buffer once when it
/// reports the size it needs as a negative count.
fn fill_with_retry<T, F>(initial_len: usize, mut fill: F) -> Result<Vec<T>, i32>
where
    T: Default + Clone,
    F: FnMut(&mut [T]) -> i32,
{
    let mut buf = vec![T::default(); initial_len];
    let mut n = fill(&mut buf);
    if n < 0 {
        buf.resize(n.unsigned_abs() as usize, T::default());
        n = fill(&mut buf);
    }
    let len = usize::try_from(n).map_err(|_| n)?;
    buf.truncate(len);
    Ok(buf)
}

fn context_params(config: &InferenceConfig) -> LlamaContextParams {
    let threads = i32::try_from(config.effective_threads()).unwrap_or(i32::MAX);
    LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(config.n_ctx))
        .with_n_batch(config.n_batch)
        .with_n_ubatch(config.n_ubatch)
        .with_n_threads(threads)
        .with_n_threads_batch(threads)
}

/// A GGUF model loaded into llama.cpp
pub struct LlamaCppBackend {
    model: LlamaModel,
    name: String,
    n_ctx: usize,
    size_bytes: u64,
}

impl LlamaCppBackend {
    /// Load the model and create a probe context to check the context settings.
    pub fn load(config: &InferenceConfig) -> Result<Self, EngineError> {
        let header = validate_gguf(&config.model_path)?;
        warn_if_model_exceeds_memory(header.file_size);

        let backend = shared_backend(config.engine_logs)?;

        let model_params = LlamaModelParams::default()
            .with_n_gpu_layers(config.gpu_layers_for_engine())
            .with_use_mlock(config.use_mlock);
        if !config.use_mmap {
            tracing::warn!(
                "use_mmap = false is not exposed by the bindings, model will be memory-mapped"
            );
        }

        tracing::info!("Loading model from: {}", config.model_path.display());
        let model = LlamaModel::load_from_file(backend, &config.model_path, &model_params)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        let n_ctx = {
            let ctx = model
                .new_context(backend, context_params(config))
                .map_err(|e| EngineError::ContextCreate(e.to_string()))?;
            ctx.n_ctx() as usize
        };

        let name = model
            .meta_val_str("general.name")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| {
                config
                    .model_path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

        tracing::debug!(
            "{}: {} threads, {} gpu layers requested",
            name,
            config.effective_threads(),
            config.n_gpu_layers
        );

        Ok(Self {
            model,
            name,
            n_ctx,
            size_bytes: header.file_size,
        })
    }

    fn vocab(&self) -> *const llama_vocab {
        // SAFETY: `LlamaModel` is a transparent wrapper around a non-null
        // `llama_model` pointer that stays valid while `self.model` lives.
        let raw = unsafe { *std::ptr::from_ref(&self.model).cast::<NonNull<llama_model>>() };
        unsafe { llama_cpp_sys_2::llama_model_get_vocab(raw.as_ptr()) }
    }

    fn sampler(config: &InferenceConfig) -> LlamaSampler {
        LlamaSampler::chain_simple([
            LlamaSampler::top_k(config.top_k),
            LlamaSampler::top_p(config.top_p, 1),
            LlamaSampler::temp(config.temperature),
            LlamaSampler::dist(config.seed.unwrap_or(LLAMA_DEFAULT_SEED)),
        ])
    }
}

impl ModelBackend for LlamaCppBackend {
    /// Special-token text in `text` (e.g. `</s>`) is tokenized as plain text.
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<TokenId>, EngineError> {
        let text_len = i32::try_from(text.len())
            .map_err(|_| EngineError::Tokenize(format!("{} bytes of text", text.len())))?;
        let vocab = self.vocab();

        fill_with_retry(text.len() + 2, |tokens: &mut [TokenId]| unsafe {
            llama_cpp_sys_2::llama_tokenize(
                vocab,
                text.as_ptr().cast::<c_char>(),
                text_len,
                tokens.as_mut_ptr(),
                i32::try_from(tokens.len()).unwrap_or(i32::MAX),
                add_bos,
                false,
            )
        })
        .map_err(|n| EngineError::Tokenize(format!("llama_tokenize returned {n}")))
    }

    /// Raw piece bytes. Byte-fallback tokens (`<0xF0>`) yield their single byte.
    fn token_to_piece(&self, token: TokenId) -> Result<Vec<u8>, EngineError> {
        let vocab = self.vocab();
        fill_with_retry(PIECE_BUFFER_LEN, |buf: &mut [u8]| unsafe {
            llama_cpp_sys_2::llama_token_to_piece(
                vocab,
                token,
                buf.as_mut_ptr().cast::<c_char>(),
                i32::try_from(buf.len()).unwrap_or(i32::MAX),
                0,
                false,
            )
        })
        .map_err(|n| {
            EngineError::Detokenize(format!("llama_token_to_piece returned {n} for token {token}"))
        })
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        self.model.is_eog_token(LlamaToken::new(token))
    }

    fn model_name(&self) -> String {
        self.name.clone()
    }

    fn context_size(&self) -> usize {
        self.n_ctx
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn new_session(
        &self,
        config: &InferenceConfig,
    ) -> Result<Box<dyn DecodeSession + '_>, EngineError> {
        let backend = shared_backend(config.engine_logs)?;
        let ctx = self
            .model
            .new_context(backend, context_params(config))
            .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

        Ok(Box::new(LlamaSession {
            ctx,
            sampler: Self::sampler(config),
            batch: LlamaBatch::new(config.n_batch as usize, 1),
            n_batch: config.n_batch as usize,
            n_past: 0,
        }))
    }
}

struct LlamaSession<'m> {
    ctx: LlamaContext<'m>,
    sampler: LlamaSampler,
    batch: LlamaBatch,
    n_batch: usize,
    n_past: i32,
}

impl LlamaSession<'_> {
    fn push(&mut self, token: TokenId, logits: bool) -> Result<(), EngineError> {
        self.batch
            .add(LlamaToken::new(token), self.n_past, &[0], logits)
            .map_err(|e| EngineError::Decode(format!("Failed to build batch: {e}")))?;
        self.n_past += 1;
        Ok(())
    }
}

impl DecodeSession for LlamaSession<'_> {
    fn prefill(&mut self, tokens: &[TokenId]) -> Result<(), EngineError> {
        let last = tokens.len().checked_sub(1).ok_or(EngineError::EmptyPrompt)?;

        // Only the final prompt token needs logits.
        for (chunk_index, chunk) in tokens.chunks(self.n_batch).enumerate() {
            self.batch.clear();
            for (offset, &token) in chunk.iter().enumerate() {
                let index = chunk_index * self.n_batch + offset;
                self.push(token, index == last)?;
            }
            self.ctx
                .decode(&mut self.batch)
                .map_err(|e| EngineError::Decode(format!("Failed to decode prompt: {e}")))?;
        }
        Ok(())
    }

    fn sample(&mut self) -> Result<TokenId, EngineError> {
        // The chain's sample() also accepts the token.
        let token = self.sampler.sample(&self.ctx, self.batch.n_tokens() - 1);
        Ok(token.0)
    }

    fn feed(&mut self, token: TokenId) -> Result<(), EngineError> {
        self.batch.clear();
        self.push(token, true)?;
        self.ctx
            .decode(&mut self.batch)
            .map_err(|e| EngineError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_with_retry_fits_first_time() {
        let mut calls = 0;
        let out = fill_with_retry(8, |buf: &mut [i32]| {
            calls += 1;
            buf[..3].copy_from_slice(&[1, 2, 3]);
            3
        })
        .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_fill_with_retry_grows_to_reported_size() {
        let piece = b"a long piece that overflows";
        let out = fill_with_retry(4, |buf: &mut [u8]| {
            if buf.len() < piece.len() {
                return -(piece.len() as i32);
            }
            buf[..piece.len()].copy_from_slice(piece);
            piece.len() as i32
        })
        .unwrap();
        assert_eq!(out, piece.to_vec());
    }

    #[test]
    fn test_fill_with_retry_empty_and_failure() {
        assert_eq!(fill_with_retry(4, |_: &mut [u8]| 0).unwrap(), Vec::<u8>::new());
        // Still too small after growing.
        assert_eq!(fill_with_retry(4, |_: &mut [u8]| -64), Err(-64));
    }

    #[test]
    fn test_backend_initialized_once() {
        let first = shared_backend(false).unwrap();
        let second = shared_backend(true).unwrap();
        assert!(std::ptr::eq(first, second));
    }

    /// Needs a real SentencePiece model, e.g.
    /// `DECOPLAN_TEST_MODEL=models/llava-v1.6-mistral-7b.Q4_K_M.gguf`.
    #[test]
    #[ignore = "requires DECOPLAN_TEST_MODEL"]
    fn test_tokenizer_against_real_model() {
        let Ok(path) = std::env::var("DECOPLAN_TEST_MODEL") else {
            return;
        };
        let mut config = InferenceConfig::for_model(path);
        config.n_ctx = 256;
        config.n_gpu_layers = 0;
        let backend = LlamaCppBackend::load(&config).unwrap();

        // "</s>" stays text instead of becoming the EOS control token.
        let eos = backend.model.token_eos().0;
        let tokens = backend.tokenize("a</s>b", false).unwrap();
        assert!(!tokens.contains(&eos));
        assert!(tokens.len() > 2);

        // Byte-fallback pieces reassemble into the original text.
        let tokens = backend.tokenize("🦀 蟹", false).unwrap();
        let bytes: Vec<u8> = tokens
            .iter()
            .flat_map(|&t| backend.token_to_piece(t).unwrap())
            .collect();
        assert_eq!(String::from_utf8(bytes).unwrap().trim_start(), "🦀 蟹");
    }
}
