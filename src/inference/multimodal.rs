//! Image-conditioned generation
//!
//! No vision encoder is wired in yet: the projector file is checked, the
//! image is verified, and generation runs on the text prompt alone.

use crate::inference::backend::ModelBackend;
use crate::inference::engine::{EngineError, GenerationStats, LlmWrapper};
use crate::inference::model::validate_gguf;
use crate::types::MultimodalConfig;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Multimodal processor not initialized")]
    NotInitialized,
    #[error("Failed to load image: {path}: {source}")]
    Image { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Image container detected from the file's leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
    Unknown,
}

impl ImageFormat {
    pub fn sniff(header: &[u8]) -> Self {
        match header {
            [0x89, b'P', b'N', b'G', ..] => Self::Png,
            [0xFF, 0xD8, 0xFF, ..] => Self::Jpeg,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Self::Webp,
            [b'G', b'I', b'F', b'8', ..] => Self::Gif,
            [b'B', b'M', ..] => Self::Bmp,
            _ => Self::Unknown,
        }
    }
}

/// A verified image file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub path: PathBuf,
    pub format: ImageFormat,
    pub size_bytes: u64,
}

/// How the user prompt is wrapped before generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Prompt passed through unchanged
    Plain,
    /// LLaVA chat format with an image placeholder
    Llava,
}

impl PromptStyle {
    pub fn format(self, prompt: &str) -> String {
        match self {
            Self::Plain => prompt.to_string(),
            Self::Llava => format!("USER: <image>\n{prompt}\nASSISTANT: "),
        }
    }
}

/// Verify an image exists and is readable, and identify its format.
pub fn load_image(path: impl AsRef<Path>) -> Result<ImageInput, ProcessorError> {
    let path = path.as_ref();
    let image_error = |source| ProcessorError::Image {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(image_error)?;
    let size_bytes = file.metadata().map_err(image_error)?.len();

    let mut header = [0u8; 12];
    let read = file.read(&mut header).map_err(image_error)?;
    let format = ImageFormat::sniff(&header[..read]);
    if format == ImageFormat::Unknown {
        tracing::warn!("Unrecognized image format: {}", path.display());
    }

    tracing::info!("Image file verified: {} ({:?}, {} bytes)", path.display(), format, size_bytes);
    Ok(ImageInput {
        path: path.to_path_buf(),
        format,
        size_bytes,
    })
}

/// Text model plus an optional vision projector
#[derive(Default)]
pub struct MultimodalProcessor {
    llm: Option<LlmWrapper>,
    projector: Option<PathBuf>,
    config: MultimodalConfig,
}

impl MultimodalProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, config: MultimodalConfig) -> Result<(), ProcessorError> {
        self.cleanup();
        let mut llm = LlmWrapper::new();
        llm.initialize(config.inference.clone())?;
        self.finish_init(llm, config);
        Ok(())
    }

    /// Initialize on top of a caller-provided text backend.
    pub fn initialize_with_backend(
        &mut self,
        config: MultimodalConfig,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<(), ProcessorError> {
        self.cleanup();
        let mut llm = LlmWrapper::new();
        llm.initialize_with_backend(config.inference.clone(), backend)?;
        self.finish_init(llm, config);
        Ok(())
    }

    fn finish_init(&mut self, llm: LlmWrapper, config: MultimodalConfig) {
        if let Some(clip_path) = &config.clip_model_path {
            tracing::info!("Loading vision encoder from: {}", clip_path.display());
            match validate_gguf(clip_path) {
                Ok(_) => self.projector = Some(clip_path.clone()),
                Err(e) => tracing::warn!("Vision projector unusable: {}", e),
            }
        }
        if !self.has_vision() {
            tracing::warn!("Vision encoder not loaded, running in text-only mode");
        }
        self.llm = Some(llm);
        self.config = config;
    }

    pub fn cleanup(&mut self) {
        self.projector = None;
        if let Some(mut llm) = self.llm.take() {
            llm.cleanup();
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.llm.as_ref().is_some_and(LlmWrapper::is_loaded)
    }

    /// Whether images actually condition generation.
    ///
    /// Always false until a vision encoder backend exists; a validated
    /// projector is only recorded.
    pub fn has_vision(&self) -> bool {
        false
    }

    /// Projector file recorded at initialization, if it validated
    pub fn projector_path(&self) -> Option<&Path> {
        self.projector.as_deref()
    }

    pub fn config(&self) -> &MultimodalConfig {
        &self.config
    }

    fn prompt_style(&self) -> PromptStyle {
        if self.has_vision() {
            PromptStyle::Llava
        } else {
            PromptStyle::Plain
        }
    }

    fn prepare(
        &self,
        image_path: &Path,
        prompt: &str,
    ) -> Result<(&LlmWrapper, String), ProcessorError> {
        let llm = self
            .llm
            .as_ref()
            .filter(|llm| llm.is_loaded())
            .ok_or(ProcessorError::NotInitialized)?;
        load_image(image_path)?;
        Ok((llm, self.prompt_style().format(prompt)))
    }

    pub fn generate_from_image(
        &self,
        image_path: impl AsRef<Path>,
        prompt: &str,
    ) -> Result<String, ProcessorError> {
        let (llm, full_prompt) = self.prepare(image_path.as_ref(), prompt)?;
        Ok(llm.generate(&full_prompt)?)
    }

    pub fn generate_from_image_streaming<F>(
        &self,
        image_path: impl AsRef<Path>,
        prompt: &str,
        callback: F,
    ) -> Result<GenerationStats, ProcessorError>
    where
        F: FnMut(&str),
    {
        let (llm, full_prompt) = self.prepare(image_path.as_ref(), prompt)?;
        Ok(llm.generate_streaming(&full_prompt, callback)?)
    }
}
