//! Describe an image with a vision-language model.
//!
//! Without a usable projector the model answers from the prompt alone.

use anyhow::{Context, Result};
use clap::Parser;
use decoplan_llm::cli::GenerationArgs;
use decoplan_llm::{logging, MultimodalConfig, MultimodalProcessor};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "multimodal-inference",
    about = "Image + text generation with a local GGUF model",
    version
)]
struct Cli {
    /// Path to the GGUF language model
    model_path: PathBuf,

    /// Image to describe
    image_path: PathBuf,

    /// Prompt text
    #[arg(default_value = "Describe this image in detail.")]
    prompt: String,

    /// Vision projector (mmproj) GGUF
    #[arg(long)]
    mmproj: Option<PathBuf>,

    #[command(flatten)]
    generation: GenerationArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.generation.verbose);

    let config = MultimodalConfig {
        inference: cli.generation.resolve(&cli.model_path)?,
        clip_model_path: cli.mmproj.clone(),
    };

    let mut processor = MultimodalProcessor::new();
    processor
        .initialize(config)
        .with_context(|| format!("Failed to initialize model {}", cli.model_path.display()))?;

    println!("Image: {}", cli.image_path.display());
    println!("Prompt: {}", cli.prompt);
    if let Some(requested) = &processor.config().clip_model_path {
        if processor.projector_path().is_none() {
            eprintln!("(projector {} could not be used)", requested.display());
        }
    }
    if !processor.has_vision() {
        eprintln!("(text-only mode: the image does not condition the output)");
    }
    println!("\n--- output ---");

    let mut stdout = std::io::stdout();
    let stats = processor.generate_from_image_streaming(&cli.image_path, &cli.prompt, |text| {
        print!("{text}");
        let _ = stdout.flush();
    })?;
    println!();

    eprintln!(
        "[{} tokens, {:.1} tok/s, stop: {:?}]",
        stats.generated_tokens,
        stats.tokens_per_second(),
        stats.stop_reason
    );

    processor.cleanup();
    Ok(())
}
