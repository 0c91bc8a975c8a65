//! Load a GGUF model and complete a single prompt.

use anyhow::{Context, Result};
use clap::Parser;
use decoplan_llm::cli::GenerationArgs;
use decoplan_llm::storage::huggingface::format_size;
use decoplan_llm::{logging, GenerationStats, LlmWrapper, StreamToken};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "simple-inference",
    about = "Text generation with a local GGUF model",
    version
)]
struct Cli {
    /// Path to the GGUF model
    model_path: PathBuf,

    /// Prompt text
    #[arg(default_value = "Hello! Please tell me about yourself.")]
    prompt: String,

    /// Print tokens as they are generated
    #[arg(long)]
    stream: bool,

    #[command(flatten)]
    generation: GenerationArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.generation.verbose);

    let config = cli.generation.resolve(&cli.model_path)?;

    let mut llm = LlmWrapper::new();
    llm.initialize(config)
        .with_context(|| format!("Failed to initialize model {}", cli.model_path.display()))?;

    match llm.model_info() {
        Some(info) => {
            println!("Model: {} ({})", info.name, format_size(info.size_bytes));
            println!("Context size: {}", info.context_size);
        }
        None => anyhow::bail!("Model not loaded"),
    }
    println!("Prompt: {}", cli.prompt);
    println!("\n--- output ---");

    if cli.stream {
        let (tokens, _stop) = llm.generate_stream(&cli.prompt)?;
        let mut stdout = std::io::stdout();
        for token in tokens {
            match token {
                StreamToken::Token(text) => {
                    print!("{text}");
                    stdout.flush()?;
                }
                StreamToken::Done(stats) => {
                    println!();
                    print_stats(&stats);
                }
                StreamToken::Error(e) => anyhow::bail!("Generation failed: {e}"),
            }
        }
    } else {
        let output = llm.generate(&cli.prompt)?;
        println!("{output}");
    }

    llm.cleanup();
    Ok(())
}

fn print_stats(stats: &GenerationStats) {
    eprintln!(
        "[{} prompt tokens, {} generated, {:.1} tok/s, stop: {:?}]",
        stats.prompt_tokens,
        stats.generated_tokens,
        stats.tokens_per_second(),
        stats.stop_reason
    );
}
