//! Fetch GGUF models for the inference binaries from HuggingFace.

use anyhow::Result;
use clap::Parser;
use decoplan_llm::logging;
use decoplan_llm::storage::huggingface::{
    download_catalog_model, download_model, find_catalog_model, format_size, Quantization,
    CATALOG,
};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "download-model", about = "Download vision-language models", version)]
struct Cli {
    /// Catalog model to download
    #[arg(long, default_value = "llava-1.6-mistral-7b")]
    model: String,

    /// Quantization level (Q4_K_M, Q5_K_M, Q6_K, Q8_0)
    #[arg(long, default_value_t = Quantization::default())]
    quant: Quantization,

    /// Any HuggingFace URL or `user/repo[/file]`, instead of a catalog model
    #[arg(long, conflicts_with = "model")]
    url: Option<String>,

    /// Directory to store models in
    #[arg(long, default_value = "models")]
    models_dir: PathBuf,

    /// List catalog models and exit
    #[arg(long)]
    list: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if cli.list {
        list_catalog();
        return Ok(());
    }

    if let Some(url) = &cli.url {
        let path = download_model(url, &cli.models_dir, |done, total| {
            print_progress(url, done, total)
        })
        .await?;
        eprintln!();
        println!("Downloaded {}", path.display());
        return Ok(());
    }

    let model = find_catalog_model(&cli.model)?;
    println!("Downloading {} ({})", model.name, cli.quant);
    println!("  {}", model.description);

    let paths = download_catalog_model(model, cli.quant, &cli.models_dir, print_progress).await?;
    eprintln!();

    println!("\nDownloaded files:");
    for path in &paths {
        println!("  {} ({})", path.display(), file_size(path));
    }

    if let [model_file, projector] = paths.as_slice() {
        println!("\nRun with:");
        println!(
            "  multimodal-inference {} <image> --mmproj {}",
            model_file.display(),
            projector.display()
        );
    }
    Ok(())
}

fn list_catalog() {
    println!("Available models:");
    for model in CATALOG {
        println!("  {:<22} {}", model.name, model.description);
    }
    println!("\nQuantization levels:");
    for quant in Quantization::ALL {
        println!("  {:<8} {}", quant.as_str(), quant.vram_hint());
    }
}

fn print_progress(name: &str, done: u64, total: u64) {
    if total > 0 {
        let percent = done as f64 / total as f64 * 100.0;
        eprint!(
            "\r{name}: {} / {} ({percent:.1}%)",
            format_size(done),
            format_size(total)
        );
    } else {
        eprint!("\r{name}: {}", format_size(done));
    }
    let _ = std::io::stderr().flush();
}

fn file_size(path: &Path) -> String {
    std::fs::metadata(path)
        .map(|m| format_size(m.len()))
        .unwrap_or_else(|_| "?".to_string())
}
