//! Command-line options shared by the inference binaries

use crate::storage::settings::{load_config, load_default_config};
use crate::storage::StorageError;
use crate::types::InferenceConfig;
use clap::Args;
use std::path::{Path, PathBuf};

/// Generation overrides layered on top of the config file
#[derive(Debug, Clone, Default, Args)]
pub struct GenerationArgs {
    /// JSON config file (defaults to the one in the data directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Context size in tokens
    #[arg(long = "ctx")]
    pub n_ctx: Option<u32>,

    /// Maximum tokens to generate
    #[arg(short = 'n', long)]
    pub n_predict: Option<u32>,

    /// Sampling temperature
    #[arg(long = "temp")]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub top_k: Option<i32>,

    /// Layers to offload to the GPU (-1 = all)
    #[arg(long, allow_hyphen_values = true)]
    pub gpu_layers: Option<i32>,

    #[arg(long)]
    pub seed: Option<u32>,

    /// Worker threads (default: hardware concurrency)
    #[arg(long)]
    pub threads: Option<u32>,

    /// Prompt batch size
    #[arg(long)]
    pub batch: Option<u32>,

    /// Lock the model in RAM
    #[arg(long)]
    pub mlock: bool,

    /// Forward llama.cpp's own log output
    #[arg(long)]
    pub engine_logs: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl GenerationArgs {
    /// Copy every flag that was given onto `config`.
    pub fn apply(&self, config: &mut InferenceConfig) {
        if let Some(n_ctx) = self.n_ctx {
            config.n_ctx = n_ctx;
        }
        if let Some(n_predict) = self.n_predict {
            config.n_predict = n_predict;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(top_p) = self.top_p {
            config.top_p = top_p;
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(layers) = self.gpu_layers {
            config.n_gpu_layers = layers;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.threads.is_some() {
            config.n_threads = self.threads;
        }
        if let Some(batch) = self.batch {
            config.n_batch = batch;
            config.n_ubatch = config.n_ubatch.min(batch);
        }
        if self.mlock {
            config.use_mlock = true;
        }
        if self.engine_logs {
            config.engine_logs = true;
        }
    }

    /// Build the config for `model_path`: file first, then flags.
    pub fn resolve(&self, model_path: &Path) -> Result<InferenceConfig, StorageError> {
        let mut config: InferenceConfig = match &self.config {
            Some(path) => load_config(path)?,
            None => load_default_config(),
        };
        config.model_path = model_path.to_path_buf();
        self.apply(&mut config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::settings::save_config;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        generation: GenerationArgs,
    }

    fn parse(args: &[&str]) -> GenerationArgs {
        TestCli::parse_from(std::iter::once("test").chain(args.iter().copied())).generation
    }

    #[test]
    fn test_no_flags_keeps_config() {
        let mut config = InferenceConfig::for_model("m.gguf");
        parse(&[]).apply(&mut config);
        assert_eq!(config, InferenceConfig::for_model("m.gguf"));
    }

    #[test]
    fn test_flags_override() {
        let args = parse(&[
            "--ctx", "2048", "-n", "64", "--temp", "0.2", "--top-k", "10",
            "--gpu-layers", "-1", "--seed", "7", "--batch", "256",
        ]);
        let mut config = InferenceConfig::default();
        args.apply(&mut config);

        assert_eq!(config.n_ctx, 2048);
        assert_eq!(config.n_predict, 64);
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.top_k, 10);
        assert_eq!(config.n_gpu_layers, -1);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.n_batch, 256);
        assert_eq!(config.n_ubatch, 256);
    }

    #[test]
    fn test_resolve_layers_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut stored = InferenceConfig::default();
        stored.n_ctx = 1024;
        stored.top_p = 0.5;
        save_config(&path, &stored).unwrap();

        let config_arg = path.to_string_lossy().into_owned();
        let args = parse(&["--config", &config_arg, "--ctx", "8192"]);
        let config = args.resolve(Path::new("model.gguf")).unwrap();

        assert_eq!(config.model_path, PathBuf::from("model.gguf"));
        assert_eq!(config.n_ctx, 8192);
        assert_eq!(config.top_p, 0.5);
    }
}
