//! HuggingFace model downloader
//!
//! Downloads GGUF models (and vision projectors) from HuggingFace Hub.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Could not parse HuggingFace URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid model filename: {0:?}")]
    InvalidFilename(String),
    #[error("Unknown model '{0}'")]
    UnknownModel(String),
    #[error("No GGUF files found in {0}")]
    NoGgufFiles(String),
    #[error("Multiple GGUF files found. Please specify one of: {}", .0.join(", "))]
    AmbiguousFile(Vec<String>),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Download failed with status: {0}")]
    Status(reqwest::StatusCode),
    #[error("Download incomplete: got {got} bytes, expected {expected}")]
    Incomplete { got: u64, expected: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a HuggingFace URL to extract model info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuggingFaceUrl {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
}

fn sanitize_local_filename(filename: &str) -> Result<String, DownloadError> {
    let invalid = || DownloadError::InvalidFilename(filename.to_string());
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let no_query = trimmed.split('?').next().unwrap_or(trimmed);
    let no_fragment = no_query.split('#').next().unwrap_or(no_query);
    let no_leading = no_fragment.trim_start_matches('/');

    let flattened = no_leading.replace('\\', "/").replace('/', "__");

    let mut sanitized: String = flattened
        .chars()
        .map(|ch| {
            let reserved = matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*');
            if reserved || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        return Err(invalid());
    }

    Ok(sanitized)
}

impl HuggingFaceUrl {
    /// Parse various HuggingFace URL formats
    ///
    /// 1. https://huggingface.co/user/repo/blob/main/model.gguf
    /// 2. https://huggingface.co/user/repo/resolve/main/model.gguf
    /// 3. user/repo/model.gguf
    /// 4. user/repo
    pub fn parse(url: &str) -> Result<Self, DownloadError> {
        let url = url.trim();
        let url = url.split('?').next().unwrap_or(url);
        let url = url.split('#').next().unwrap_or(url);

        let path = url
            .strip_prefix("https://huggingface.co/")
            .or_else(|| url.strip_prefix("http://huggingface.co/"))
            .unwrap_or(url);
        let is_full_url = path.len() != url.len();

        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return Err(DownloadError::InvalidUrl(url.to_string()));
        }
        let repo_id = format!("{}/{}", parts[0], parts[1]);

        if is_full_url {
            // Check if specific file mentioned
            if let Some(marker) = parts.iter().position(|&p| p == "blob" || p == "resolve") {
                if parts.len() > marker + 2 {
                    return Ok(Self {
                        repo_id,
                        filename: parts[marker + 2..].join("/"),
                        revision: parts[marker + 1].to_string(),
                    });
                }
            }
            return Ok(Self {
                repo_id,
                filename: String::new(),
                revision: "main".to_string(),
            });
        }

        Ok(Self {
            repo_id,
            filename: parts[2..].join("/"),
            revision: "main".to_string(),
        })
    }

    /// Build the download URL for `filename` in this repo
    pub fn download_url(&self, filename: &str) -> String {
        format!(
            "https://huggingface.co/{}/resolve/{}/{}",
            self.repo_id, self.revision, filename
        )
    }
}

/// Quantization levels published for the catalogued models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Quantization {
    #[default]
    Q4KM,
    Q5KM,
    Q6K,
    Q8_0,
}

impl Quantization {
    pub const ALL: [Quantization; 4] = [Self::Q4KM, Self::Q5KM, Self::Q6K, Self::Q8_0];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Q4KM => "Q4_K_M",
            Self::Q5KM => "Q5_K_M",
            Self::Q6K => "Q6_K",
            Self::Q8_0 => "Q8_0",
        }
    }

    /// Rough VRAM needed for a 7B model at this level
    pub fn vram_hint(self) -> &'static str {
        match self {
            Self::Q4KM => "~6-8GB VRAM, good quality",
            Self::Q5KM => "~8-10GB VRAM, better quality",
            Self::Q6K => "~10-12GB VRAM, high quality",
            Self::Q8_0 => "~12-16GB VRAM, highest quality",
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quantization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|q| q.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|q| q.as_str()).collect();
                format!("unknown quantization '{s}', expected one of {}", known.join(", "))
            })
    }
}

/// A model known to work with the inference binaries
#[derive(Debug, Clone, Copy)]
pub struct CatalogModel {
    pub name: &'static str,
    pub repo: &'static str,
    /// File names; `{quant}` is replaced with the quantization level
    pub files: &'static [&'static str],
    pub description: &'static str,
}

impl CatalogModel {
    pub fn file_names(&self, quant: Quantization) -> Vec<String> {
        self.files
            .iter()
            .map(|template| template.replace("{quant}", quant.as_str()))
            .collect()
    }
}

pub const CATALOG: &[CatalogModel] = &[
    CatalogModel {
        name: "llava-1.6-mistral-7b",
        repo: "cjpais/llava-1.6-mistral-7b-gguf",
        files: &["llava-v1.6-mistral-7b.{quant}.gguf", "mmproj-model-f16.gguf"],
        description: "LLaVA 1.6 Mistral 7B - Good balance of quality and speed",
    },
    CatalogModel {
        name: "llava-1.6-34b",
        repo: "cjpais/llava-v1.6-34B-gguf",
        files: &["llava-v1.6-34b.{quant}.gguf", "mmproj-model-f16.gguf"],
        description: "LLaVA 1.6 34B - Best quality, requires 16GB+ VRAM",
    },
    CatalogModel {
        name: "qwen2-vl-7b",
        repo: "Qwen/Qwen2-VL-7B-Instruct-GGUF",
        files: &["qwen2-vl-7b-instruct-{quant}.gguf"],
        description: "Qwen2-VL 7B - Alternative vision model",
    },
];

pub fn find_catalog_model(name: &str) -> Result<&'static CatalogModel, DownloadError> {
    CATALOG
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| DownloadError::UnknownModel(name.to_string()))
}

fn http_client() -> Result<reqwest::Client, DownloadError> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(3600)) // 1 hour timeout for large models
        .user_agent(concat!("decoplan-llm/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Download every file of a catalogued model into `models_dir`.
pub async fn download_catalog_model<F>(
    model: &CatalogModel,
    quant: Quantization,
    models_dir: &Path,
    progress: F,
) -> Result<Vec<PathBuf>, DownloadError>
where
    F: Fn(&str, u64, u64),
{
    let hf_url = HuggingFaceUrl {
        repo_id: model.repo.to_string(),
        filename: String::new(),
        revision: "main".to_string(),
    };

    let mut paths = Vec::new();
    for filename in model.file_names(quant) {
        let path = download_file(&hf_url, &filename, models_dir, |done, total| {
            progress(&filename, done, total)
        })
        .await?;
        paths.push(path);
    }
    Ok(paths)
}

/// Download a model given any URL form accepted by [`HuggingFaceUrl::parse`].
///
/// When the URL names no file, the repository must contain exactly one GGUF file.
pub async fn download_model<F>(
    url: &str,
    models_dir: &Path,
    progress: F,
) -> Result<PathBuf, DownloadError>
where
    F: Fn(u64, u64),
{
    let hf_url = HuggingFaceUrl::parse(url)?;

    let filename = if hf_url.filename.is_empty() {
        let mut files = list_gguf_files(&hf_url.repo_id, &hf_url.revision).await?;
        match files.len() {
            0 => return Err(DownloadError::NoGgufFiles(hf_url.repo_id.clone())),
            1 => files.remove(0),
            _ => return Err(DownloadError::AmbiguousFile(files)),
        }
    } else {
        hf_url.filename.clone()
    };

    download_file(&hf_url, &filename, models_dir, progress).await
}

/// Stream one file into `models_dir`, writing to a `.tmp` file first.
///
/// An existing non-empty file is reused without downloading.
pub async fn download_file<F>(
    hf_url: &HuggingFaceUrl,
    filename: &str,
    models_dir: &Path,
    progress: F,
) -> Result<PathBuf, DownloadError>
where
    F: Fn(u64, u64),
{
    let safe_filename = sanitize_local_filename(filename)?;
    fs::create_dir_all(models_dir)?;

    let output_path = models_dir.join(&safe_filename);
    let temp_path = models_dir.join(format!("{}.tmp", safe_filename));

    // Check if file already exists and has content
    if fs::metadata(&output_path).is_ok_and(|m| m.len() > 0) {
        tracing::info!("Model already exists: {}", output_path.display());
        return Ok(output_path);
    }

    let download_url = hf_url.download_url(filename);
    tracing::info!("Downloading from: {}", download_url);

    let mut response = http_client()?.get(&download_url).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::Status(response.status()));
    }

    let total_size = response.content_length();
    if let Some(total) = total_size {
        tracing::info!("File size: {}", format_size(total));
    }

    save_stream(response, &temp_path, &output_path, total_size, progress).await?;
    tracing::info!("Download complete: {}", output_path.display());

    Ok(output_path)
}

/// Source of downloaded body chunks
trait ChunkSource {
    type Chunk: AsRef<[u8]>;

    async fn next_chunk(&mut self) -> Result<Option<Self::Chunk>, DownloadError>;
}

impl ChunkSource for reqwest::Response {
    type Chunk = bytes::Bytes;

    async fn next_chunk(&mut self) -> Result<Option<Self::Chunk>, DownloadError> {
        Ok(self.chunk().await?)
    }
}

/// Write `source` to `temp_path`, then move it to `output_path`.
///
/// The temp file is removed on every failure.
async fn save_stream<S, F>(
    mut source: S,
    temp_path: &Path,
    output_path: &Path,
    total_size: Option<u64>,
    progress: F,
) -> Result<(), DownloadError>
where
    S: ChunkSource,
    F: Fn(u64, u64),
{
    let result = async {
        let mut temp_file = File::create(temp_path).await?;
        let mut downloaded: u64 = 0;
        while let Some(chunk) = source.next_chunk().await? {
            let chunk = chunk.as_ref();
            temp_file.write_all(chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, total_size.unwrap_or(0));
        }
        temp_file.flush().await?;
        drop(temp_file);

        if let Some(expected) = total_size {
            if downloaded != expected {
                return Err(DownloadError::Incomplete {
                    got: downloaded,
                    expected,
                });
            }
        }
        fs::rename(temp_path, output_path)?;
        Ok::<(), DownloadError>(())
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(temp_path);
    }
    result
}

/// List available GGUF files in a HuggingFace repository
pub async fn list_gguf_files(repo_id: &str, revision: &str) -> Result<Vec<String>, DownloadError> {
    let api_url = format!("https://huggingface.co/api/models/{}/tree/{}", repo_id, revision);

    let response = http_client()?.get(&api_url).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::Status(response.status()));
    }

    let files: Vec<FileInfo> = response.json().await?;
    Ok(files
        .into_iter()
        .filter(|f| f.path.ends_with(".gguf"))
        .map(|f| f.path)
        .collect())
}

#[derive(Debug, serde::Deserialize)]
struct FileInfo {
    path: String,
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_parse_hf_url_full() {
        let url = concat!(
            "https://huggingface.co/cjpais/llava-1.6-mistral-7b-gguf",
            "/blob/main/llava-v1.6-mistral-7b.Q4_K_M.gguf"
        );
        let parsed = HuggingFaceUrl::parse(url).unwrap();
        assert_eq!(parsed.repo_id, "cjpais/llava-1.6-mistral-7b-gguf");
        assert_eq!(parsed.filename, "llava-v1.6-mistral-7b.Q4_K_M.gguf");
        assert_eq!(parsed.revision, "main");
    }

    #[test]
    fn test_parse_hf_url_resolve_with_revision() {
        let url = concat!(
            "https://huggingface.co/Qwen/Qwen2-VL-7B-Instruct-GGUF",
            "/resolve/v1/sub/model.gguf?download=true"
        );
        let parsed = HuggingFaceUrl::parse(url).unwrap();
        assert_eq!(parsed.repo_id, "Qwen/Qwen2-VL-7B-Instruct-GGUF");
        assert_eq!(parsed.revision, "v1");
        assert_eq!(parsed.filename, "sub/model.gguf");
    }

    #[test]
    fn test_parse_hf_url_short() {
        let parsed =
            HuggingFaceUrl::parse("cjpais/llava-v1.6-34B-gguf/mmproj-model-f16.gguf").unwrap();
        assert_eq!(parsed.repo_id, "cjpais/llava-v1.6-34B-gguf");
        assert_eq!(parsed.filename, "mmproj-model-f16.gguf");
    }

    #[test]
    fn test_parse_hf_url_repo_only() {
        let parsed = HuggingFaceUrl::parse("cjpais/llava-v1.6-34B-gguf").unwrap();
        assert_eq!(parsed.filename, "");
        assert!(HuggingFaceUrl::parse("just-a-name").is_err());
    }

    #[test]
    fn test_download_url() {
        let parsed = HuggingFaceUrl::parse("user/repo").unwrap();
        assert_eq!(
            parsed.download_url("m.gguf"),
            "https://huggingface.co/user/repo/resolve/main/m.gguf"
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_local_filename("sub/dir/model.gguf").unwrap(), "sub__dir__model.gguf");
        assert_eq!(sanitize_local_filename("a:b?.gguf").unwrap(), "a_b");
        assert!(sanitize_local_filename("  ").is_err());
        assert!(sanitize_local_filename("...").is_err());
    }

    #[test]
    fn test_catalog_file_names() {
        let model = find_catalog_model("llava-1.6-mistral-7b").unwrap();
        assert_eq!(
            model.file_names(Quantization::Q5KM),
            vec!["llava-v1.6-mistral-7b.Q5_K_M.gguf", "mmproj-model-f16.gguf"]
        );
        assert!(matches!(
            find_catalog_model("gpt-5"),
            Err(DownloadError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_quantization_parse() {
        assert_eq!("q8_0".parse::<Quantization>().unwrap(), Quantization::Q8_0);
        assert_eq!("Q4_K_M".parse::<Quantization>().unwrap(), Quantization::default());
        assert!("Q3".parse::<Quantization>().is_err());
        assert_eq!(Quantization::Q6K.to_string(), "Q6_K");
    }

    struct ScriptedChunks(VecDeque<Result<Vec<u8>, DownloadError>>);

    impl ChunkSource for ScriptedChunks {
        type Chunk = Vec<u8>;

        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DownloadError> {
            self.0.pop_front().transpose()
        }
    }

    fn chunks(items: Vec<Result<Vec<u8>, DownloadError>>) -> ScriptedChunks {
        ScriptedChunks(items.into())
    }

    #[tokio::test]
    async fn test_save_stream_complete() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("m.gguf.tmp");
        let out = dir.path().join("m.gguf");
        let seen = std::cell::RefCell::new(Vec::new());

        let source = chunks(vec![Ok(b"GG".to_vec()), Ok(b"UF".to_vec())]);
        save_stream(source, &temp, &out, Some(4), |done, total| {
            seen.borrow_mut().push((done, total))
        })
        .await
        .unwrap();

        assert_eq!(fs::read(&out).unwrap(), b"GGUF");
        assert!(!temp.exists());
        assert_eq!(seen.into_inner(), vec![(2, 4), (4, 4)]);
    }

    #[tokio::test]
    async fn test_save_stream_read_error_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("m.gguf.tmp");
        let out = dir.path().join("m.gguf");

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let source = chunks(vec![Ok(b"GG".to_vec()), Err(DownloadError::Io(reset))]);
        let err = save_stream(source, &temp, &out, Some(4), |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Io(_)));
        assert!(!temp.exists());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_save_stream_short_body_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("m.gguf.tmp");
        let out = dir.path().join("m.gguf");

        let source = chunks(vec![Ok(b"GG".to_vec())]);
        let err = save_stream(source, &temp, &out, Some(10), |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Incomplete { got: 2, expected: 10 }));
        assert!(!temp.exists());
        assert!(!out.exists());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
