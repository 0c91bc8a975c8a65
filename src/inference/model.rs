//! Model file validation
//!
//! Reads the GGUF header so bad paths fail with a clear error before the
//! engine gets to see them.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Magic bytes at the start of every GGUF file
pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// GGUF container versions the engine can read
const SUPPORTED_VERSIONS: [u32; 2] = [2, 3];

/// magic + version + tensor count + metadata count
const HEADER_LEN: u64 = 4 + 4 + 8 + 8;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),
    #[error("File is too small to be a GGUF model: {0}")]
    TooSmall(PathBuf),
    #[error("Not a GGUF file (bad magic {found:?}): {path}")]
    InvalidMagic { path: PathBuf, found: [u8; 4] },
    #[error("Unsupported GGUF version {version}: {path}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Header fields of a GGUF file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_count: u64,
    pub file_size: u64,
}

/// Check that `path` points at a readable GGUF file and return its header.
pub fn validate_gguf(path: impl AsRef<Path>) -> Result<GgufMetadata, ModelError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ModelError::NotFound(path.to_path_buf()));
    }

    let file_size = std::fs::metadata(path)?.len();
    if file_size < HEADER_LEN {
        return Err(ModelError::TooSmall(path.to_path_buf()));
    }

    let mut reader = File::open(path)?;

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != GGUF_MAGIC {
        return Err(ModelError::InvalidMagic {
            path: path.to_path_buf(),
            found: magic,
        });
    }

    let version = read_u32(&mut reader)?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(ModelError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        });
    }

    let tensor_count = read_u64(&mut reader)?;
    let metadata_count = read_u64(&mut reader)?;

    tracing::debug!(
        "GGUF v{} header: {} tensors, {} metadata entries ({} bytes)",
        version,
        tensor_count,
        metadata_count,
        file_size
    );

    Ok(GgufMetadata {
        version,
        tensor_count,
        metadata_count,
        file_size,
    })
}

fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(reader: &mut impl Read) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
pub(crate) fn write_test_gguf(path: &Path, version: u32) {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(GGUF_MAGIC);
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&7u64.to_le_bytes());
    bytes.extend_from_slice(&3u64.to_le_bytes());
    std::fs::write(path, bytes).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.gguf");
        write_test_gguf(&path, 3);

        let meta = validate_gguf(&path).unwrap();
        assert_eq!(meta.version, 3);
        assert_eq!(meta.tensor_count, 7);
        assert_eq!(meta.metadata_count, 3);
        assert_eq!(meta.file_size, HEADER_LEN);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_gguf(dir.path().join("nope.gguf")).unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let mut bytes = b"GGML".to_vec();
        bytes.resize(24, 0);
        std::fs::write(&path, bytes).unwrap();

        let err = validate_gguf(&path).unwrap_err();
        assert!(matches!(err, ModelError::InvalidMagic { found, .. } if &found == b"GGML"));
    }

    #[test]
    fn test_unsupported_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.gguf");
        write_test_gguf(&path, 1);

        let err = validate_gguf(&path).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedVersion { version: 1, .. }));
    }

    #[test]
    fn test_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.gguf");
        std::fs::write(&path, GGUF_MAGIC).unwrap();

        assert!(matches!(validate_gguf(&path), Err(ModelError::TooSmall(_))));
    }
}
