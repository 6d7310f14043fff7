//! ONNX model manifest and integrity checks.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which network a model file feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Detector,
    Recognizer,
}

/// A downloadable model: file name, source URL, expected SHA-256, display size.
pub struct ModelSpec {
    pub role: ModelRole,
    pub file_name: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

// insightface buffalo_l pack; digests taken from the Git LFS pointers.
pub const MODEL_SPECS: &[ModelSpec] = &[
    ModelSpec {
        role: ModelRole::Detector,
        file_name: "det_10g.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
        sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
        size_display: "16 MB",
    },
    ModelSpec {
        role: ModelRole::Recognizer,
        file_name: "w600k_r50.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx",
        sha256: "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
        size_display: "166 MB",
    },
];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} — run `turnout setup`")]
    Missing(PathBuf),
    #[error("cannot read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Path of the model with the given role inside `model_dir`.
pub fn model_path(model_dir: &Path, role: ModelRole) -> PathBuf {
    let spec = MODEL_SPECS
        .iter()
        .find(|m| m.role == role)
        .unwrap_or(&MODEL_SPECS[0]);
    model_dir.join(spec.file_name)
}

/// Hex SHA-256 of a file, streamed in 64 KiB chunks.
pub fn sha256_hex(path: &Path) -> Result<String, ModelError> {
    let io_err = |source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check that `path` exists and hashes to `expected`.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), ModelError> {
    if !path.exists() {
        return Err(ModelError::Missing(path.to_path_buf()));
    }
    let actual = sha256_hex(path)?;
    if actual != expected {
        return Err(ModelError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Names of manifest models that are absent from `model_dir`.
pub fn missing_models(model_dir: &Path) -> Vec<&'static str> {
    MODEL_SPECS
        .iter()
        .filter(|m| !model_dir.join(m.file_name).exists())
        .map(|m| m.file_name)
        .collect()
}
