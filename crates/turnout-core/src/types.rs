use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label shown for a detected face that matches nobody in the directory.
pub const UNRECOGNIZED: &str = "Unrecognized";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Fixed-length face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two embeddings. Always non-negative.
    ///
    /// Vectors of different length are compared over their common prefix.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity in [-1, 1]. Zero when either vector is all zeros.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// `1 - similarity`, in [0, 2].
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// A registered user: display identity plus the reference photo (encoded image bytes).
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub identity: String,
    pub photo: Vec<u8>,
}

/// Directory entry derived from a [`UserRecord`] at load time.
#[derive(Debug, Clone)]
pub struct KnownFace {
    pub identity: String,
    pub embedding: Embedding,
}

/// One row of the attendance log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: i64,
    pub identity: String,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    /// Wall-clock time, `HH:MM:SS`.
    pub time: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("name must not be empty")]
    Empty,
    #[error("name must not contain digits: {0:?}")]
    ContainsDigits(String),
    #[error("name {0:?} is reserved")]
    Reserved(String),
}

/// Check a user name before registration.
///
/// Returns the trimmed name on success.
pub fn validate_identity(name: &str) -> Result<&str, IdentityError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(IdentityError::Empty);
    }
    if name.chars().any(char::is_numeric) {
        return Err(IdentityError::ContainsDigits(name.to_string()));
    }
    if name.eq_ignore_ascii_case(UNRECOGNIZED) {
        return Err(IdentityError::Reserved(name.to_string()));
    }
    Ok(name)
}
