use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face detection and embedding backend.
///
/// Implementations are driven from a single worker thread, hence `&mut self`.
pub trait FaceEmbedder: Send {
    /// Detect faces, most confident first.
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedError>;

    /// One embedding per box, in the same order as `boxes`.
    fn embed(&mut self, image: &RgbImage, boxes: &[BoundingBox])
        -> Result<Vec<Embedding>, EmbedError>;

    /// Distance between two embeddings from this backend, compared against the
    /// match tolerance. Euclidean unless the backend has a better scale.
    fn distance(&self, probe: &Embedding, known: &Embedding) -> f32 {
        probe.distance(known)
    }
}
