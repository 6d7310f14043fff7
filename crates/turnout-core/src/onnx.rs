use crate::detector::FaceDetector;
use crate::models::{model_path, ModelRole};
use crate::provider::{EmbedError, FaceEmbedder};
use crate::recognizer::FaceRecognizer;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;

/// Distance between two ArcFace embeddings: `1 - cosine similarity`.
///
/// At the default tolerance of 0.6 a match needs cosine similarity >= 0.4.
pub fn arcface_distance(probe: &Embedding, known: &Embedding) -> f32 {
    probe.cosine_distance(known)
}

/// [`FaceEmbedder`] backed by the SCRFD detector and the ArcFace recognizer.
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedError> {
        let det_path = model_path(model_dir, ModelRole::Detector);
        let rec_path = model_path(model_dir, ModelRole::Recognizer);

        let detector = FaceDetector::load(&det_path.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&rec_path.to_string_lossy())?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, EmbedError> {
        boxes
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(EmbedError::from))
            .collect()
    }

    fn distance(&self, probe: &Embedding, known: &Embedding) -> f32 {
        arcface_distance(probe, known)
    }
}
