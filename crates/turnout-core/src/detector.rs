//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by greedy NMS.
//! Input frames are RGB; the network sees a 640x640 letterboxed copy.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_IOU: f32 = 0.4;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — run `turnout setup`")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let outputs = session.outputs().len();
        if outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model must have 9 outputs (score/bbox/kps per stride), found {outputs}"
            )));
        }

        tracing::info!(path = model_path, outputs, "loaded SCRFD model");
        Ok(Self { session })
    }

    /// Detect faces, most confident first. Coordinates are in `image` pixels.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, scale) = letterbox(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        // Output layout: scores for each stride, then boxes, then keypoints.
        for (i, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[i]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores/{stride}: {e}")))?;
            let (_, boxes) = outputs[i + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes/{stride}: {e}")))?;
            let (_, kps) = outputs[i + 6]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps/{stride}: {e}")))?;

            candidates.extend(decode_stride(scores, boxes, kps, stride, scale)?);
        }

        Ok(non_max_suppression(candidates, SCRFD_NMS_IOU))
    }
}

/// Resize into the top-left corner of a 640x640 canvas and normalise to NCHW.
/// Returns the tensor and the applied scale factor.
fn letterbox(image: &RgbImage) -> (Array4<f32>, f32) {
    let size = SCRFD_INPUT_SIZE;
    let (w, h) = image.dimensions();
    let scale = (size as f32 / w.max(1) as f32).min(size as f32 / h.max(1) as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad = (0.0 - SCRFD_MEAN) / SCRFD_STD;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size as usize, size as usize), pad);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    (tensor, scale)
}

fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: u32,
    scale: f32,
) -> Result<Vec<BoundingBox>, DetectorError> {
    let cells = (SCRFD_INPUT_SIZE / stride) as usize;
    let anchors = cells * cells * SCRFD_ANCHORS_PER_CELL;
    if scores.len() < anchors || boxes.len() < anchors * 4 || kps.len() < anchors * 10 {
        return Err(DetectorError::InferenceFailed(format!(
            "stride {stride}: expected {anchors} anchors, got {} scores",
            scores.len()
        )));
    }

    let s = stride as f32;
    let mut out = Vec::new();
    for idx in 0..anchors {
        let score = scores[idx];
        if score < SCRFD_SCORE_THRESHOLD {
            continue;
        }
        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % cells) as f32 * s;
        let cy = (cell / cells) as f32 * s;

        let b = &boxes[idx * 4..idx * 4 + 4];
        let x1 = (cx - b[0] * s) / scale;
        let y1 = (cy - b[1] * s) / scale;
        let x2 = (cx + b[2] * s) / scale;
        let y2 = (cy + b[3] * s) / scale;

        let k = &kps[idx * 10..idx * 10 + 10];
        let mut landmarks = [(0.0f32, 0.0f32); 5];
        for (p, lm) in landmarks.iter_mut().enumerate() {
            *lm = ((cx + k[p * 2] * s) / scale, (cy + k[p * 2 + 1] * s) / scale);
        }

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks: Some(landmarks),
        });
    }
    Ok(out)
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy NMS. Output is sorted by descending confidence.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
