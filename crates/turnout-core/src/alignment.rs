//! Five-point face alignment to the ArcFace 112x112 template.
//!
//! Fits a similarity transform (rotation, uniform scale, translation) from
//! the detected landmarks to the template by least squares, then samples
//! the source image bilinearly through the inverse transform.

use image::{Rgb, RgbImage};

pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmark positions in a 112x112 crop.
const TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Similarity transform `p' = A·p + t` with `A = [[a, -b], [b, a]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, or `None` for a degenerate (zero-scale) fit.
    pub fn inverse(&self) -> Option<Similarity> {
        let det = self.a * self.a + self.b * self.b;
        if det <= f32::EPSILON {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Similarity {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Least-squares similarity mapping `src` points onto `dst` points.
pub fn estimate_similarity(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Similarity {
    let n = src.len().min(dst.len()).max(1) as f32;
    let mean = |pts: &[(f32, f32)]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        (sx / n, sy / n)
    };
    let (sx, sy) = mean(src);
    let (dx, dy) = mean(dst);

    // Complex form: a + ib = Σ conj(s)·d / Σ |s|²  over centred points
    let mut num_re = 0.0f32;
    let mut num_im = 0.0f32;
    let mut den = 0.0f32;
    for (s, d) in src.iter().zip(dst.iter()) {
        let (px, py) = (s.0 - sx, s.1 - sy);
        let (qx, qy) = (d.0 - dx, d.1 - dy);
        num_re += px * qx + py * qy;
        num_im += px * qy - py * qx;
        den += px * px + py * py;
    }
    let (a, b) = if den > f32::EPSILON {
        (num_re / den, num_im / den)
    } else {
        (1.0, 0.0)
    };

    Similarity {
        a,
        b,
        tx: dx - (a * sx - b * sy),
        ty: dy - (b * sx + a * sy),
    }
}

/// Warp the face described by `landmarks` into a 112x112 aligned crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let forward = estimate_similarity(landmarks, &TEMPLATE);
    let mut out = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    let Some(inverse) = forward.inverse() else {
        return out;
    };

    for (x, y, px) in out.enumerate_pixels_mut() {
        let (sx, sy) = inverse.apply((x as f32, y as f32));
        *px = sample_bilinear(image, sx, sy);
    }
    out
}

fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return Rgb([0, 0, 0]);
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
