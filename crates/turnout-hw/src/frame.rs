//! Frame type, YUYV/GREY/MJPEG to RGB conversion and display transforms.

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use std::time::Instant;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Mirror horizontally (selfie view).
    pub fn mirror(&mut self) {
        imageops::flip_horizontal_in_place(&mut self.image);
    }

    /// Resize to exactly `width` x `height`. No-op when already that size.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() == (width, height) || width == 0 || height == 0 {
            return;
        }
        self.image = imageops::resize(&self.image, width, height, FilterType::Triangle);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("buffer does not fit a {width}x{height} image")]
    Dimensions { width: u32, height: u32 },
}

/// Convert packed YUYV 4:2:2 to RGB (BT.601, limited range).
///
/// Each 4-byte group `[Y0, U, Y1, V]` yields two pixels sharing chroma.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for group in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (group[1], group[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(group[0], u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(group[2], u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::Dimensions { width, height })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Replicate an 8-bit grayscale buffer into RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    let rgb = grey[..expected].iter().flat_map(|&g| [g, g, g]).collect();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::Dimensions { width, height })
}

/// Decode one MJPEG buffer (a plain JPEG image).
pub fn decode_mjpeg(jpeg: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8())
}
