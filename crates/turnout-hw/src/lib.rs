//! turnout-hw — Webcam capture for the recognition loop.
//!
//! V4L2 capture via the `v4l` crate, RGB frame conversion, and a
//! latest-frame feed that runs capture on its own thread.

pub mod camera;
pub mod feed;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use feed::{CameraFeed, CameraOpener, Capture, FrameSource, V4lOpener};
pub use frame::{Frame, FrameError};
