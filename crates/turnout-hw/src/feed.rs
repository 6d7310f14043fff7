//! Latest-frame camera feed.
//!
//! A capture thread owns the device and keeps overwriting a single slot
//! with the newest frame, so a slow consumer sees bounded staleness instead
//! of a growing queue. Dropping the feed stops the thread and releases the
//! device.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// Consecutive capture errors after which the capture thread gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// Something that yields camera frames to the recognition loop.
pub trait FrameSource: Send {
    /// Newest frame since the previous call, `Ok(None)` if nothing new arrived.
    ///
    /// A transient read failure is reported once as `Err(CaptureFailed)`;
    /// `Err(Disconnected)` means the source is gone for good.
    fn latest_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

/// Opens a fresh [`FrameSource`] for each recognition session.
pub trait CameraOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Blocking frame producer driven by the capture thread.
pub trait Capture {
    fn capture(&mut self) -> Result<Frame, CameraError>;
}

impl Capture for Camera {
    fn capture(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    error: Option<String>,
    disconnected: Option<String>,
    overwritten: u64,
}

/// [`FrameSource`] fed by a background capture thread.
pub struct CameraFeed {
    slot: Arc<Mutex<Slot>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CameraFeed {
    /// Open the capture device on a new thread and start streaming.
    ///
    /// `open` runs on the capture thread; its error is returned here and no
    /// thread is left behind.
    pub fn spawn<C, F>(name: &str, open: F) -> Result<Self, CameraError>
    where
        C: Capture + 'static,
        F: FnOnce() -> Result<C, CameraError> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Slot::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CameraError>>();

        let thread_slot = Arc::clone(&slot);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name(format!("turnout-capture-{name}"))
            .spawn(move || {
                let mut source = match open() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                capture_loop(&mut source, &thread_slot, &thread_stop);
                tracing::debug!("capture thread exiting");
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(CameraError::CaptureFailed("capture thread exited during open".into()))
        });
        match opened {
            Ok(()) => Ok(Self {
                slot,
                stop,
                thread: Some(thread),
            }),
            Err(e) => {
                let _ = thread.join();
                Err(e)
            }
        }
    }

    /// Frames replaced in the slot before anyone read them.
    pub fn overwritten(&self) -> u64 {
        lock(&self.slot).overwritten
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn capture_loop<C: Capture>(source: &mut C, slot: &Mutex<Slot>, stop: &AtomicBool) {
    let mut consecutive_errors = 0u32;
    while !stop.load(Ordering::Acquire) {
        match source.capture() {
            Ok(frame) => {
                consecutive_errors = 0;
                let mut s = lock(slot);
                if s.frame.replace(frame).is_some() {
                    s.overwritten += 1;
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(error = %e, consecutive_errors, "frame capture failed");
                let mut s = lock(slot);
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    s.disconnected = Some(e.to_string());
                    return;
                }
                s.error = Some(e.to_string());
            }
        }
    }
}

impl FrameSource for CameraFeed {
    fn latest_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let mut s = lock(&self.slot);
        if let Some(frame) = s.frame.take() {
            s.error = None;
            return Ok(Some(frame));
        }
        if let Some(reason) = &s.disconnected {
            return Err(CameraError::Disconnected(reason.clone()));
        }
        if let Some(reason) = s.error.take() {
            return Err(CameraError::CaptureFailed(reason));
        }
        Ok(None)
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
        tracing::info!("camera released");
    }
}

/// Opens V4L2 webcams as [`CameraFeed`]s.
#[derive(Debug, Clone)]
pub struct V4lOpener {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl CameraOpener for V4lOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let (device, width, height) = (self.device.clone(), self.width, self.height);
        let name = device.rsplit('/').next().unwrap_or("camera").to_string();
        let feed = CameraFeed::spawn(&name, move || {
            let camera = Camera::open(&device, width, height)?;
            tracing::info!(
                device = %camera.device_path,
                driver = %camera.driver(),
                width = camera.width,
                height = camera.height,
                "camera streaming"
            );
            Ok(camera)
        })?;
        Ok(Box::new(feed))
    }
}
