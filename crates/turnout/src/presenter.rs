//! Presentation seam for the recognition loop.

use crate::engine::Recognition;
use image::RgbImage;
use std::io::Write;
use turnout_core::{AttendanceEvent, BoundingBox, UNRECOGNIZED};

/// A labelled face box drawn over the live frame.
#[derive(Debug, Clone)]
pub struct Overlay {
    pub bbox: BoundingBox,
    pub label: String,
}

impl From<&Recognition> for Overlay {
    fn from(r: &Recognition) -> Self {
        Self {
            bbox: r.bbox.clone(),
            label: r.identity.clone().unwrap_or_else(|| UNRECOGNIZED.to_string()),
        }
    }
}

/// Receives everything the user should see while a session runs.
pub trait Presenter: Send {
    /// Called every tick with the display-ready frame and the latest overlays.
    fn render(&mut self, frame: &RgbImage, overlays: &[Overlay]);

    /// A detected face matched nobody.
    fn unrecognized_face(&mut self);

    /// A new attendance row was written.
    fn attendance_recorded(&mut self, event: &AttendanceEvent);

    /// A non-fatal failure (storage, engine, capture).
    fn failure(&mut self, message: &str);
}

/// Line-oriented presenter for terminals.
pub struct ConsolePresenter<W: Write + Send = std::io::Stdout> {
    out: W,
    frames: u64,
    last_labels: Vec<String>,
}

impl ConsolePresenter {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsolePresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            frames: 0,
            last_labels: Vec::new(),
        }
    }

    fn line(&mut self, text: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{text}").and_then(|_| self.out.flush()) {
            tracing::warn!(error = %e, "console write failed");
        }
    }
}

impl<W: Write + Send> Presenter for ConsolePresenter<W> {
    fn render(&mut self, frame: &RgbImage, overlays: &[Overlay]) {
        self.frames += 1;
        let labels: Vec<String> = overlays.iter().map(|o| o.label.clone()).collect();
        if labels != self.last_labels {
            tracing::debug!(
                frame = self.frames,
                width = frame.width(),
                height = frame.height(),
                faces = ?labels,
                "faces in view changed"
            );
            self.last_labels = labels;
        }
    }

    fn unrecognized_face(&mut self) {
        self.line(format_args!("! {UNRECOGNIZED} face, not registered"));
    }

    fn attendance_recorded(&mut self, event: &AttendanceEvent) {
        self.line(format_args!(
            "#{:<5} {}  {} {}",
            event.id, event.identity, event.date, event.time
        ));
    }

    fn failure(&mut self, message: &str) {
        self.line(format_args!("error: {message}"));
    }
}
