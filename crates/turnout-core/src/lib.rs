//! turnout-core — Face matching and attendance bookkeeping.
//!
//! Holds the domain types, the match predicate, the user directory cache
//! and the attendance dedup gate. Face detection (SCRFD) and recognition
//! (ArcFace) run via ONNX Runtime behind the [`FaceEmbedder`] trait.

pub mod alignment;
pub mod dedup;
pub mod detector;
pub mod directory;
pub mod matcher;
pub mod models;
pub mod onnx;
pub mod provider;
pub mod recognizer;
pub mod types;

pub use dedup::{DedupGate, COOL_DOWN};
pub use detector::FaceDetector;
pub use directory::load_known_faces;
pub use matcher::{is_match, FaceMatch, FaceMatcher, MatchPolicy, DEFAULT_TOLERANCE};
pub use onnx::OnnxEmbedder;
pub use provider::{EmbedError, FaceEmbedder};
pub use recognizer::FaceRecognizer;
pub use types::{
    validate_identity, AttendanceEvent, BoundingBox, Embedding, IdentityError, KnownFace,
    UserRecord, UNRECOGNIZED,
};
