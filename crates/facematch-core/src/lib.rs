//! facematch-core: face detection, landmarks and descriptors for face comparison.
//!
//! Uses SCRFD for face detection, the insightface 2d106det model for
//! landmark refinement and ArcFace for face descriptors, all running via
//! ONNX Runtime for CPU inference.

pub mod alignment;
pub mod comparator;
pub mod detector;
pub mod frame;
pub mod landmarks;
pub mod models;
pub mod recognizer;
pub mod types;

pub use comparator::{
    calibrated_threshold, compare, euclidean_distance, CompareError, ARCFACE_MATCH_THRESHOLD, DEFAULT_MATCH_THRESHOLD,
};
pub use detector::FaceDetector;
pub use frame::Frame;
pub use landmarks::LandmarkPredictor;
pub use models::{AnalyzeError, ModelKind, ModelSet};
pub use recognizer::{FaceRecognizer, ARCFACE_MODEL_VERSION};
pub use types::{BoundingBox, Comparison, Descriptor, FivePoints};
