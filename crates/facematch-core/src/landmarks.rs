//! 106-point landmark refinement via the insightface `2d106det` ONNX model.
//!
//! The detector's own keypoints are coarse; this model re-estimates the face
//! shape on a 192×192 crop centred on the detection and the five alignment
//! points are read back from the dense prediction.

use crate::frame::Frame;
use crate::types::{BoundingBox, FivePoints};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: usize = 192;
/// Crop side relative to the longest side of the detection box.
const LANDMARK_CROP_SCALE: f32 = 1.5;
const LANDMARK_POINTS: usize = 106;
/// Indices of [left_eye, right_eye, nose, left_mouth, right_mouth] within the 106-point layout.
const FIVE_POINT_INDICES: [usize; 5] = [38, 88, 86, 52, 61];

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box is degenerate ({width}x{height})")]
    DegenerateBox { width: f32, height: f32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Mapping between frame coordinates and the square model crop.
#[derive(Debug, Clone, Copy)]
struct CropTransform {
    center: (f32, f32),
    /// Crop pixels per frame pixel.
    scale: f32,
}

impl CropTransform {
    fn for_face(face: &BoundingBox) -> Result<Self, LandmarkError> {
        let longest = face.width.max(face.height);
        if longest.is_nan() || longest <= 0.0 {
            return Err(LandmarkError::DegenerateBox {
                width: face.width,
                height: face.height,
            });
        }
        Ok(Self {
            center: face.center(),
            scale: LANDMARK_INPUT_SIZE as f32 / (longest * LANDMARK_CROP_SCALE),
        })
    }

    fn to_frame(&self, cx: f32, cy: f32) -> (f32, f32) {
        let half = LANDMARK_INPUT_SIZE as f32 / 2.0;
        (
            (cx - half) / self.scale + self.center.0,
            (cy - half) / self.scale + self.center.1,
        )
    }
}

/// Dense landmark predictor.
pub struct LandmarkPredictor {
    session: Session,
}

impl LandmarkPredictor {
    /// Build the predictor from ONNX model bytes.
    pub fn from_memory(model: &[u8], intra_threads: usize) -> Result<Self, LandmarkError> {
        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_memory(model)?;

        tracing::info!(
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded 2d106det model"
        );

        Ok(Self { session })
    }

    /// Predict the five alignment points for a detected face.
    pub fn five_points(&mut self, frame: &Frame, face: &BoundingBox) -> Result<FivePoints, LandmarkError> {
        let crop = CropTransform::for_face(face)?;
        let input = preprocess(frame, &crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark extraction: {e}")))?;

        if raw.len() < LANDMARK_POINTS * 2 {
            return Err(LandmarkError::InferenceFailed(format!(
                "expected {} landmark values, got {}",
                LANDMARK_POINTS * 2,
                raw.len()
            )));
        }

        Ok(decode_five_points(raw, &crop))
    }
}

/// Sample the square crop around the face into a raw-pixel NCHW RGB tensor.
///
/// 2d106det is exported with mean 0 and std 1, so pixels go in unscaled.
fn preprocess(frame: &Frame, crop: &CropTransform) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let (sx, sy) = crop.to_frame(x as f32, y as f32);
            for c in 0..3 {
                tensor[[0, c, y, x]] = frame.sample(sx, sy, c);
            }
        }
    }

    tensor
}

/// Model output is (x, y) pairs in [-1, 1] crop space.
fn decode_five_points(raw: &[f32], crop: &CropTransform) -> FivePoints {
    let half = LANDMARK_INPUT_SIZE as f32 / 2.0;
    FIVE_POINT_INDICES.map(|i| {
        let cx = (raw[i * 2] + 1.0) * half;
        let cy = (raw[i * 2 + 1] + 1.0) * half;
        crop.to_frame(cx, cy)
    })
}
