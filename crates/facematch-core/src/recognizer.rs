//! Face descriptors from an ArcFace model (`w600k_r50`).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::frame::Frame;
use crate::types::{Descriptor, FivePoints};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

// ArcFace normalizes symmetrically around mid-grey.
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
pub const DESCRIPTOR_DIM: usize = 512;
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("unexpected recognizer output: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Build the recognizer from ONNX model bytes.
    pub fn from_memory(model: &[u8], intra_threads: usize) -> Result<Self, RecognizerError> {
        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_memory(model)?;
        tracing::info!(
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "recognizer model ready"
        );
        Ok(Self { session })
    }

    /// Align the face located by `landmarks` to 112x112 and embed it.
    ///
    /// The descriptor is L2-normalized, so distances between descriptors
    /// fall in `[0, 2]`.
    pub fn extract(&mut self, frame: &Frame, landmarks: &FivePoints) -> Result<Descriptor, RecognizerError> {
        let input = preprocess(&alignment::align_face(frame, landmarks));
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, embedding) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(e.to_string()))?;
        if embedding.len() != DESCRIPTOR_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "embedding has {} values, expected {DESCRIPTOR_DIM}",
                embedding.len()
            )));
        }

        Ok(Descriptor {
            values: l2_normalize(embedding.to_vec()),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
    values
}

/// Packed RGB crop to normalized NCHW. Missing bytes read as black.
fn preprocess(crop: &[u8]) -> Array4<f32> {
    Array4::from_shape_fn((1, 3, ALIGNED_SIZE, ALIGNED_SIZE), |(_, c, y, x)| {
        let v = crop.get((y * ALIGNED_SIZE + x) * 3 + c).copied().unwrap_or(0);
        (v as f32 - PIXEL_MEAN) / PIXEL_STD
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_range_and_shape() {
        let white = vec![255u8; ALIGNED_SIZE * ALIGNED_SIZE * 3];
        let tensor = preprocess(&white);
        assert_eq!(tensor.shape(), &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]);
        assert!(tensor.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_keeps_channel_order() {
        let green: Vec<u8> = (0..ALIGNED_SIZE * ALIGNED_SIZE).flat_map(|_| [0u8, 255, 0]).collect();
        let tensor = preprocess(&green);
        assert!((tensor[[0, 0, 5, 5]] + 1.0).abs() < 1e-6, "red channel");
        assert!((tensor[[0, 1, 5, 5]] - 1.0).abs() < 1e-6, "green channel");
    }

    #[test]
    fn test_preprocess_short_crop_reads_black() {
        let tensor = preprocess(&[]);
        assert!((tensor[[0, 2, 111, 111]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
