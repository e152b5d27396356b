//! Descriptor comparison by Euclidean distance.

use crate::recognizer::ARCFACE_MODEL_VERSION;
use crate::types::{Comparison, Descriptor};
use thiserror::Error;

/// Distance below which two descriptors are declared the same person.
///
/// The cutoff of 128-d dlib-style face descriptors. It applies to
/// descriptors whose producing model is unknown.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Cutoff for L2-normalized ArcFace descriptors.
///
/// On the unit sphere `d = sqrt(2 - 2 cos)`; this is the distance at cosine
/// similarity 0.40, the usual ArcFace acceptance point.
pub const ARCFACE_MATCH_THRESHOLD: f32 = 1.095;

/// The threshold calibrated for the model that produced `descriptor`.
pub fn calibrated_threshold(descriptor: &Descriptor) -> f32 {
    match descriptor.model_version.as_deref() {
        Some(ARCFACE_MODEL_VERSION) => ARCFACE_MATCH_THRESHOLD,
        _ => DEFAULT_MATCH_THRESHOLD,
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompareError {
    #[error("descriptor dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("descriptors are empty")]
    Empty,
}

/// Euclidean distance: square root of the sum of squared element-wise differences.
pub fn euclidean_distance(a: &Descriptor, b: &Descriptor) -> Result<f32, CompareError> {
    if a.dim() != b.dim() {
        return Err(CompareError::DimensionMismatch {
            left: a.dim(),
            right: b.dim(),
        });
    }
    if a.values.is_empty() {
        return Err(CompareError::Empty);
    }

    Ok(a.values
        .iter()
        .zip(b.values.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt())
}

/// Compare two descriptors. The verdict uses a strict inequality, so a
/// distance exactly at the threshold is not a match.
pub fn compare(a: &Descriptor, b: &Descriptor, threshold: f32) -> Result<Comparison, CompareError> {
    let distance = euclidean_distance(a, b)?;
    Ok(verdict(distance, threshold))
}

/// Classify an already computed distance.
pub fn verdict(distance: f32, threshold: f32) -> Comparison {
    Comparison {
        distance,
        threshold,
        same_person: distance < threshold,
    }
}
