//! Face detection with an SCRFD model (`det_10g`).
//!
//! SCRFD predicts, for each of three feature strides, a score, a box given
//! as distances from the anchor centre and five keypoints. Boxes are mapped
//! back through the letterbox and merged with NMS.

use crate::frame::{self, Frame};
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("unexpected detector output: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting a frame into the square input.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, size: usize) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = (width as f32 * scale).round().min(size as f32);
        let new_h = (height as f32 * scale).round().min(size as f32);
        Self {
            scale,
            pad_x: (size as f32 - new_w) / 2.0,
            pad_y: (size as f32 - new_h) / 2.0,
        }
    }

    /// Input-space point to frame-space point.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Positions of one stride's tensors in the session outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideSlots {
    score: usize,
    bbox: usize,
    kps: usize,
}

pub struct FaceDetector {
    session: Session,
    score_threshold: f32,
    slots: [StrideSlots; 3],
}

impl FaceDetector {
    /// Build the detector from ONNX model bytes.
    pub fn from_memory(model: &[u8], intra_threads: usize) -> Result<Self, DetectorError> {
        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_memory(model)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?names,
            "detector model ready"
        );
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "expected score, bbox and kps outputs for 3 strides, found {} outputs",
                names.len()
            )));
        }

        Ok(Self {
            session,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            slots: stride_slots(&names),
        })
    }

    /// Override the minimum detection score (default 0.5).
    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        self.score_threshold = threshold;
    }

    /// Detect faces, best score first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slots, stride) in self.slots.iter().zip(STRIDES) {
            let tensor = |index: usize, what: &str| {
                outputs[index]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} at stride {stride}: {e}")))
            };
            let head = StrideOutputs {
                scores: tensor(slots.score, "scores")?,
                bboxes: tensor(slots.bbox, "boxes")?,
                kps: tensor(slots.kps, "keypoints")?,
            };
            candidates.extend(decode_stride(head, stride, &letterbox, self.score_threshold));
        }

        let candidate_count = candidates.len();
        let faces = nms(candidates, NMS_IOU);
        tracing::debug!(candidates = candidate_count, faces = faces.len(), "detection finished");
        Ok(faces)
    }
}

/// Letterbox the frame into a square NCHW RGB tensor.
fn preprocess(frame: &Frame) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width as usize, frame.height as usize, INPUT_SIZE);
    let new_w = ((frame.width as f32 * letterbox.scale).round() as usize).clamp(1, INPUT_SIZE);
    let new_h = ((frame.height as f32 * letterbox.scale).round() as usize).clamp(1, INPUT_SIZE);
    let resized = frame::resize_bilinear(frame, new_w, new_h);
    let left = letterbox.pad_x.floor() as usize;
    let top = letterbox.pad_y.floor() as usize;

    // Zero is the normalized value of the mean, so the border needs no fill.
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for (i, px) in resized.chunks_exact(3).enumerate() {
        let (x, y) = (left + i % new_w, top + i / new_w);
        for (c, &v) in px.iter().enumerate() {
            tensor[[0, c, y, x]] = (v as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (tensor, letterbox)
}

/// Map each stride to its score/bbox/kps outputs.
///
/// Exports that name their outputs `score_8`, `bbox_16`, `kps_32`, ... are
/// mapped by name in any order. Anything else is assumed to follow the
/// reference export: three score tensors, then three box tensors, then three
/// keypoint tensors, each group ordered by stride.
fn stride_slots(names: &[String]) -> [StrideSlots; 3] {
    let position = |kind: &str, stride: usize| names.iter().position(|n| *n == format!("{kind}_{stride}"));
    let by_name = |stride: usize| {
        Some(StrideSlots {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    match (by_name(STRIDES[0]), by_name(STRIDES[1]), by_name(STRIDES[2])) {
        (Some(a), Some(b), Some(c)) => [a, b, c],
        _ => {
            tracing::debug!(?names, "unnamed detector outputs, assuming reference order");
            std::array::from_fn(|i| StrideSlots {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

struct StrideOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Turn one stride's raw outputs into frame-space boxes above `threshold`.
fn decode_stride(out: StrideOutputs<'_>, stride: usize, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let cells = INPUT_SIZE / stride;
    let s = stride as f32;

    (0..cells * cells * ANCHORS_PER_CELL)
        .filter_map(|anchor| {
            let score = *out.scores.get(anchor)?;
            if score <= threshold {
                return None;
            }
            let cell = anchor / ANCHORS_PER_CELL;
            let (cx, cy) = ((cell % cells) as f32 * s, (cell / cells) as f32 * s);

            // left, top, right, bottom distances in stride units
            let d = out.bboxes.get(anchor * 4..anchor * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(cx - d[0] * s, cy - d[1] * s);
            let (x2, y2) = letterbox.unmap(cx + d[2] * s, cy + d[3] * s);

            let landmarks = out
                .kps
                .get(anchor * 10..anchor * 10 + 10)
                .map(|k| std::array::from_fn(|p| letterbox.unmap(cx + k[p * 2] * s, cy + k[p * 2 + 1] * s)));

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; the result is sorted by score.
fn nms(mut boxes: Vec<BoundingBox>, max_iou: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= max_iou) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let overlap = w * h;
    let union = a.width * a.height + b.width * b.height - overlap;
    if union > 0.0 {
        overlap / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, side: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: side,
            height: side,
            confidence,
            landmarks: None,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_iou() {
        let a = face(0.0, 0.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &face(50.0, 50.0, 10.0, 1.0)), 0.0);
        // half of each box overlaps: 50 / (100 + 100 - 50)
        assert!((iou(&a, &face(5.0, 0.0, 10.0, 1.0)) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_cluster() {
        let kept = nms(
            vec![
                face(4.0, 4.0, 80.0, 0.7),
                face(300.0, 10.0, 40.0, 0.6),
                face(0.0, 0.0, 80.0, 0.95),
            ],
            NMS_IOU,
        );
        let scores: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(scores, vec![0.95, 0.6]);
        assert!(nms(Vec::new(), NMS_IOU).is_empty());
    }

    #[test]
    fn test_letterbox_portrait() {
        let lb = Letterbox::fit(320, 640, INPUT_SIZE);
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.pad_x, 160.0);
        assert_eq!(lb.pad_y, 0.0);
        assert_eq!(lb.unmap(170.0, 5.0), (10.0, 5.0));
    }

    #[test]
    fn test_decode_stride_maps_back_to_frame() {
        // 320x240 frame: scale 2, 80px bars top and bottom.
        let lb = Letterbox::fit(320, 240, INPUT_SIZE);
        let anchors = (INPUT_SIZE / 32).pow(2) * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];
        // second cell of the first row: centre (32, 0)
        let hit = 2;
        scores[hit] = 0.9;
        bboxes[hit * 4..hit * 4 + 4].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);

        let out = StrideOutputs {
            scores: &scores,
            bboxes: &bboxes,
            kps: &kps,
        };
        let faces = decode_stride(out, 32, &lb, 0.5);

        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert!((f.x - 8.0).abs() < 1e-4, "x = {}", f.x);
        assert!((f.y + 40.0).abs() < 1e-4, "y = {}", f.y);
        assert!((f.width - 16.0).abs() < 1e-4);
        assert!((f.height - 16.0).abs() < 1e-4);
        let points = f.landmarks.unwrap();
        assert!((points[0].0 - 16.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_rejects_threshold_score() {
        let lb = Letterbox::fit(INPUT_SIZE, INPUT_SIZE, INPUT_SIZE);
        let anchors = (INPUT_SIZE / 32).pow(2) * ANCHORS_PER_CELL;
        let scores = vec![0.5f32; anchors];
        let bboxes = vec![1.0f32; anchors * 4];
        let out = StrideOutputs {
            scores: &scores,
            bboxes: &bboxes,
            kps: &[],
        };
        assert!(decode_stride(out, 32, &lb, 0.5).is_empty());
    }

    #[test]
    fn test_stride_slots_by_name() {
        let shuffled = names(&[
            "kps_32", "score_8", "bbox_8", "kps_8", "score_16", "bbox_16", "kps_16", "score_32", "bbox_32",
        ]);
        let slots = stride_slots(&shuffled);
        assert_eq!(slots[0], StrideSlots { score: 1, bbox: 2, kps: 3 });
        assert_eq!(slots[2], StrideSlots { score: 7, bbox: 8, kps: 0 });
    }

    #[test]
    fn test_stride_slots_reference_order() {
        let numeric: Vec<String> = (0..9).map(|i| format!("{}", 448 + i)).collect();
        assert_eq!(stride_slots(&numeric)[1], StrideSlots { score: 1, bbox: 4, kps: 7 });
    }
}
