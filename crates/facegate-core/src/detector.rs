//! Face detection contract and the SCRFD ONNX detector.
//!
//! The kiosk only needs boxes for the live overlay, so detection is a
//! presence signal: no confidence or landmarks leave this module.

use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// File name of the detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("frame buffer does not match {width}x{height}")]
    BadFrame { width: u32, height: u32 },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in a grayscale frame.
///
/// Returned regions are in the frame's own coordinate space. An empty list
/// means no face, not an error.
pub trait FaceDetector {
    fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Detector used when no model is installed. Never reports a face.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledDetector;

impl FaceDetector for DisabledDetector {
    fn detect(&mut self, _gray: &[u8], _width: u32, _height: u32) -> Result<Vec<FaceRegion>, DetectorError> {
        Ok(Vec::new())
    }
}

/// Scale and padding applied when letterboxing into the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    resized_w: u32,
    resized_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let resized_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let resized_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            pad_x: ((target - resized_w) / 2) as f32,
            pad_y: ((target - resized_h) / 2) as f32,
            resized_w,
            resized_h,
        }
    }

    /// Map a point from model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Candidate box in frame space, before suppression.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

/// SCRFD detector running on ONNX Runtime.
pub struct ScrfdDetector {
    session: Session,
    /// (score, bbox) output index per stride.
    outputs: [(usize, usize); 3],
}

impl ScrfdDetector {
    /// Load the SCRFD model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }
        let outputs = output_layout(&names);
        tracing::info!(path = model_path, ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    fn preprocess(gray: &[u8], width: u32, height: u32) -> Result<(Array4<f32>, Letterbox), DetectorError> {
        let frame = GrayImage::from_raw(width, height, gray.to_vec())
            .ok_or(DetectorError::BadFrame { width, height })?;
        let lb = Letterbox::fit(width, height, SCRFD_INPUT_SIZE);
        let resized = imageops::resize(&frame, lb.resized_w, lb.resized_h, FilterType::Triangle);

        let size = SCRFD_INPUT_SIZE as usize;
        // Padding stays at 0.0, i.e. the normalized mean.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        let (ox, oy) = (lb.pad_x as usize, lb.pad_y as usize);
        for (x, y, px) in resized.enumerate_pixels() {
            let v = (px.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (tx, ty) = (ox + x as usize, oy + y as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = v;
            }
        }
        Ok((tensor, lb))
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<FaceRegion>, DetectorError> {
        let (input, lb) = Self::preprocess(gray, width, height)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            candidates.extend(decode_stride(scores, boxes, stride, &lb, SCRFD_CONFIDENCE_THRESHOLD));
        }

        Ok(suppress(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .filter_map(|c| FaceRegion::from_corners(c.x1, c.y1, c.x2, c.y2, width, height))
            .collect())
    }
}

/// Find score/bbox outputs by name ("score_8", "bbox_8", ...), else assume
/// the standard order: scores 0-2, bboxes 3-5.
fn output_layout(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: u32| names.iter().position(|n| *n == format!("{prefix}_{stride}"));
    let mut layout = [(0, 3), (1, 4), (2, 5)];
    for (i, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(s), Some(b)) => layout[i] = (s, b),
            _ => return [(0, 3), (1, 4), (2, 5)],
        }
    }
    layout
}

fn decode_stride(scores: &[f32], boxes: &[f32], stride: u32, lb: &Letterbox, threshold: f32) -> Vec<Candidate> {
    let grid_w = (SCRFD_INPUT_SIZE / stride) as usize;
    let grid_h = grid_w;
    let s = stride as f32;

    (0..grid_w * grid_h * SCRFD_ANCHORS_PER_CELL)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let offsets = boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * s;
            let ay = (cell / grid_w) as f32 * s;

            let (x1, y1) = lb.unmap(ax - offsets[0] * s, ay - offsets[1] * s);
            let (x2, y2) = lb.unmap(ax + offsets[2] * s, ay + offsets[3] * s);
            Some(Candidate { x1, y1, x2, y2, score })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest score first.
fn suppress(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Candidate> = Vec::new();
    for c in candidates {
        if kept.iter().all(|k| k.iou(&c) <= iou_threshold) {
            kept.push(c);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Candidate {
        Candidate { x1, y1, x2, y2, score }
    }

    #[test]
    fn test_disabled_detector_finds_nothing() {
        let gray = vec![128u8; 16];
        assert!(DisabledDetector.detect(&gray, 4, 4).unwrap().is_empty());
    }

    #[test]
    fn test_letterbox_landscape_frame() {
        let lb = Letterbox::fit(640, 480, 640);
        assert_eq!(lb.scale, 1.0);
        assert_eq!((lb.resized_w, lb.resized_h), (640, 480));
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        assert_eq!(lb.unmap(100.0, 180.0), (100.0, 100.0));
    }

    #[test]
    fn test_letterbox_small_frame_scales_up() {
        let lb = Letterbox::fit(320, 240, 640);
        assert_eq!(lb.scale, 2.0);
        assert_eq!(lb.unmap(200.0, 280.0), (100.0, 100.0));
    }

    #[test]
    fn test_iou() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = cand(5.0, 0.0, 15.0, 10.0, 0.8);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&cand(20.0, 20.0, 30.0, 30.0, 0.5)), 0.0);
    }

    #[test]
    fn test_suppress_keeps_best_of_overlap() {
        let kept = suppress(
            vec![
                cand(0.0, 0.0, 10.0, 10.0, 0.7),
                cand(1.0, 1.0, 11.0, 11.0, 0.9),
                cand(50.0, 50.0, 60.0, 60.0, 0.6),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.6);
    }

    #[test]
    fn test_decode_stride_threshold_and_geometry() {
        let lb = Letterbox::fit(640, 640, 640);
        let stride = 32u32;
        let anchors = (640 / 32) * (640 / 32) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut boxes = vec![0.0f32; anchors * 4];

        // Anchor 2 → cell 1 → grid (1, 0) → center (32, 0)
        scores[2] = 0.95;
        boxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        // Below threshold, ignored
        scores[3] = 0.4;

        let dets = decode_stride(&scores, &boxes, stride, &lb, 0.5);
        assert_eq!(dets.len(), 1);
        let d = dets[0];
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (16.0, 0.0, 48.0, 32.0));
    }

    #[test]
    fn test_output_layout_by_name() {
        let names: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(output_layout(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i| format!("{}", 400 + i)).collect();
        assert_eq!(output_layout(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_preprocess_rejects_short_buffer() {
        assert!(matches!(
            ScrfdDetector::preprocess(&[0u8; 10], 4, 4),
            Err(DetectorError::BadFrame { .. })
        ));
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let gray = vec![255u8; 64 * 32];
        let (tensor, lb) = ScrfdDetector::preprocess(&gray, 64, 32).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // Top padding band is normalized mean
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = lb.pad_y as usize + 10;
        let expected = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 1, inside, 10]] - expected).abs() < 1e-6);
    }
}
