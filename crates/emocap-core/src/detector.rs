//! SCRFD face box locator via ONNX Runtime.
//!
//! First stage of the mesh pipeline: finds where the face is so the landmark
//! model can be run on a tight crop. Anchor-free decoding over strides
//! 8/16/32, followed by greedy NMS.

use crate::types::FaceBox;
use emocap_hw::Frame;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting the frame into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    /// Map a point in model input space back to frame pixels.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output positions (score, bbox) for each stride, in `SCRFD_STRIDES` order.
type StrideOutputs = [(usize, usize); 3];

/// SCRFD-based face locator.
pub struct FaceLocator {
    session: Session,
    outputs: StrideOutputs,
    min_confidence: f32,
}

impl FaceLocator {
    /// Load the SCRFD ONNX model. Detections scoring below `min_confidence` are dropped.
    pub fn load(model_path: &Path, min_confidence: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            "loaded face locator model"
        );

        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }

        let outputs = map_outputs(&names);
        tracing::debug!(?outputs, "face locator output mapping");

        Ok(Self {
            session,
            outputs,
            min_confidence,
        })
    }

    /// Most confident face in the frame, if any clears the threshold.
    pub fn locate(&mut self, frame: &Frame) -> Result<Option<FaceBox>, DetectorError> {
        Ok(self.detect_all(frame)?.into_iter().next())
    }

    /// All faces after NMS, sorted by descending confidence.
    pub fn detect_all(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, DetectorError> {
        let letterbox = Letterbox::fit(
            frame.width as usize,
            frame.height as usize,
            SCRFD_INPUT_SIZE,
        );
        let input = preprocess(frame, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(self.outputs.iter()) {
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, boxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}"))
            })?;
            candidates.extend(decode_stride(
                scores,
                boxes,
                stride,
                &letterbox,
                self.min_confidence,
            ));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Pick score/bbox outputs per stride by name ("score_8", "bbox_16", ...),
/// falling back to the usual export order: scores 0–2, boxes 3–5.
fn map_outputs(names: &[String]) -> StrideOutputs {
    let position = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let by_name: Option<Vec<(usize, usize)>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((position("score", s)?, position("bbox", s)?)))
        .collect();

    match by_name {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::info!(?names, "face locator: unnamed outputs, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Letterbox the RGB frame into a normalized 1×3×640×640 tensor.
///
/// Bilinear resampling; padding uses the mean so it normalizes to 0.0.
fn preprocess(frame: &Frame, letterbox: &Letterbox) -> Array4<f32> {
    let size = SCRFD_INPUT_SIZE;
    let (w, h) = (frame.width as usize, frame.height as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    if w == 0 || h == 0 {
        return tensor;
    }

    let new_w = (w as f32 * letterbox.scale).round() as usize;
    let new_h = (h as f32 * letterbox.scale).round() as usize;
    let x_start = letterbox.pad_x.floor() as usize;
    let y_start = letterbox.pad_y.floor() as usize;
    let inv_scale = 1.0 / letterbox.scale;

    for y in 0..size {
        for x in 0..size {
            let inside = (y_start..y_start + new_h).contains(&y)
                && (x_start..x_start + new_w).contains(&x);
            let rgb = if inside {
                let src_x = ((x - x_start) as f32 + 0.5) * inv_scale - 0.5;
                let src_y = ((y - y_start) as f32 + 0.5) * inv_scale - 0.5;
                sample_bilinear(frame, src_x, src_y)
            } else {
                [SCRFD_MEAN; 3]
            };
            for (c, value) in rgb.iter().enumerate() {
                tensor[[0, c, y, x]] = (value - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    tensor
}

/// Bilinear RGB sample with edge clamping.
pub(crate) fn sample_bilinear(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |px: usize, py: usize, c: usize| frame.data[(py * w + px) * 3 + c] as f32;
    let mut out = [0.0f32; 3];
    for (c, v) in out.iter_mut().enumerate() {
        let top = at(x0, y0, c) * (1.0 - fx) + at(x1, y0, c) * fx;
        let bottom = at(x0, y1, c) * (1.0 - fx) + at(x1, y1, c) * fx;
        *v = top * (1.0 - fy) + bottom * fy;
    }
    out
}

/// Decode candidate boxes for one stride level.
///
/// Box regressions are distances `[left, top, right, bottom]` from the anchor
/// center, in units of the stride.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&idx| scores[idx] >= threshold)
        .filter_map(|idx| {
            let reg = boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * s;
            let ay = (cell / grid_w) as f32 * s;

            let (x1, y1) = letterbox.unmap(ax - reg[0] * s, ay - reg[1] * s);
            let (x2, y2) = letterbox.unmap(ax + reg[2] * s, ay + reg[3] * s);
            Some(FaceBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[idx],
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; returns survivors by descending confidence.
fn nms(mut candidates: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
