//! 468-point face mesh via ONNX Runtime.
//!
//! Two stages: [`FaceLocator`] finds a face box, then the landmark model runs
//! on a square crop around it. While the landmark model stays confident the
//! next crop is derived from the previous mesh and the locator is skipped.
//!
//! The landmark model takes a 1×192×192×3 RGB tensor in [0, 1] and produces
//! 1404 values (x, y, z per point, in crop pixels) plus one face-presence
//! logit. Crops are axis-aligned; head roll is not compensated.

use crate::detector::{sample_bilinear, DetectorError, FaceLocator};
use crate::types::{FaceBox, LandmarkError, LandmarkProvider, LandmarkVector, LANDMARK_COUNT};
use emocap_hw::Frame;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "face_detector.onnx";
pub const LANDMARK_MODEL_FILE: &str = "face_landmark.onnx";

const MESH_INPUT_SIZE: usize = 192;
const ROI_SCALE: f32 = 1.5;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face locator: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmark output: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Confidence thresholds for the two stages.
#[derive(Debug, Clone, Copy)]
pub struct MeshOptions {
    /// Minimum locator score for a face box to be used.
    pub min_detection_confidence: f32,
    /// Minimum face-presence probability to accept a mesh and keep tracking it.
    pub min_tracking_confidence: f32,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.7,
            min_tracking_confidence: 0.5,
        }
    }
}

/// Square region of interest in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Roi {
    cx: f32,
    cy: f32,
    size: f32,
}

impl Roi {
    fn around_box(face: &FaceBox) -> Self {
        Self {
            cx: face.x + face.width / 2.0,
            cy: face.y + face.height / 2.0,
            size: face.width.max(face.height) * ROI_SCALE,
        }
    }

    fn around_mesh(mesh: &LandmarkVector, frame_w: f32, frame_h: f32) -> Self {
        let (x0, y0, x1, y1) = mesh.bounds();
        let (x0, x1) = (x0 * frame_w, x1 * frame_w);
        let (y0, y1) = (y0 * frame_h, y1 * frame_h);
        Self {
            cx: (x0 + x1) / 2.0,
            cy: (y0 + y1) / 2.0,
            size: (x1 - x0).max(y1 - y0) * ROI_SCALE,
        }
    }

    fn left(&self) -> f32 {
        self.cx - self.size / 2.0
    }

    fn top(&self) -> f32 {
        self.cy - self.size / 2.0
    }
}

/// Crop selection between frames.
///
/// Holds the ROI derived from the last accepted mesh. A mesh below the
/// presence threshold is rejected and drops the ROI, so the next frame goes
/// back to the locator.
#[derive(Debug, Clone, Copy)]
struct Tracker {
    roi: Option<Roi>,
    min_presence: f32,
}

impl Tracker {
    fn new(min_presence: f32) -> Self {
        Self {
            roi: None,
            min_presence,
        }
    }

    /// The crop for this frame. `locate` only runs when nothing is tracked.
    fn next_roi<E>(
        &mut self,
        locate: impl FnOnce() -> Result<Option<FaceBox>, E>,
    ) -> Result<Option<Roi>, E> {
        if let Some(roi) = self.roi.take() {
            return Ok(Some(roi));
        }
        Ok(locate()?.map(|face| Roi::around_box(&face)))
    }

    /// Accept or reject a mesh by its presence score and update the ROI.
    fn update(
        &mut self,
        mesh: LandmarkVector,
        presence: f32,
        frame_w: f32,
        frame_h: f32,
    ) -> Option<LandmarkVector> {
        if presence < self.min_presence {
            tracing::trace!(presence, "mesh rejected; tracking lost");
            self.roi = None;
            return None;
        }
        self.roi = Some(Roi::around_mesh(&mesh, frame_w, frame_h));
        Some(mesh)
    }
}

/// Two-stage face mesh provider. Returns at most one face per frame.
pub struct FaceMesh {
    locator: FaceLocator,
    session: Session,
    tracker: Tracker,
}

impl FaceMesh {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path, options: MeshOptions) -> Result<Self, MeshError> {
        let locator = FaceLocator::load(
            &model_dir.join(DETECTOR_MODEL_FILE),
            options.min_detection_confidence,
        )?;

        let landmark_path = model_dir.join(LANDMARK_MODEL_FILE);
        if !landmark_path.exists() {
            return Err(MeshError::ModelNotFound(landmark_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&landmark_path)?;

        tracing::info!(
            path = %landmark_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face landmark model"
        );

        Ok(Self {
            locator,
            session,
            tracker: Tracker::new(options.min_tracking_confidence),
        })
    }

    /// Run the landmark model on one crop. Returns the mesh and presence probability.
    fn run_landmarks(&mut self, frame: &Frame, roi: &Roi) -> Result<(LandmarkVector, f32), MeshError> {
        let input = crop_to_tensor(frame, roi);
        let output_count = self.session.outputs().len();

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut tensors = Vec::with_capacity(output_count);
        for i in 0..output_count {
            let (_, data) = outputs[i]
                .try_extract_tensor::<f32>()
                .map_err(|e| MeshError::InferenceFailed(format!("output {i}: {e}")))?;
            tensors.push(data.to_vec());
        }

        let lengths: Vec<usize> = tensors.iter().map(Vec::len).collect();
        let (mesh_idx, presence_idx) = pick_outputs(&lengths).ok_or_else(|| {
            MeshError::InferenceFailed(format!(
                "expected a {}-value mesh and a presence score, got outputs of sizes {lengths:?}",
                LANDMARK_COUNT * 3
            ))
        })?;

        let mesh = decode_mesh(&tensors[mesh_idx], roi, frame.width as f32, frame.height as f32)?;
        Ok((mesh, sigmoid(tensors[presence_idx][0])))
    }
}

impl LandmarkProvider for FaceMesh {
    type Error = MeshError;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<LandmarkVector>, MeshError> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }

        let locator = &mut self.locator;
        let roi = self.tracker.next_roi(|| -> Result<Option<FaceBox>, MeshError> {
            let face = locator.locate(frame)?;
            if let Some(face) = &face {
                tracing::trace!(confidence = face.confidence, "face located");
            }
            Ok(face)
        })?;
        let Some(roi) = roi else {
            return Ok(Vec::new());
        };

        let (mesh, presence) = self.run_landmarks(frame, &roi)?;
        Ok(self
            .tracker
            .update(mesh, presence, frame.width as f32, frame.height as f32)
            .into_iter()
            .collect())
    }
}

/// Find the mesh output (1404 values) and the presence output (1 value).
fn pick_outputs(lengths: &[usize]) -> Option<(usize, usize)> {
    let mesh = lengths.iter().position(|&n| n == LANDMARK_COUNT * 3)?;
    let presence = lengths.iter().position(|&n| n == 1)?;
    Some((mesh, presence))
}

/// Resample the ROI to a 1×192×192×3 tensor in [0, 1]. Area outside the frame is black.
fn crop_to_tensor(frame: &Frame, roi: &Roi) -> Array4<f32> {
    let size = MESH_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    let step = roi.size / size as f32;
    let (w, h) = (frame.width as f32, frame.height as f32);

    for v in 0..size {
        let src_y = roi.top() + (v as f32 + 0.5) * step - 0.5;
        if src_y < -0.5 || src_y > h - 0.5 {
            continue;
        }
        for u in 0..size {
            let src_x = roi.left() + (u as f32 + 0.5) * step - 0.5;
            if src_x < -0.5 || src_x > w - 0.5 {
                continue;
            }
            let rgb = sample_bilinear(frame, src_x, src_y);
            for (c, value) in rgb.iter().enumerate() {
                tensor[[0, v, u, c]] = value / 255.0;
            }
        }
    }

    tensor
}

/// Map crop-space model output to frame-normalized landmarks.
///
/// x and y become fractions of frame width/height; z uses the same scale as x.
fn decode_mesh(raw: &[f32], roi: &Roi, frame_w: f32, frame_h: f32) -> Result<LandmarkVector, LandmarkError> {
    let to_frame = roi.size / MESH_INPUT_SIZE as f32;
    let values: Vec<f32> = raw
        .chunks_exact(3)
        .flat_map(|p| {
            [
                (roi.left() + p[0] * to_frame) / frame_w,
                (roi.top() + p[1] * to_frame) / frame_h,
                p[2] * to_frame / frame_w,
            ]
        })
        .collect();
    LandmarkVector::from_flat(&values)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
