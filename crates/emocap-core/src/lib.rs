//! emocap-core — Capture, label, and persist facial landmark samples.
//!
//! The [`session::CaptureSession`] state machine drives a camera, asks a
//! [`types::LandmarkProvider`] for a 468-point face mesh per frame, lets the
//! operator pick an emotion label by keystroke, and appends labeled rows to
//! a CSV dataset.

pub mod counter;
pub mod dataset;
pub mod detector;
pub mod labels;
pub mod mesh;
pub mod session;
pub mod types;

pub use counter::SampleCounter;
pub use dataset::{CsvDataset, DatasetError, SampleWriter};
pub use labels::{Emotion, KeyEvent, LabelRegistry, RawKey};
pub use mesh::{FaceMesh, MeshOptions};
pub use session::{CaptureSession, ExitReason, SessionError, SessionOptions, SessionReport};
pub use types::{FaceBox, Landmark, LandmarkProvider, LandmarkVector, Sample, LANDMARK_COUNT};

/// Default directory holding the ONNX models (`$XDG_DATA_HOME/emocap/models`).
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("emocap")
        .join("models")
}
