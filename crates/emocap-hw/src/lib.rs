//! emocap-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access and the RGB frame type consumed by
//! the landmark pipeline and the terminal preview.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
