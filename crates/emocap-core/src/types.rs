use crate::labels::Emotion;
use emocap_hw::Frame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in one face mesh. Fixed for the lifetime of a dataset file.
pub const LANDMARK_COUNT: usize = 468;

#[derive(Error, Debug, PartialEq)]
pub enum LandmarkError {
    #[error("expected {n} landmarks, got {0}", n = LANDMARK_COUNT)]
    WrongPointCount(usize),
    #[error("expected {n} coordinates, got {0}", n = LANDMARK_COUNT * 3)]
    WrongValueCount(usize),
}

/// One facial reference point in the provider's normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Ordered mesh of exactly [`LANDMARK_COUNT`] landmarks for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkVector {
    points: Vec<Landmark>,
}

impl LandmarkVector {
    pub fn new(points: Vec<Landmark>) -> Result<Self, LandmarkError> {
        if points.len() != LANDMARK_COUNT {
            return Err(LandmarkError::WrongPointCount(points.len()));
        }
        Ok(Self { points })
    }

    /// Build from interleaved `[x0, y0, z0, x1, y1, z1, ...]` values.
    pub fn from_flat(values: &[f32]) -> Result<Self, LandmarkError> {
        if values.len() != LANDMARK_COUNT * 3 {
            return Err(LandmarkError::WrongValueCount(values.len()));
        }
        let points = values
            .chunks_exact(3)
            .map(|c| Landmark {
                x: c[0],
                y: c[1],
                z: c[2],
            })
            .collect();
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    /// Axis-aligned bounds in x/y: `(min_x, min_y, max_x, max_y)`.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        self.points.iter().fold(
            (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }
}

impl<'a> IntoIterator for &'a LandmarkVector {
    type Item = &'a Landmark;
    type IntoIter = std::slice::Iter<'a, Landmark>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// A labeled landmark vector, written to the dataset exactly once.
#[derive(Debug, Clone)]
pub struct Sample {
    label: Emotion,
    landmarks: LandmarkVector,
}

impl Sample {
    pub fn new(label: Emotion, landmarks: LandmarkVector) -> Self {
        Self { label, landmarks }
    }

    pub fn label(&self) -> Emotion {
        self.label
    }

    pub fn landmarks(&self) -> &LandmarkVector {
        &self.landmarks
    }
}

/// Face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Source of per-frame face meshes.
///
/// Implementations may keep tracking state between calls. Results are in
/// the provider's order; callers use the first entry and ignore the rest.
pub trait LandmarkProvider {
    type Error: std::fmt::Display;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<LandmarkVector>, Self::Error>;
}

#[cfg(test)]
pub(crate) fn test_mesh(seed: f32) -> LandmarkVector {
    let points = (0..LANDMARK_COUNT)
        .map(|i| Landmark {
            x: seed + i as f32 / 1000.0,
            y: 0.5,
            z: -0.01,
        })
        .collect();
    LandmarkVector::new(points).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_vector_requires_exact_count() {
        let short = vec![Landmark { x: 0.0, y: 0.0, z: 0.0 }; 467];
        assert_eq!(
            LandmarkVector::new(short).unwrap_err(),
            LandmarkError::WrongPointCount(467)
        );
    }

    #[test]
    fn test_from_flat_interleaving() {
        let values: Vec<f32> = (0..LANDMARK_COUNT * 3).map(|i| i as f32).collect();
        let mesh = LandmarkVector::from_flat(&values).unwrap();
        assert_eq!(mesh.points()[1], Landmark { x: 3.0, y: 4.0, z: 5.0 });
        assert_eq!(mesh.points().len(), LANDMARK_COUNT);
        assert!(LandmarkVector::from_flat(&values[..10]).is_err());
    }

    #[test]
    fn test_bounds() {
        let mesh = test_mesh(0.1);
        let (x0, y0, x1, y1) = mesh.bounds();
        assert!((x0 - 0.1).abs() < 1e-6);
        assert!((x1 - (0.1 + 467.0 / 1000.0)).abs() < 1e-6);
        assert_eq!((y0, y1), (0.5, 0.5));
    }

    #[test]
    fn test_iou() {
        let a = FaceBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0 };
        let b = FaceBox { x: 5.0, ..a };
        let c = FaceBox { x: 20.0, y: 20.0, ..a };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert!(a.iou(&c).abs() < 1e-6);
    }
}
