//! Frame type and pixel conversion: YUYV/GREY to RGB, mirroring.

/// A captured RGB camera frame (8 bits per channel, row-major, no padding).
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Build a frame from packed RGB bytes, checking the buffer length.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = (width * height * 3) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A frame filled with a single colour. Mostly useful for tests and placeholders.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Self {
            data,
            width,
            height,
        }
    }

    /// RGB value at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Flip the frame left-to-right in place.
    ///
    /// Landmarks detected afterwards are expressed in the mirrored image's
    /// coordinate frame.
    pub fn mirror_horizontal(&mut self) {
        let row_bytes = self.width as usize * 3;
        if row_bytes == 0 {
            return;
        }
        for row in self.data.chunks_exact_mut(row_bytes) {
            let w = row.len() / 3;
            for x in 0..w / 2 {
                let left = x * 3;
                let right = (w - 1 - x) * 3;
                for c in 0..3 {
                    row.swap(left + c, right + c);
                }
            }
        }
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 studio-swing coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to RGB by replicating the single channel.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    Ok(gray[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_neutral_grey() {
        // Y=126 with neutral chroma maps to mid grey.
        let yuyv = vec![126, 128, 126, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![128, 128, 128, 128, 128, 128]);
    }

    #[test]
    fn test_yuyv_to_rgb_black_and_white() {
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert_eq!(&rgb[3..], &[255, 255, 255]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb_replicates() {
        let rgb = grey_to_rgb(&[7, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn test_from_rgb_checks_length() {
        assert!(Frame::from_rgb(vec![0; 11], 2, 2).is_err());
        assert!(Frame::from_rgb(vec![0; 12], 2, 2).is_ok());
    }

    #[test]
    fn test_mirror_horizontal_swaps_columns() {
        // 3x2 frame, each pixel tagged with its column in the red channel.
        let data = vec![
            0, 1, 1, 10, 1, 1, 20, 1, 1, //
            0, 2, 2, 10, 2, 2, 20, 2, 2,
        ];
        let mut frame = Frame::from_rgb(data, 3, 2).unwrap();
        frame.mirror_horizontal();
        assert_eq!(frame.pixel(0, 0), Some([20, 1, 1]));
        assert_eq!(frame.pixel(1, 0), Some([10, 1, 1]));
        assert_eq!(frame.pixel(2, 1), Some([0, 2, 2]));
    }

    #[test]
    fn test_mirror_twice_is_identity() {
        let data: Vec<u8> = (0..4 * 3 * 3).map(|i| i as u8).collect();
        let mut frame = Frame::from_rgb(data.clone(), 4, 3).unwrap();
        frame.mirror_horizontal();
        assert_ne!(frame.data, data);
        frame.mirror_horizontal();
        assert_eq!(frame.data, data);
    }

    #[test]
    fn test_pixel_out_of_bounds() {
        let frame = Frame::solid(2, 2, [1, 2, 3]);
        assert_eq!(frame.pixel(1, 1), Some([1, 2, 3]));
        assert_eq!(frame.pixel(2, 0), None);
    }
}
