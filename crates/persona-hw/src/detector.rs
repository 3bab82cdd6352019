//! Face detector seam.

use image::RgbImage;
use persona_core::Rect;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("detection failed: {0}")]
    Failed(String),
}

/// Finds faces in an upright frame. Boxes are in the frame's pixel space.
pub trait FaceDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Rect>, DetectError>;
}

/// Reports the whole frame as a single face.
///
/// Used when the frame stream already consists of face crops.
#[derive(Debug, Clone, Copy)]
pub struct FullFrameDetector {
    /// Frames whose shorter side is below this are treated as empty.
    pub min_side: u32,
}

impl Default for FullFrameDetector {
    fn default() -> Self {
        Self { min_side: 16 }
    }
}

impl FaceDetector for FullFrameDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Rect>, DetectError> {
        let (width, height) = image.dimensions();
        if width.min(height) < self.min_side {
            return Ok(Vec::new());
        }
        Ok(vec![Rect::new(0, 0, width as i32, height as i32)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_frame_box() {
        let mut detector = FullFrameDetector::default();
        let boxes = detector.detect(&RgbImage::new(64, 48)).unwrap();
        assert_eq!(boxes, vec![Rect::new(0, 0, 64, 48)]);
    }

    #[test]
    fn test_tiny_frame_has_no_face() {
        let mut detector = FullFrameDetector { min_side: 32 };
        assert!(detector.detect(&RgbImage::new(100, 20)).unwrap().is_empty());
    }
}
