//! Frame type, upright rotation and face cropping.

use image::{imageops, RgbImage};
use persona_core::{Rect, Rotation, Size};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("face box {rect:?} lies outside the {width}x{height} frame")]
    EmptyCrop { rect: Rect, width: u32, height: u32 },
}

/// A captured color camera frame in native sensor orientation.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Clockwise rotation that turns `image` upright.
    pub rotation: Rotation,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("rotation", &self.rotation)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Frame {
    pub fn new(image: RgbImage, rotation: Rotation, sequence: u32) -> Self {
        Self {
            image,
            rotation,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// Native sensor dimensions.
    pub fn sensor_size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }

    /// The frame rotated so that faces are upright.
    pub fn upright(&self) -> RgbImage {
        match self.rotation {
            Rotation::Deg0 => self.image.clone(),
            Rotation::Deg90 => imageops::rotate90(&self.image),
            Rotation::Deg180 => imageops::rotate180(&self.image),
            Rotation::Deg270 => imageops::rotate270(&self.image),
        }
    }
}

/// Copy the region under `rect`, clamped to the image bounds.
pub fn crop_face(image: &RgbImage, rect: Rect) -> Result<RgbImage, FrameError> {
    let clamp_x = |v: i32| v.clamp(0, image.width() as i32) as u32;
    let clamp_y = |v: i32| v.clamp(0, image.height() as i32) as u32;

    let (left, right) = (clamp_x(rect.left), clamp_x(rect.right));
    let (top, bottom) = (clamp_y(rect.top), clamp_y(rect.bottom));

    if right <= left || bottom <= top {
        return Err(FrameError::EmptyCrop {
            rect,
            width: image.width(),
            height: image.height(),
        });
    }

    Ok(imageops::crop_imm(image, left, top, right - left, bottom - top).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 0]))
    }

    #[test]
    fn test_upright_swaps_dimensions() {
        let frame = Frame::new(gradient(6, 4), Rotation::Deg90, 1);
        assert_eq!(frame.sensor_size(), Size::new(6, 4));
        assert_eq!(frame.upright().dimensions(), (4, 6));

        let frame = Frame::new(gradient(6, 4), Rotation::Deg180, 2);
        assert_eq!(frame.upright().dimensions(), (6, 4));
    }

    #[test]
    fn test_upright_matches_box_rotation() {
        // The sensor pixel at (0, 0) moves to the top-right corner after 90°.
        let frame = Frame::new(gradient(6, 4), Rotation::Deg90, 1);
        let upright = frame.upright();
        assert_eq!(upright.get_pixel(3, 0).0, [0, 0, 0]);

        let rect = persona_core::mapper::rotate_to_upright(
            Rect::new(0, 0, 1, 1),
            frame.sensor_size(),
            Rotation::Deg90,
        );
        assert_eq!(rect, Rect::new(3, 0, 4, 1));
    }

    #[test]
    fn test_crop_face_inside() {
        let crop = crop_face(&gradient(10, 10), Rect::new(2, 3, 6, 8)).unwrap();
        assert_eq!(crop.dimensions(), (4, 5));
        assert_eq!(crop.get_pixel(0, 0).0, [2, 3, 0]);
    }

    #[test]
    fn test_crop_face_clamps_to_frame() {
        let crop = crop_face(&gradient(10, 10), Rect::new(-5, 7, 4, 20)).unwrap();
        assert_eq!(crop.dimensions(), (4, 3));
    }

    #[test]
    fn test_crop_face_outside_frame() {
        let err = crop_face(&gradient(10, 10), Rect::new(12, 0, 20, 5)).unwrap_err();
        assert!(matches!(err, FrameError::EmptyCrop { .. }));
    }
}
