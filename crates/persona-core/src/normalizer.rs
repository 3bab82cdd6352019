//! Face crop normalization: crop-or-pad to a square, nearest-neighbor resize,
//! then an affine channel transform into a float tensor.

use image::{imageops, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side of the square model input for the default MobileNet feature model.
pub const DEFAULT_TARGET_SIZE: u32 = 224;
/// Channel mean subtracted before scaling.
pub const DEFAULT_NORM_MEAN: f32 = 0.0;
/// Channel divisor; with a zero mean this maps 0–255 onto 0–1.
pub const DEFAULT_NORM_STD: f32 = 255.0;

const CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("invalid image: {width}x{height} face crop has no pixels")]
    InvalidImage { width: u32, height: u32 },
}

/// Memory layout of the produced tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, size, size, 3]`, as TFLite and Keras exports expect.
    #[default]
    Nhwc,
    /// `[1, 3, size, size]`, as PyTorch exports expect.
    Nchw,
}

/// Deterministic image → tensor transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageNormalizer {
    target_size: u32,
    mean: f32,
    std: f32,
    layout: TensorLayout,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_SIZE, DEFAULT_NORM_MEAN, DEFAULT_NORM_STD, TensorLayout::Nhwc)
    }
}

impl ImageNormalizer {
    pub fn new(target_size: u32, mean: f32, std: f32, layout: TensorLayout) -> Self {
        Self {
            target_size,
            mean,
            std,
            layout,
        }
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    /// Values produced for source channel values 0 and 255.
    pub fn output_range(&self) -> (f32, f32) {
        let lo = (0.0 - self.mean) / self.std;
        let hi = (255.0 - self.mean) / self.std;
        (lo.min(hi), lo.max(hi))
    }

    /// Normalize a face crop into a model input tensor.
    pub fn normalize(&self, image: &RgbImage) -> Result<Array4<f32>, NormalizeError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(NormalizeError::InvalidImage {
                width: image.width(),
                height: image.height(),
            });
        }

        let size = self.target_size;
        let square = crop_or_pad(image, size);
        let resized = imageops::resize(&square, size, size, imageops::FilterType::Nearest);

        Ok(self.to_tensor(&resized))
    }

    fn to_tensor(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.target_size as usize;
        let mut tensor = match self.layout {
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, size, size, CHANNELS)),
            TensorLayout::Nchw => Array4::<f32>::zeros((1, CHANNELS, size, size)),
        };

        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..CHANNELS {
                let value = (pixel[c] as f32 - self.mean) / self.std;
                match self.layout {
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                }
            }
        }

        tensor
    }
}

/// Center-crop or zero-pad `image` to a `target` × `target` square.
///
/// Each axis is handled independently: an axis longer than `target` is
/// cropped around its center, a shorter one is padded with black on both
/// sides.
pub fn crop_or_pad(image: &RgbImage, target: u32) -> RgbImage {
    let (src_x, dst_x, span_x) = axis_window(image.width(), target);
    let (src_y, dst_y, span_y) = axis_window(image.height(), target);

    let mut out = RgbImage::new(target, target);
    for y in 0..span_y {
        for x in 0..span_x {
            out.put_pixel(dst_x + x, dst_y + y, *image.get_pixel(src_x + x, src_y + y));
        }
    }
    out
}

/// (source offset, destination offset, copied span) along one axis.
fn axis_window(len: u32, target: u32) -> (u32, u32, u32) {
    if len >= target {
        ((len - target) / 2, 0, target)
    } else {
        (0, (target - len) / 2, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn test_output_shape_for_any_input_size() {
        let normalizer = ImageNormalizer::new(32, 0.0, 255.0, TensorLayout::Nhwc);
        for (w, h) in [(1, 1), (10, 50), (32, 32), (100, 20), (300, 301)] {
            let tensor = normalizer.normalize(&solid(w, h, 200)).unwrap();
            assert_eq!(tensor.shape(), &[1, 32, 32, 3], "input {w}x{h}");
        }
    }

    #[test]
    fn test_nchw_shape() {
        let normalizer = ImageNormalizer::new(16, 127.5, 127.5, TensorLayout::Nchw);
        let tensor = normalizer.normalize(&solid(40, 8, 10)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);
    }

    #[test]
    fn test_values_within_output_range() {
        let normalizer = ImageNormalizer::new(8, 127.5, 127.5, TensorLayout::Nhwc);
        let (lo, hi) = normalizer.output_range();
        assert_eq!((lo, hi), (-1.0, 1.0));

        let mut img = RgbImage::new(12, 5);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let v = ((x * 37 + y * 91) % 256) as u8;
            *p = Rgb([v, 255 - v, v / 2]);
        }
        let tensor = normalizer.normalize(&img).unwrap();
        assert!(tensor.iter().all(|&v| v >= lo && v <= hi));
    }

    #[test]
    fn test_default_scales_to_unit_range() {
        let normalizer =
            ImageNormalizer::new(4, DEFAULT_NORM_MEAN, DEFAULT_NORM_STD, TensorLayout::Nhwc);
        let tensor = normalizer.normalize(&solid(4, 4, 255)).unwrap();
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_padding_is_black() {
        // 2x2 white image padded into 4x4: border is zero, center is white.
        let normalizer = ImageNormalizer::new(4, 0.0, 255.0, TensorLayout::Nhwc);
        let tensor = normalizer.normalize(&solid(2, 2, 255)).unwrap();
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 3, 3, 2]], 0.0);
        assert_eq!(tensor[[0, 1, 1, 0]], 1.0);
        assert_eq!(tensor[[0, 2, 2, 1]], 1.0);
    }

    #[test]
    fn test_crop_keeps_center() {
        // 6x6 image with a distinct 2x2 center; cropping to 2 keeps exactly it.
        let mut img = solid(6, 6, 0);
        for (x, y) in [(2, 2), (3, 2), (2, 3), (3, 3)] {
            img.put_pixel(x, y, Rgb([9, 9, 9]));
        }
        let cropped = crop_or_pad(&img, 2);
        assert!(cropped.pixels().all(|p| p.0 == [9, 9, 9]));
    }

    #[test]
    fn test_crop_and_pad_mixed_axes() {
        // Wide strip: width cropped, height padded.
        let img = solid(10, 2, 100);
        let out = crop_or_pad(&img, 4);
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(0, 1).0, [100, 100, 100]);
        assert_eq!(out.get_pixel(3, 2).0, [100, 100, 100]);
        assert_eq!(out.get_pixel(3, 3).0, [0, 0, 0]);
    }

    #[test]
    fn test_zero_size_image_rejected() {
        let normalizer = ImageNormalizer::default();
        let err = normalizer.normalize(&RgbImage::new(0, 10)).unwrap_err();
        assert_eq!(err, NormalizeError::InvalidImage { width: 0, height: 10 });
        assert!(normalizer.normalize(&RgbImage::new(7, 0)).is_err());
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let normalizer = ImageNormalizer::new(8, 0.0, 255.0, TensorLayout::Nhwc);
        let img = solid(13, 9, 77);
        assert_eq!(normalizer.normalize(&img).unwrap(), normalizer.normalize(&img).unwrap());
    }
}
