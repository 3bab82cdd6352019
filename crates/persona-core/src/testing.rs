//! Deterministic doubles for exercising the pipeline without a model.

use crate::extractor::{EmbeddingExtractor, ExtractorError};
use crate::normalizer::{ImageNormalizer, TensorLayout};
use crate::recognizer::Recognizer;
use crate::store::{SqliteStore, StoreLayout};
use crate::types::Embedding;
use image::{Rgb, RgbImage};
use ndarray::Array4;

/// Extractor whose embedding is the per-channel mean of the tensor.
pub struct ChannelMean;

impl EmbeddingExtractor for ChannelMean {
    fn extract(&mut self, input: &Array4<f32>) -> Result<Embedding, ExtractorError> {
        let (mut sums, mut count) = ([0.0f32; 3], 0usize);
        for pixel in input.rows() {
            for (c, v) in pixel.iter().enumerate() {
                sums[c] += v;
            }
            count += 1;
        }
        Ok(Embedding::new(
            sums.iter().map(|s| s / count as f32).collect(),
        ))
    }
}

/// In-memory recognizer over `layout` with a 0.5 threshold.
pub fn recognizer_with(layout: StoreLayout) -> Recognizer<ChannelMean, SqliteStore> {
    let store = SqliteStore::open_in_memory(layout).expect("in-memory store");
    Recognizer::new(
        ImageNormalizer::new(8, 0.0, 255.0, TensorLayout::Nhwc),
        ChannelMean,
        store,
        0.5,
    )
}

pub fn recognizer() -> Recognizer<ChannelMean, SqliteStore> {
    recognizer_with(StoreLayout::Normalized)
}

/// 8x8 crop of a single colour.
pub fn solid(r: u8, g: u8, b: u8) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb([r, g, b]))
}
