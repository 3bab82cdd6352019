//! Face embedding extraction via ONNX Runtime.
//!
//! The model is opaque to the pipeline: it takes the normalized face tensor
//! and returns a fixed-length feature vector.

use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Embedding length of the default MobileNet feature model.
pub const DEFAULT_FEATURE_VECTOR_SIZE: usize = 1280;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-dim embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a normalized face tensor into an embedding.
///
/// Implementations must not mutate the input and must return the same
/// embedding for the same tensor.
pub trait EmbeddingExtractor {
    fn extract(&mut self, input: &Array4<f32>) -> Result<Embedding, ExtractorError>;
}

/// ONNX feature-vector model.
pub struct OnnxExtractor {
    session: Session,
    embedding_dim: usize,
}

impl OnnxExtractor {
    /// Load the embedding model from the given path.
    pub fn load(model_path: &str, embedding_dim: usize) -> Result<Self, ExtractorError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            embedding_dim,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self {
            session,
            embedding_dim,
        })
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn extract(&mut self, input: &Array4<f32>) -> Result<Embedding, ExtractorError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractorError::InferenceFailed(format!("embedding extraction: {e}")))?;

        checked_embedding(raw_data.to_vec(), self.embedding_dim)
    }
}

/// Wrap raw model output, rejecting vectors of the wrong length.
pub fn checked_embedding(values: Vec<f32>, expected: usize) -> Result<Embedding, ExtractorError> {
    if values.len() != expected {
        return Err(ExtractorError::DimensionMismatch {
            expected,
            actual: values.len(),
        });
    }
    Ok(Embedding::new(values))
}
