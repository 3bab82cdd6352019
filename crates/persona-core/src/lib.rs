//! persona-core — face identity resolution.
//!
//! Normalizes face crops, extracts embeddings via ONNX Runtime, matches them
//! against enrolled personas stored in SQLite, and gates frame analysis
//! through the recognition lifecycle.

pub mod config;
pub mod extractor;
pub mod lifecycle;
pub mod mapper;
pub mod matcher;
pub mod normalizer;
pub mod recognizer;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::Config;
pub use extractor::{EmbeddingExtractor, OnnxExtractor};
pub use lifecycle::{AnalysisPermit, Lifecycle, RecognitionState};
pub use mapper::{BoundingBox, CoordinateSpace, Rect, Rotation, Size};
pub use matcher::{EuclideanMatcher, Matcher};
pub use normalizer::{ImageNormalizer, TensorLayout};
pub use recognizer::{RecognitionError, Recognizer};
pub use store::{EmbeddingStore, SqliteStore, StoreLayout};
pub use types::{Embedding, MatchResult, Persona, PersonaSummary, StoredEmbedding};
