use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Face embedding vector (1280-dimensional for the default MobileNet feature model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Squared differences are accumulated in f64 so long vectors do not
    /// drift; the result is narrowed to f32 at the end.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (f64::from(*a) - f64::from(*b)).powi(2))
            .sum::<f64>()
            .sqrt() as f32
    }
}

/// An enrolled identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
}

/// Persona row with enrollment metadata, as listed by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaSummary {
    pub id: String,
    pub name: String,
    pub embeddings: usize,
    pub enrolled_at: Option<DateTime<Utc>>,
}

/// A stored embedding together with the persona that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub persona_id: String,
    pub embedding: Embedding,
}

/// Verdict for one analyzed face crop.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Recognized {
        persona_id: String,
        persona_name: String,
        /// Euclidean distance of the accepted match.
        distance: f32,
    },
    /// No enrolled persona is close enough; carries the crop for enrollment.
    Unknown { face: RgbImage },
}

impl MatchResult {
    pub fn is_recognized(&self) -> bool {
        matches!(self, MatchResult::Recognized { .. })
    }
}
