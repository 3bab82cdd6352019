//! Pipeline boundary: normalize → extract → match → verdict, and enrollment.

use crate::extractor::{EmbeddingExtractor, ExtractorError};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::normalizer::{ImageNormalizer, NormalizeError};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{Embedding, MatchResult, Persona};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error(transparent)]
    InvalidImage(#[from] NormalizeError),
    #[error("extraction failed: {0}")]
    ExtractionFailed(#[from] ExtractorError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid enrollment: {0}")]
    InvalidEnrollment(String),
}

/// Resolves face crops to enrolled personas.
pub struct Recognizer<E, S> {
    normalizer: ImageNormalizer,
    extractor: E,
    store: S,
    matcher: EuclideanMatcher,
    threshold: f32,
}

impl<E: EmbeddingExtractor, S: EmbeddingStore> Recognizer<E, S> {
    pub fn new(normalizer: ImageNormalizer, extractor: E, store: S, threshold: f32) -> Self {
        Self {
            normalizer,
            extractor,
            store,
            matcher: EuclideanMatcher,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Normalize a face crop and run it through the extractor.
    pub fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognitionError> {
        let tensor = self.normalizer.normalize(face)?;
        Ok(self.extractor.extract(&tensor)?)
    }

    /// Match a face crop against every enrolled embedding.
    pub fn analyze(&mut self, face: &RgbImage) -> Result<MatchResult, RecognitionError> {
        let probe = self.embed(face)?;
        let gallery = self.store.all()?;
        let decision = self.matcher.compare(&probe, &gallery, self.threshold);

        tracing::debug!(
            gallery = gallery.len(),
            distance = ?decision.distance,
            matched = decision.matched,
            "match decision"
        );

        let Some(persona_id) = decision.persona_id.filter(|_| decision.matched) else {
            return Ok(MatchResult::Unknown { face: face.clone() });
        };

        match self.store.get(&persona_id)? {
            Some(persona) => {
                let distance = decision.distance.unwrap_or_default();
                tracing::info!(
                    persona = %persona.id,
                    name = %persona.name,
                    distance,
                    "face recognized"
                );
                Ok(MatchResult::Recognized {
                    persona_id: persona.id,
                    persona_name: persona.name,
                    distance,
                })
            }
            None => {
                tracing::warn!(persona = %persona_id, "matched embedding has no persona row");
                Ok(MatchResult::Unknown { face: face.clone() })
            }
        }
    }

    /// Enroll a face under `name`.
    ///
    /// Without an explicit `id` a UUID is assigned, unless the store keys
    /// personas by name. Such stores use the name as the id and reject any
    /// other explicit id.
    pub fn enroll(
        &mut self,
        id: Option<&str>,
        name: &str,
        face: &RgbImage,
    ) -> Result<Persona, RecognitionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RecognitionError::InvalidEnrollment(
                "name must not be empty".into(),
            ));
        }

        let id = match id.map(str::trim) {
            Some("") => {
                return Err(RecognitionError::InvalidEnrollment(
                    "id must not be empty".into(),
                ));
            }
            Some(id) if self.store.keyed_by_name() && id != name => {
                return Err(RecognitionError::InvalidEnrollment(format!(
                    "store identifies personas by name; id {id:?} must equal {name:?}"
                )));
            }
            _ if self.store.keyed_by_name() => name.to_string(),
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let embedding = self.embed(face)?;
        let persona = Persona {
            id,
            name: name.to_string(),
        };
        self.store.insert(&persona, &embedding)?;

        tracing::info!(persona = %persona.id, name = %persona.name, "face enrolled");
        Ok(persona)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::TensorLayout;
    use crate::store::{SqliteStore, StoreLayout};
    use crate::testing::{recognizer, recognizer_with, solid};
    use ndarray::Array4;

    struct Failing;

    impl EmbeddingExtractor for Failing {
        fn extract(&mut self, _: &Array4<f32>) -> Result<Embedding, ExtractorError> {
            Err(ExtractorError::InferenceFailed("model crashed".into()))
        }
    }

    #[test]
    fn test_empty_store_is_unknown() {
        let mut r = recognizer();
        let face = solid(10, 20, 30);
        assert_eq!(r.analyze(&face).unwrap(), MatchResult::Unknown { face });
    }

    #[test]
    fn test_enrolled_face_is_recognized() {
        let mut r = recognizer();
        let face = solid(200, 40, 90);
        r.enroll(Some("p1"), "Ada", &face).unwrap();

        match r.analyze(&face).unwrap() {
            MatchResult::Recognized {
                persona_id,
                persona_name,
                distance,
            } => {
                assert_eq!(persona_id, "p1");
                assert_eq!(persona_name, "Ada");
                assert_eq!(distance, 0.0);
            }
            other => panic!("expected recognized, got {other:?}"),
        }
    }

    #[test]
    fn test_far_face_is_unknown() {
        let mut r = recognizer();
        // Channel means (0,0,0) vs (1,0,0.6)-ish: distance well above 0.5.
        r.enroll(Some("p1"), "Ada", &solid(0, 0, 0)).unwrap();
        let result = r.analyze(&solid(255, 0, 153)).unwrap();
        assert!(!result.is_recognized());
    }

    #[test]
    fn test_closest_of_several_wins() {
        let mut r = recognizer();
        r.enroll(Some("dark"), "Dark", &solid(0, 0, 0)).unwrap();
        r.enroll(Some("light"), "Light", &solid(250, 250, 250)).unwrap();
        match r.analyze(&solid(240, 240, 240)).unwrap() {
            MatchResult::Recognized { persona_id, .. } => assert_eq!(persona_id, "light"),
            other => panic!("expected recognized, got {other:?}"),
        }
    }

    #[test]
    fn test_enroll_assigns_uuid() {
        let mut r = recognizer();
        let persona = r.enroll(None, "  Grace ", &solid(1, 2, 3)).unwrap();
        assert_eq!(persona.name, "Grace");
        assert!(uuid::Uuid::parse_str(&persona.id).is_ok());
        assert_eq!(r.store().get(&persona.id).unwrap(), Some(persona));
    }

    #[test]
    fn test_enroll_rejects_empty_name() {
        let mut r = recognizer();
        let err = r.enroll(Some("p1"), "   ", &solid(1, 2, 3)).unwrap_err();
        assert!(matches!(err, RecognitionError::InvalidEnrollment(_)));
        assert!(r.store().all().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_image_propagates() {
        let mut r = recognizer();
        let err = r.analyze(&RgbImage::new(0, 4)).unwrap_err();
        assert!(matches!(err, RecognitionError::InvalidImage(_)));
    }

    #[test]
    fn test_extractor_failure_propagates() {
        let store = SqliteStore::open_in_memory(StoreLayout::Normalized).unwrap();
        let normalizer = ImageNormalizer::new(4, 0.0, 255.0, TensorLayout::Nhwc);
        let mut r = Recognizer::new(normalizer, Failing, store, 0.5);
        let err = r.analyze(&solid(1, 1, 1)).unwrap_err();
        assert!(matches!(err, RecognitionError::ExtractionFailed(_)));
        assert!(r.enroll(Some("p1"), "Ada", &solid(1, 1, 1)).is_err());
    }

    #[test]
    fn test_single_table_layout_recognizes() {
        let mut r = recognizer_with(StoreLayout::SingleTable);
        let face = solid(90, 90, 10);
        r.enroll(None, "Linus", &face).unwrap();
        match r.analyze(&face).unwrap() {
            MatchResult::Recognized { persona_name, .. } => assert_eq!(persona_name, "Linus"),
            other => panic!("expected recognized, got {other:?}"),
        }
    }

    #[test]
    fn test_enrolled_id_resolves_in_both_layouts() {
        for layout in [StoreLayout::Normalized, StoreLayout::SingleTable] {
            let mut r = recognizer_with(layout);
            let persona = r.enroll(None, "Ada", &solid(12, 34, 56)).unwrap();
            let stored = r.store().get(&persona.id).unwrap();
            assert_eq!(stored, Some(persona.clone()), "{layout}");
            assert_eq!(r.store().personas().unwrap()[0].id, persona.id, "{layout}");
        }
    }

    #[test]
    fn test_single_table_uses_name_as_id() {
        let mut r = recognizer_with(StoreLayout::SingleTable);
        let persona = r.enroll(Some("Ada"), " Ada ", &solid(1, 2, 3)).unwrap();
        assert_eq!(persona.id, "Ada");

        let err = r.enroll(Some("p1"), "Grace", &solid(4, 5, 6)).unwrap_err();
        assert!(matches!(err, RecognitionError::InvalidEnrollment(_)));
        assert!(r.store().get("Grace").unwrap().is_none());
    }
}
