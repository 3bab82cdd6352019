//! Nearest-neighbor matching over enrolled embeddings.

use crate::types::{Embedding, StoredEmbedding};

/// Maximum Euclidean distance at which a match is accepted.
pub const DEFAULT_RECOGNITION_THRESHOLD: f32 = 0.5;

/// Closest gallery entry found by a linear scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Closest {
    /// Position of the entry in the scanned gallery.
    pub index: usize,
    pub persona_id: String,
    pub distance: f32,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub matched: bool,
    /// Distance of the closest candidate, accepted or not (if any was scanned).
    pub distance: Option<f32>,
    /// Persona of the accepted match.
    pub persona_id: Option<String>,
}

/// Find the gallery entry closest to `query`.
///
/// Candidates whose dimension differs from the query are skipped. On equal
/// distances the first candidate in gallery order wins.
pub fn find_closest(query: &Embedding, gallery: &[StoredEmbedding]) -> Option<Closest> {
    let mut best: Option<Closest> = None;

    for (index, candidate) in gallery.iter().enumerate() {
        if candidate.embedding.len() != query.len() {
            tracing::warn!(
                persona = %candidate.persona_id,
                expected = query.len(),
                actual = candidate.embedding.len(),
                "skipping stored embedding with mismatched dimension"
            );
            continue;
        }

        let distance = query.euclidean_distance(&candidate.embedding);
        if distance.is_nan() {
            tracing::warn!(
                persona = %candidate.persona_id,
                "skipping stored embedding with NaN distance"
            );
            continue;
        }

        let closer = best.as_ref().map_or(true, |b| distance < b.distance);
        if closer {
            best = Some(Closest {
                index,
                persona_id: candidate.persona_id.clone(),
                distance,
            });
        }
    }

    best
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[StoredEmbedding],
        threshold: f32,
    ) -> MatchDecision;
}

/// Euclidean nearest-neighbor matcher: accepts when the closest distance is
/// strictly below the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[StoredEmbedding],
        threshold: f32,
    ) -> MatchDecision {
        match find_closest(probe, gallery) {
            Some(closest) if closest.distance < threshold => MatchDecision {
                matched: true,
                distance: Some(closest.distance),
                persona_id: Some(closest.persona_id),
            },
            Some(closest) => MatchDecision {
                matched: false,
                distance: Some(closest.distance),
                persona_id: None,
            },
            None => MatchDecision {
                matched: false,
                distance: None,
                persona_id: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: &str, values: Vec<f32>) -> StoredEmbedding {
        StoredEmbedding {
            persona_id: id.into(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_find_closest_exact_match() {
        let e = Embedding::new(vec![0.3, 0.1, -0.2]);
        let gallery = vec![stored("p1", e.values.clone())];
        let closest = find_closest(&e, &gallery).unwrap();
        assert_eq!(closest.persona_id, "p1");
        assert_eq!(closest.distance, 0.0);
    }

    #[test]
    fn test_find_closest_scans_whole_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            stored("decoy1", vec![0.0, 1.0, 0.0]),
            stored("decoy2", vec![0.0, 0.0, 1.0]),
            stored("match", vec![0.9, 0.0, 0.0]),
        ];
        let closest = find_closest(&probe, &gallery).unwrap();
        assert_eq!(closest.index, 2);
        assert_eq!(closest.persona_id, "match");
    }

    #[test]
    fn test_find_closest_tie_keeps_first() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            stored("first", vec![1.0, 0.0]),
            stored("second", vec![0.0, 1.0]),
        ];
        let closest = find_closest(&probe, &gallery).unwrap();
        assert_eq!(closest.persona_id, "first");
    }

    #[test]
    fn test_find_closest_empty_gallery() {
        let probe = Embedding::new(vec![1.0]);
        assert!(find_closest(&probe, &[]).is_none());
    }

    #[test]
    fn test_find_closest_skips_mismatched_dimension() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            stored("short", vec![0.0]),
            stored("ok", vec![0.4, 0.0]),
        ];
        let closest = find_closest(&probe, &gallery).unwrap();
        assert_eq!(closest.persona_id, "ok");
    }

    #[test]
    fn test_matcher_accepts_below_threshold() {
        let probe = Embedding::new(vec![0.0, 0.0, 0.0]);
        let gallery = vec![stored("near", vec![0.3, 0.0, 0.0])];
        let decision = EuclideanMatcher.compare(&probe, &gallery, DEFAULT_RECOGNITION_THRESHOLD);
        assert!(decision.matched);
        assert_eq!(decision.persona_id.as_deref(), Some("near"));
    }

    #[test]
    fn test_matcher_rejects_closest_above_threshold() {
        let probe = Embedding::new(vec![0.0, 0.0, 0.0]);
        let gallery = vec![stored("far", vec![0.6, 0.0, 0.0])];
        let decision = EuclideanMatcher.compare(&probe, &gallery, 0.5);
        assert!(!decision.matched);
        assert!(decision.persona_id.is_none());
        assert!((decision.distance.unwrap() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_threshold_is_strict() {
        let probe = Embedding::new(vec![0.0]);
        let gallery = vec![stored("edge", vec![0.5])];
        let decision = EuclideanMatcher.compare(&probe, &gallery, 0.5);
        assert!(!decision.matched);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let decision = EuclideanMatcher.compare(&probe, &[], 0.5);
        assert!(!decision.matched);
        assert_eq!(decision.distance, None);
    }
}
