//! Nearest-identity lookup by cosine similarity.

use crate::registry::Registry;
use ndarray::ArrayView1;

/// Added to the similarity denominator so zero-norm rows never divide by zero.
const SIMILARITY_EPSILON: f32 = 1e-8;

/// Best match of a query embedding against a registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Registry index of the nearest identity, if any.
    pub index: Option<usize>,
    /// Cosine similarity of that identity in [-1, 1]; 0.0 without one.
    pub similarity: f32,
}

impl MatchResult {
    pub const NONE: MatchResult = MatchResult {
        index: None,
        similarity: 0.0,
    };

    /// Index of the matched identity when the similarity clears `threshold`.
    pub fn accepted(&self, threshold: f32) -> Option<usize> {
        self.index.filter(|_| self.similarity >= threshold)
    }
}

/// Strategy for finding the nearest identity of a query embedding.
pub trait Matcher {
    fn best_match(&self, query: &[f32], registry: &Registry) -> MatchResult;
}

/// Batched cosine similarity against the registry's precomputed matrix.
///
/// Pure: the same registry and query always give the same result. Ties go to
/// the lowest registry index.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, query: &[f32], registry: &Registry) -> MatchResult {
        if registry.is_empty() {
            return MatchResult::NONE;
        }
        if query.len() != registry.dim() {
            tracing::debug!(
                expected = registry.dim(),
                got = query.len(),
                "query embedding dimension mismatch"
            );
            return MatchResult::NONE;
        }

        let query = ArrayView1::from(query);
        let query_norm = query.dot(&query).sqrt();
        if query_norm == 0.0 || !query_norm.is_finite() {
            return MatchResult::NONE;
        }

        let dots = registry.embeddings().dot(&query);
        let sims = dots / (registry.norms() * query_norm + SIMILARITY_EPSILON);

        let mut best_idx = 0usize;
        let mut best_sim = f32::NEG_INFINITY;
        for (i, &sim) in sims.iter().enumerate() {
            if sim > best_sim {
                best_sim = sim;
                best_idx = i;
            }
        }
        if !best_sim.is_finite() {
            return MatchResult::NONE;
        }

        MatchResult {
            index: Some(best_idx),
            similarity: best_sim.clamp(-1.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(rows: &[(&str, &[f32])]) -> Registry {
        Registry::from_groups(rows.iter().map(|(n, e)| (n.to_string(), vec![e.to_vec()])))
    }

    #[test]
    fn test_identical_vector_matches() {
        let reg = registry(&[("decoy", &[0.0, 1.0, 0.0]), ("alice", &[1.0, 0.0, 0.0])]);
        let result = CosineMatcher.best_match(&[2.0, 0.0, 0.0], &reg);
        assert_eq!(result.index, Some(1));
        assert!((result.similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_opposite_vector() {
        let reg = registry(&[("a", &[1.0, 0.0])]);
        let result = CosineMatcher.best_match(&[-1.0, 0.0], &reg);
        assert_eq!(result.index, Some(0));
        assert!((result.similarity + 1.0).abs() < 1e-5);
        assert_eq!(result.accepted(0.45), None);
    }

    #[test]
    fn test_empty_registry_no_match() {
        let result = CosineMatcher.best_match(&[1.0, 0.0], &Registry::empty());
        assert_eq!(result, MatchResult::NONE);
    }

    #[test]
    fn test_zero_query_no_match() {
        let reg = registry(&[("a", &[1.0, 0.0])]);
        assert_eq!(CosineMatcher.best_match(&[0.0, 0.0], &reg), MatchResult::NONE);
    }

    #[test]
    fn test_dimension_mismatch_no_match() {
        let reg = registry(&[("a", &[1.0, 0.0])]);
        assert_eq!(CosineMatcher.best_match(&[1.0, 0.0, 0.0], &reg), MatchResult::NONE);
    }

    #[test]
    fn test_zero_reference_row_does_not_divide_by_zero() {
        let reg = registry(&[("zero", &[0.0, 0.0]), ("b", &[0.0, 1.0])]);
        let result = CosineMatcher.best_match(&[1.0, 1.0], &reg);
        assert_eq!(result.index, Some(1));
        assert!(result.similarity.is_finite());
    }

    #[test]
    fn test_tie_goes_to_first_identity() {
        let reg = registry(&[("first", &[1.0, 0.0]), ("second", &[1.0, 0.0])]);
        let result = CosineMatcher.best_match(&[1.0, 0.0], &reg);
        assert_eq!(result.index, Some(0));
    }

    #[test]
    fn test_similarity_bounded_and_deterministic() {
        let reg = registry(&[
            ("a", &[0.3, -0.7, 0.2, 0.9]),
            ("b", &[-0.1, 0.4, 0.8, -0.5]),
            ("c", &[1e6, 1e6, -1e6, 1e6]),
        ]);
        let queries: [[f32; 4]; 4] = [
            [0.3, -0.7, 0.2, 0.9],
            [1e-20, 0.0, 0.0, 1e-20],
            [-5.0, 3.0, 2.0, 1.0],
            [1e6, 1e6, -1e6, 1e6],
        ];
        for q in &queries {
            let first = CosineMatcher.best_match(q, &reg);
            let second = CosineMatcher.best_match(q, &reg);
            assert_eq!(first, second);
            assert!((-1.0..=1.0).contains(&first.similarity), "{first:?}");
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let result = MatchResult {
            index: Some(2),
            similarity: 0.45,
        };
        assert_eq!(result.accepted(0.45), Some(2));
        assert_eq!(result.accepted(0.46), None);
    }
}
