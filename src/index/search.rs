//! Brute-force top-k cosine search over the catalog.
//!
//! Every entry is scored with a dot product (valid as cosine similarity
//! because both sides are unit vectors), then the k best are taken. O(N·D)
//! per query by design — fine while N stays in the low hundreds of
//! thousands, and any future ANN replacement must keep this ranking
//! contract.
use std::cmp::Ordering;

use super::{CatalogIndex, MatchResult};

impl CatalogIndex {
    /// Return the `k` highest-scoring entries for a unit-length query.
    ///
    /// `k` is clamped to `max(1, min(k, N))`; an empty catalog yields an
    /// empty list. Ties are broken by the entry's original build position
    /// (lower index wins) so results are reproducible across runs.
    ///
    /// # Panics
    ///
    /// If `query` does not match the index dimension. That is a programming
    /// error — the engine only feeds the index embeddings produced for the
    /// configured dimension — not a user-facing condition.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<MatchResult> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        assert_eq!(
            query.len(),
            self.dimensions,
            "query dimension must match the loaded index"
        );

        let k = k.clamp(1, self.entries.len());

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, dot(query, &entry.embedding)))
            .collect();

        // Descending score, ascending insertion index on ties
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| {
                let entry = &self.entries[i];
                MatchResult {
                    name: entry.name.clone(),
                    score,
                    thumbnail: entry.thumbnail.clone(),
                }
            })
            .collect()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CatalogEntry;

    fn index_of(rows: &[(&str, Vec<f32>)]) -> CatalogIndex {
        let dims = rows.first().map_or(0, |(_, v)| v.len());
        let entries = rows
            .iter()
            .map(|(name, v)| CatalogEntry {
                name: (*name).to_string(),
                embedding: v.clone(),
                thumbnail: None,
            })
            .collect();
        CatalogIndex::new(entries, dims).unwrap()
    }

    #[test]
    fn test_search_orthogonal_pair() {
        // A=[1,0], B=[0,1], query=[1,0], k=2 → [A 1.0, B 0.0]
        let index = index_of(&[("A", vec![1.0, 0.0]), ("B", vec![0.0, 1.0])]);
        let results = index.search(&[1.0, 0.0], 2);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "A");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[1].name, "B");
        assert!(results[1].score.abs() < 1e-6);
    }

    #[test]
    fn test_search_result_length_is_min_k_n() {
        let index = index_of(&[
            ("A", vec![1.0, 0.0]),
            ("B", vec![0.0, 1.0]),
            ("C", vec![-1.0, 0.0]),
        ]);
        assert_eq!(index.search(&[1.0, 0.0], 2).len(), 2);
        assert_eq!(index.search(&[1.0, 0.0], 10).len(), 3);
        // k = 0 is clamped up to 1
        assert_eq!(index.search(&[1.0, 0.0], 0).len(), 1);
    }

    #[test]
    fn test_search_empty_catalog_is_empty_result() {
        let index = CatalogIndex::new(Vec::new(), 0).unwrap();
        assert!(index.search(&[1.0, 0.0], 3).is_empty());
    }

    #[test]
    fn test_search_scores_non_increasing() {
        let index = index_of(&[
            ("far", vec![0.0, 1.0]),
            ("near", vec![1.0, 0.0]),
            ("mid", vec![0.7071, 0.7071]),
        ]);
        let results = index.search(&[1.0, 0.0], 3);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(results[0].name, "near");
        assert_eq!(results[1].name, "mid");
        assert_eq!(results[2].name, "far");
    }

    #[test]
    fn test_search_ties_break_by_insertion_order() {
        let index = index_of(&[
            ("first", vec![1.0, 0.0]),
            ("second", vec![1.0, 0.0]),
            ("third", vec![1.0, 0.0]),
        ]);
        let results = index.search(&[1.0, 0.0], 3);
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_search_score_matches_dot_product() {
        let index = index_of(&[("A", vec![0.6, 0.8])]);
        let query = [0.8, 0.6];
        let results = index.search(&query, 1);
        let expected = 0.8 * 0.6 + 0.6 * 0.8;
        assert!((results[0].score - expected).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "query dimension")]
    fn test_search_dimension_mismatch_panics() {
        let index = index_of(&[("A", vec![1.0, 0.0])]);
        index.search(&[1.0, 0.0, 0.0], 1);
    }
}
