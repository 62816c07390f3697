//! Property-based tests for the index engines
//!
//! Uses proptest to verify index invariants with random inputs, plus
//! deterministic end-to-end scenarios against brute-force references.

use proptest::prelude::*;
use proxima_vector::{
    BoundedQueue, ClusterKind, DistanceCalc, DistanceKind, HnswConfig, HnswIndex, IvfConfig,
    IvfIndex, ScalarQuantizer, SearchResult, VectorId,
};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Strategy for vectors with bounded components.
fn vector_strategy(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0f32, dim..=dim)
}

/// Exhaustive reference search: ranked ordering with ties on id, raw
/// distances reported.
fn brute_force(
    rows: &[(VectorId, Vec<f32>)],
    query: &[f32],
    k: usize,
    kind: DistanceKind,
) -> Vec<SearchResult> {
    let calc = DistanceCalc::new(kind);
    let mut scored: Vec<(f32, VectorId)> = rows
        .iter()
        .map(|(id, v)| (calc.ranked(query, v), *id))
        .collect();
    scored.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    scored
        .into_iter()
        .take(k)
        .map(|(distance, id)| SearchResult {
            id,
            distance: calc.raw_from_ranked(distance),
        })
        .collect()
}

proptest! {
    /// Flat IVF probing every cluster is an exhaustive search: results
    /// must match the brute-force reference exactly.
    #[test]
    fn test_ivf_full_probe_matches_brute_force(
        vectors in prop::collection::vec(vector_strategy(4), 9..40),
        k in 1usize..8
    ) {
        let rows: Vec<(VectorId, Vec<f32>)> = vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i as VectorId, v))
            .collect();

        let config = IvfConfig::new(ClusterKind::Flat, DistanceKind::L2, 4, 3, 3);
        let mut index = IvfIndex::new(config).unwrap();
        for (id, v) in &rows {
            index.add(*id, v).unwrap();
        }
        index.build().unwrap();

        let query = rows[0].1.clone();
        let hits = index.search(&query, k).unwrap();
        let reference = brute_force(&rows, &query, k, DistanceKind::L2);

        let hit_ids: Vec<VectorId> = hits.iter().map(|h| h.id).collect();
        let ref_ids: Vec<VectorId> = reference.iter().map(|h| h.id).collect();
        prop_assert_eq!(hit_ids, ref_ids);
        for (hit, want) in hits.iter().zip(reference.iter()) {
            prop_assert!((hit.distance - want.distance).abs() < 1e-6);
        }
    }

    /// After every insert the HNSW graph stays an undirected graph per
    /// layer and no neighbor list exceeds the cap.
    #[test]
    fn test_hnsw_symmetry_and_capacity(
        vectors in prop::collection::vec(vector_strategy(4), 5..50)
    ) {
        let config = HnswConfig {
            m: 4,
            m_max: 6,
            ef_construction: 24,
            ef_search: 24,
            seed: 0,
        };
        let mut index = HnswIndex::new(config, 4, DistanceKind::L2).unwrap();
        let ids: Vec<VectorId> = (0..vectors.len() as VectorId).collect();
        for (id, v) in ids.iter().zip(vectors.iter()) {
            index.insert(*id, v).unwrap();
        }

        for &id in &ids {
            for layer in 0..=index.max_level() {
                let Some(neighbors) = index.neighbors(id, layer) else {
                    continue;
                };
                prop_assert!(neighbors.len() <= 6);
                for v in neighbors {
                    let back = index.neighbors(v, layer);
                    prop_assert!(
                        back.is_some_and(|list| list.contains(&id)),
                        "edge {} -> {} at layer {} has no reciprocal", id, v, layer
                    );
                }
            }
        }
    }

    /// The bounded queue's dump equals the k smallest of the stream as a
    /// multiset.
    #[test]
    fn test_bounded_queue_retains_k_smallest(
        values in prop::collection::vec(-1000i32..1000, 0..60),
        k in 1usize..20
    ) {
        let mut queue: BoundedQueue<i32, fn(&i32, &i32) -> Ordering> =
            BoundedQueue::new(k, |a: &i32, b: &i32| a.cmp(b));
        for &v in &values {
            queue.push(v);
        }

        let mut kept = queue.dump();
        kept.reverse();

        let mut expected = values.clone();
        expected.sort_unstable();
        expected.truncate(k);
        prop_assert_eq!(kept, expected);
    }

    /// Scalar-quantized i8 codes reconstruct residuals within the grid
    /// step of the captured range.
    #[test]
    fn test_sq_i8_round_trip(
        vectors in prop::collection::vec(
            prop::collection::vec(-10.0f32..10.0, 8..=8),
            2..20
        )
    ) {
        let centroid = vec![0.5f32; 8];
        let mut quantizer: ScalarQuantizer<i8> = ScalarQuantizer::new(centroid);
        for v in &vectors {
            quantizer.add(v);
        }
        let codes = quantizer.train();

        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for v in &vectors {
            for &x in v {
                min = min.min(x - 0.5);
                max = max.max(x - 0.5);
            }
        }
        let step = (f64::from(max) - f64::from(min)) / (2.0 * f64::from(i8::MAX));

        for (v, code) in vectors.iter().zip(codes.iter()) {
            let restored = quantizer.dequantize_absolute(code);
            for (x, y) in v.iter().zip(restored.iter()) {
                prop_assert!(
                    f64::from((x - y).abs()) <= 2.0 * step + 1e-4,
                    "component error {} beyond quantization step {}", (x - y).abs(), step
                );
            }
        }
    }
}

mod deterministic {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn random_rows(count: usize, dim: usize, seed: u64) -> Vec<(VectorId, Vec<f32>)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|i| {
                (
                    i as VectorId,
                    (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect(),
                )
            })
            .collect()
    }

    /// Product quantization keeps enough signal: recall@10 against the
    /// exhaustive reference stays above one half.
    #[test]
    fn test_pq_recall_at_10() {
        let rows = random_rows(1000, 16, 21);
        let config = IvfConfig::new(ClusterKind::Pq, DistanceKind::L2, 16, 4, 4).with_seed(21);
        let mut index = IvfIndex::new(config).unwrap();
        for (id, v) in &rows {
            index.add(*id, v).unwrap();
        }
        index.build().unwrap();

        let mut hit = 0usize;
        let mut total = 0usize;
        for (_, query) in rows.iter().step_by(50) {
            let approx = index.search(query, 10).unwrap();
            let exact = brute_force(&rows, query, 10, DistanceKind::L2);
            let exact_ids: HashSet<VectorId> = exact.iter().map(|h| h.id).collect();
            hit += approx.iter().filter(|h| exact_ids.contains(&h.id)).count();
            total += exact.len();
        }

        let recall = hit as f64 / total as f64;
        assert!(recall >= 0.5, "recall@10 = {recall}");
    }

    /// Identical inputs and seed reproduce the exact same trained index.
    #[test]
    fn test_ivf_build_is_deterministic() {
        let rows = random_rows(60, 8, 33);
        let run = || {
            let config =
                IvfConfig::new(ClusterKind::SqI8, DistanceKind::L2, 8, 4, 4).with_seed(33);
            let mut index = IvfIndex::new(config).unwrap();
            for (id, v) in &rows {
                index.add(*id, v).unwrap();
            }
            index.build().unwrap();
            let mut out = Vec::new();
            for (_, query) in rows.iter().take(10) {
                out.push(index.search(query, 5).unwrap());
            }
            out
        };
        assert_eq!(run(), run());
    }

    /// HNSW recall against brute force on a moderate uniform set.
    #[test]
    fn test_hnsw_recall_against_brute_force() {
        let rows = random_rows(100, 8, 17);
        let config = HnswConfig {
            m: 8,
            m_max: 12,
            ef_construction: 64,
            ef_search: 64,
            seed: 17,
        };
        let mut index = HnswIndex::new(config, 8, DistanceKind::L2).unwrap();
        for (id, v) in &rows {
            index.insert(*id, v).unwrap();
        }

        let mut hit = 0usize;
        let mut total = 0usize;
        for (_, query) in rows.iter().step_by(5) {
            let approx = index.search(query, 5).unwrap();
            let exact = brute_force(&rows, query, 5, DistanceKind::L2);
            let exact_ids: HashSet<VectorId> = exact.iter().map(|h| h.id).collect();
            hit += approx.iter().filter(|h| exact_ids.contains(&h.id)).count();
            total += exact.len();
        }
        let recall = hit as f64 / total as f64;
        assert!(recall >= 0.8, "recall@5 = {recall}");
    }

    /// Cosine queries report similarity: results descend in raw value
    /// while still being ordered closest-first.
    #[test]
    fn test_cosine_results_descend() {
        let rows = random_rows(40, 6, 3);
        let config = IvfConfig::new(ClusterKind::Flat, DistanceKind::Cosine, 6, 2, 2);
        let mut index = IvfIndex::new(config).unwrap();
        for (id, v) in &rows {
            index.add(*id, v).unwrap();
        }
        index.build().unwrap();

        let hits = index.search(&rows[0].1, 10).unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].distance >= pair[1].distance);
        }
        assert!((hits[0].distance - 1.0).abs() < 1e-5, "self-similarity first");
    }
}
