//! Index contract and construction factories

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use proxima_core::{Result, VectorId};

use crate::distance::DistanceKind;
use crate::hnsw::{HnswConfig, HnswIndex};
use crate::ivf::{ClusterKind, IvfConfig, IvfIndex};
use crate::topk::BoundedQueue;

/// One search hit. `distance` is the raw kernel value for the index's
/// metric (L2: squared distance; Ip/Cosine: similarity).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: VectorId,
    pub distance: f32,
}

/// Ordering on hits carrying ranked distances: closer first, ties on id.
pub(crate) fn by_distance(a: &SearchResult, b: &SearchResult) -> Ordering {
    a.distance
        .partial_cmp(&b.distance)
        .unwrap_or(Ordering::Equal)
        .then(a.id.cmp(&b.id))
}

pub(crate) type NeighborQueue =
    BoundedQueue<SearchResult, fn(&SearchResult, &SearchResult) -> Ordering>;

/// Bounded queue retaining the `k` closest hits.
pub(crate) fn neighbor_queue(k: usize) -> NeighborQueue {
    BoundedQueue::new(k, by_distance)
}

/// Insert-then-query vector index.
///
/// Both engines share the lifecycle: ids are unique per index, `build`
/// finalizes ingestion (a no-op for engines that build incrementally),
/// and after building the index is read-only for search.
pub trait VectorIndex {
    /// Insert a vector under a caller-supplied id.
    fn add(&mut self, id: VectorId, vector: &[f32]) -> Result<()>;

    /// Insert a vector under the next free monotonic id and return it.
    fn add_auto(&mut self, vector: &[f32]) -> Result<VectorId>;

    /// Finalize ingestion. Idempotent: repeated calls succeed without
    /// changing state.
    fn build(&mut self) -> Result<()>;

    /// The `k` nearest stored vectors, closest first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    /// Dimensionality fixed at construction.
    fn dimension(&self) -> usize;

    /// Number of inserted vectors.
    fn len(&self) -> usize;

    /// Check if the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create an IVF index with the given cluster storage strategy.
pub fn make_ivf_index(
    cluster_kind: ClusterKind,
    distance: DistanceKind,
    dim: usize,
    nlist: usize,
    nprobe: usize,
) -> Result<Box<dyn VectorIndex>> {
    let index = IvfIndex::new(IvfConfig::new(cluster_kind, distance, dim, nlist, nprobe))?;
    Ok(Box::new(index))
}

/// Create an HNSW index.
pub fn make_hnsw_index(
    m: usize,
    m_max: usize,
    ef_construction: usize,
    ef_search: usize,
    dim: usize,
    distance: DistanceKind,
) -> Result<Box<dyn VectorIndex>> {
    let config = HnswConfig {
        m,
        m_max,
        ef_construction,
        ef_search,
        ..HnswConfig::default()
    };
    let index = HnswIndex::new(config, dim, distance)?;
    Ok(Box::new(index))
}
