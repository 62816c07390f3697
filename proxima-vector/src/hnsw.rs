//! HNSW (Hierarchical Navigable Small World) index
//!
//! A multi-layer proximity graph: layer 0 holds every vector, each higher
//! layer an exponentially thinner sample. Inserts descend greedily from
//! the top layer, then wire the new node into its `ef_construction`-wide
//! candidate neighborhood on every layer it occupies. Edges are kept
//! symmetric per layer and capped at `m_max`; the farthest edge is pruned
//! (together with its reciprocal) when a node spills over.
//!
//! Nodes live in an arena keyed by id and reference each other as
//! `(distance, id)` pairs, so the cyclic neighborhood structure never
//! holds pointers.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::debug;

use proxima_core::{Error, Result, VectorId};
use proxima_storage::{MemoryVectorStorage, VectorStorage};

use crate::distance::{DistanceCalc, DistanceKind};
use crate::index::{SearchResult, VectorIndex};
use crate::topk::BoundedQueue;

/// Configuration for the HNSW graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Neighbors targeted per layer for a freshly inserted node (M).
    /// Higher M = better recall, more memory, slower insertions.
    pub m: usize,

    /// Hard cap on neighbors per layer, at least `m`.
    pub m_max: usize,

    /// Candidate-set width during construction.
    /// Higher = better quality graph, slower insertion.
    pub ef_construction: usize,

    /// Candidate-set width during search.
    /// Higher = better recall, slower search.
    pub ef_search: usize,

    /// Seed for the level-sampling RNG.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m_max: 32,
            ef_construction: 200,
            ef_search: 100,
            seed: 0,
        }
    }
}

/// Ceiling on sampled levels; `-ln(u) * mult` spikes for tiny `u`.
const MAX_LEVEL: usize = 16;

struct HnswNode {
    level: usize,
    /// Per-layer neighbors as (ranked distance, id), ascending.
    neighbors: Vec<Vec<(f32, VectorId)>>,
}

impl HnswNode {
    fn new(level: usize) -> Self {
        Self {
            level,
            neighbors: vec![Vec::new(); level + 1],
        }
    }
}

/// Min-heap entry for the beam-search frontier.
#[derive(PartialEq)]
struct Candidate {
    distance: f32,
    id: VectorId,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.id.cmp(&other.id))
    }
}

/// HNSW graph index. Builds incrementally on every insert; `build` is a
/// no-op kept for interface parity with the IVF engine.
pub struct HnswIndex {
    config: HnswConfig,
    calc: DistanceCalc,
    mult: f64,
    points: MemoryVectorStorage,
    slots: HashMap<VectorId, VectorId>,
    nodes: HashMap<VectorId, HnswNode>,
    entry: Option<VectorId>,
    max_level: usize,
    rng: StdRng,
    next_auto_id: VectorId,
}

impl HnswIndex {
    pub fn new(config: HnswConfig, dim: usize, distance: DistanceKind) -> Result<Self> {
        if config.m == 0 {
            return Err(Error::InvalidArgument("m must be positive".to_string()));
        }
        if config.m_max < config.m {
            return Err(Error::InvalidArgument(format!(
                "m_max {} must be at least m {}",
                config.m_max, config.m
            )));
        }
        if config.ef_construction == 0 || config.ef_search == 0 {
            return Err(Error::InvalidArgument(
                "ef widths must be positive".to_string(),
            ));
        }
        let mult = if config.m > 1 {
            1.0 / (config.m as f64).ln()
        } else {
            1.0
        };
        Ok(Self {
            calc: DistanceCalc::new(distance),
            mult,
            points: MemoryVectorStorage::new(dim)?,
            slots: HashMap::new(),
            nodes: HashMap::new(),
            entry: None,
            max_level: 0,
            rng: StdRng::seed_from_u64(config.seed),
            next_auto_id: 0,
            config,
        })
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Highest populated layer.
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Ids adjacent to `id` on `layer`, closest first. `None` when the id
    /// is unknown or the node does not reach the layer.
    pub fn neighbors(&self, id: VectorId, layer: usize) -> Option<Vec<VectorId>> {
        let node = self.nodes.get(&id)?;
        let list = node.neighbors.get(layer)?;
        Some(list.iter().map(|&(_, v)| v).collect())
    }

    /// Insert a vector and wire it into every layer up to its sampled
    /// level.
    pub fn insert(&mut self, id: VectorId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.points.dimension() {
            return Err(Error::InvalidArgument(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.points.dimension(),
                vector.len()
            )));
        }
        if self.slots.contains_key(&id) {
            return Err(Error::InvalidArgument(format!("duplicate id {id}")));
        }

        let level = self.sample_level();
        let slot = self.points.add_vector(vector)?;
        self.slots.insert(id, slot);
        self.nodes.insert(id, HnswNode::new(level));

        let Some(entry) = self.entry else {
            self.entry = Some(id);
            self.max_level = level;
            debug!(id, level, "hnsw: installed entry point");
            return Ok(());
        };

        // Greedy single-best descent through the layers above the new
        // node's top level.
        let mut current = entry;
        let mut layer = self.max_level;
        while layer > level {
            current = self.greedy_descent(vector, current, layer)?;
            layer -= 1;
        }

        // Connection layers: collect an ef_construction-wide candidate
        // set, link the closest m, prune whoever spills over m_max.
        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(vector, current, layer, self.config.ef_construction)?;
            if let Some(&(_, nearest)) = candidates.first() {
                current = nearest;
            }
            let selected: Vec<(f32, VectorId)> =
                candidates.into_iter().take(self.config.m).collect();
            if let Some(node) = self.nodes.get_mut(&id) {
                node.neighbors[layer] = selected.clone();
            }
            for (distance, neighbor) in selected {
                self.link(neighbor, layer, distance, id)?;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = Some(id);
        }
        Ok(())
    }

    /// The `k` nearest stored vectors, closest first. `k` larger than the
    /// graph is clamped; an empty graph yields an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.points.dimension() {
            return Err(Error::InvalidArgument(format!(
                "query dimension mismatch: expected {}, got {}",
                self.points.dimension(),
                query.len()
            )));
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".to_string()));
        }
        let Some(entry) = self.entry else {
            return Ok(Vec::new());
        };
        let k = k.min(self.nodes.len());

        let mut current = entry;
        for layer in (1..=self.max_level).rev() {
            current = self.greedy_descent(query, current, layer)?;
        }

        let ef = self.config.ef_search.max(k);
        let found = self.search_layer(query, current, 0, ef)?;
        Ok(found
            .into_iter()
            .take(k)
            .map(|(distance, id)| SearchResult {
                id,
                distance: self.calc.raw_from_ranked(distance),
            })
            .collect())
    }

    pub fn dimension(&self) -> usize {
        self.points.dimension()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Draw `floor(-ln(U(0,1)) * mult)`: geometric-like, higher layers
    /// exponentially sparser.
    fn sample_level(&mut self) -> usize {
        let uniform: f64 = self.rng.random();
        let level = (-uniform.ln() * self.mult).floor();
        if level.is_finite() {
            (level as usize).min(MAX_LEVEL)
        } else {
            MAX_LEVEL
        }
    }

    fn vector(&self, id: VectorId) -> Result<&[f32]> {
        let slot = *self
            .slots
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("id {id} not in index")))?;
        self.points
            .get_vector(slot)
            .ok_or_else(|| Error::Corruption(format!("missing vector slot for id {id}")))
    }

    fn ranked_to(&self, query: &[f32], id: VectorId) -> Result<f32> {
        Ok(self.calc.ranked(query, self.vector(id)?))
    }

    /// Move to the strictly closer neighbor until no neighbor improves on
    /// the current best; used on layers above the target.
    fn greedy_descent(&self, query: &[f32], entry: VectorId, layer: usize) -> Result<VectorId> {
        let mut best = entry;
        let mut best_distance = self.ranked_to(query, best)?;
        loop {
            let node = self
                .nodes
                .get(&best)
                .ok_or_else(|| Error::Corruption(format!("dangling node {best}")))?;
            let Some(neighbors) = node.neighbors.get(layer) else {
                break;
            };
            let mut improved = false;
            for &(_, candidate) in neighbors {
                let distance = self.ranked_to(query, candidate)?;
                if distance < best_distance {
                    best_distance = distance;
                    best = candidate;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
        Ok(best)
    }

    /// Beam search within one layer: a frontier min-heap against a
    /// bounded result set of width `ef`. Returns (ranked distance, id)
    /// ascending.
    fn search_layer(
        &self,
        query: &[f32],
        entry: VectorId,
        layer: usize,
        ef: usize,
    ) -> Result<Vec<(f32, VectorId)>> {
        let mut visited = HashSet::new();
        let mut frontier = BinaryHeap::new();
        let mut best: BoundedQueue<(f32, VectorId), _> =
            BoundedQueue::new(ef, |a: &(f32, VectorId), b: &(f32, VectorId)| {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            });

        let entry_distance = self.ranked_to(query, entry)?;
        visited.insert(entry);
        frontier.push(Reverse(Candidate {
            distance: entry_distance,
            id: entry,
        }));
        best.push((entry_distance, entry));

        while let Some(Reverse(candidate)) = frontier.pop() {
            if best.len() == ef {
                if let Some(&(worst, _)) = best.top() {
                    if candidate.distance > worst {
                        break;
                    }
                }
            }
            let node = self
                .nodes
                .get(&candidate.id)
                .ok_or_else(|| Error::Corruption(format!("dangling node {}", candidate.id)))?;
            let Some(neighbors) = node.neighbors.get(layer) else {
                continue;
            };
            for &(_, neighbor) in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let distance = self.ranked_to(query, neighbor)?;
                let admit = best.len() < ef
                    || best.top().is_none_or(|&(worst, _)| distance < worst);
                if admit {
                    frontier.push(Reverse(Candidate {
                        distance,
                        id: neighbor,
                    }));
                    best.push((distance, neighbor));
                }
            }
        }

        let mut result = best.dump();
        result.reverse();
        Ok(result)
    }

    /// Insert the reciprocal edge `(distance, source)` into `target`'s
    /// layer list; on overflow evict the farthest edge and remove its
    /// reciprocal as well.
    fn link(&mut self, target: VectorId, layer: usize, distance: f32, source: VectorId) -> Result<()> {
        let evicted = {
            let node = self
                .nodes
                .get_mut(&target)
                .ok_or_else(|| Error::Corruption(format!("dangling neighbor {target}")))?;
            let list = node
                .neighbors
                .get_mut(layer)
                .ok_or_else(|| Error::Corruption(format!("node {target} missing layer {layer}")))?;
            let position = list.partition_point(|&entry| entry < (distance, source));
            list.insert(position, (distance, source));
            if list.len() > self.config.m_max {
                list.pop()
            } else {
                None
            }
        };
        if let Some((_, evicted)) = evicted {
            self.unlink(evicted, layer, target)?;
        }
        Ok(())
    }

    /// Remove the edge toward `remove` from `node_id`'s layer list.
    fn unlink(&mut self, node_id: VectorId, layer: usize, remove: VectorId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Error::Corruption(format!("dangling neighbor {node_id}")))?;
        if let Some(list) = node.neighbors.get_mut(layer) {
            list.retain(|&(_, v)| v != remove);
        }
        Ok(())
    }
}

impl VectorIndex for HnswIndex {
    fn add(&mut self, id: VectorId, vector: &[f32]) -> Result<()> {
        self.insert(id, vector)
    }

    fn add_auto(&mut self, vector: &[f32]) -> Result<VectorId> {
        let mut id = self.next_auto_id;
        while self.slots.contains_key(&id) {
            id += 1;
        }
        self.insert(id, vector)?;
        self.next_auto_id = id + 1;
        Ok(id)
    }

    fn build(&mut self) -> Result<()> {
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        HnswIndex::search(self, query, k)
    }

    fn dimension(&self) -> usize {
        HnswIndex::dimension(self)
    }

    fn len(&self) -> usize {
        HnswIndex::len(self)
    }
}
