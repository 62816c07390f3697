//! IVF (Inverted File) index
//!
//! The dataset is partitioned into `nlist` clusters around k-means++
//! centroids; a query only visits the `nprobe` clusters whose centroids
//! are closest. Per-cluster storage is pluggable: raw rows, scalar
//! quantized codes, or product quantized codes. Recall improves with
//! `nprobe`; `nprobe == nlist` with flat storage degenerates to an exact
//! scan.

use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info};

use proxima_core::{Error, Executor, Result, VectorId};
use proxima_storage::{MemoryVectorStorage, VectorStorage};

use crate::distance::{DistanceCalc, DistanceKind};
use crate::index::{NeighborQueue, SearchResult, VectorIndex, neighbor_queue};
use crate::kmeans::{KMeansConfig, KMeansPP};
use crate::quantizer::{PQ_SUBQUANTIZERS, ProductQuantizer, ScalarQuantizer, SqCode};
use crate::topk::BoundedQueue;

/// Cluster storage strategies. Discriminants are stable: they appear in
/// persisted index headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ClusterKind {
    Flat = 0,
    Pq = 1,
    SqI8 = 2,
    SqF16 = 3,
    SqF32 = 4,
    SqBf16 = 5,
}

impl ClusterKind {
    /// Stable numeric code used in persisted headers.
    pub fn code(&self) -> u32 {
        *self as u32
    }
}

/// On-disk header of a serialized IVF index. Serialization of the trained
/// state is a storage concern; only the layout is fixed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvfIndexFileHeader {
    pub lists: i32,
    pub probes: i32,
    pub dim: i32,
    pub distance_kind: i32,
    pub cluster_kind: u32,
}

/// IVF index parameters. `seed` drives every random choice made during
/// `build`, making training reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfConfig {
    pub cluster_kind: ClusterKind,
    pub distance: DistanceKind,
    pub dim: usize,
    /// Number of clusters trained at build time.
    pub nlist: usize,
    /// Clusters consulted per query, `1 ..= nlist`.
    pub nprobe: usize,
    /// RNG seed for centroid training and codebooks.
    pub seed: u64,
    /// Worker threads used to train cluster back-ends.
    pub train_workers: usize,
}

impl IvfConfig {
    pub fn new(
        cluster_kind: ClusterKind,
        distance: DistanceKind,
        dim: usize,
        nlist: usize,
        nprobe: usize,
    ) -> Self {
        Self {
            cluster_kind,
            distance,
            dim,
            nlist,
            nprobe,
            seed: 0,
            train_workers: 4,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Flat cluster storage: raw `(id, vector)` rows, scanned linearly.
struct FlatCluster {
    centroid: Vec<f32>,
    rows: Vec<(VectorId, Vec<f32>)>,
}

impl FlatCluster {
    fn predict(&self, k: usize, query: &[f32], calc: &DistanceCalc) -> NeighborQueue {
        let mut queue = neighbor_queue(k);
        for (id, row) in &self.rows {
            queue.push(SearchResult {
                id: *id,
                distance: calc.ranked(query, row),
            });
        }
        queue
    }
}

/// Scalar-quantized cluster storage: raw residuals until `train`, codes
/// afterwards.
struct SqCluster<T: SqCode> {
    ids: Vec<VectorId>,
    codes: Vec<Vec<T>>,
    quantizer: ScalarQuantizer<T>,
}

impl<T: SqCode> SqCluster<T> {
    fn new(centroid: Vec<f32>) -> Self {
        Self {
            ids: Vec::new(),
            codes: Vec::new(),
            quantizer: ScalarQuantizer::new(centroid),
        }
    }

    fn add(&mut self, id: VectorId, vector: &[f32]) {
        self.ids.push(id);
        self.quantizer.add(vector);
    }

    fn train(&mut self) {
        self.codes = self.quantizer.train();
    }

    fn predict(&self, k: usize, query: &[f32], calc: &DistanceCalc) -> NeighborQueue {
        let mut queue = neighbor_queue(k);
        for (id, code) in self.ids.iter().zip(self.codes.iter()) {
            let vector = self.quantizer.dequantize_absolute(code);
            queue.push(SearchResult {
                id: *id,
                distance: calc.ranked(query, &vector),
            });
        }
        queue
    }
}

/// Product-quantized cluster storage.
struct PqCluster {
    ids: Vec<VectorId>,
    codes: Vec<Vec<u8>>,
    quantizer: ProductQuantizer,
}

impl PqCluster {
    fn new(centroid: Vec<f32>, seed: u64) -> Self {
        Self {
            ids: Vec::new(),
            codes: Vec::new(),
            quantizer: ProductQuantizer::new(centroid, PQ_SUBQUANTIZERS, seed),
        }
    }

    fn add(&mut self, id: VectorId, vector: &[f32]) {
        self.ids.push(id);
        self.quantizer.add(vector);
    }

    fn train(&mut self) -> Result<()> {
        self.codes = self.quantizer.train()?;
        Ok(())
    }

    fn predict(&self, k: usize, query: &[f32], calc: &DistanceCalc) -> NeighborQueue {
        let mut queue = neighbor_queue(k);
        for (id, code) in self.ids.iter().zip(self.codes.iter()) {
            let vector = self.quantizer.decode(code);
            queue.push(SearchResult {
                id: *id,
                distance: calc.ranked(query, &vector),
            });
        }
        queue
    }
}

/// Tagged cluster back-end. Dispatch happens once at the cluster
/// boundary; the scan loops inside each variant stay monomorphic.
enum Cluster {
    Flat(FlatCluster),
    SqI8(SqCluster<i8>),
    SqF16(SqCluster<f16>),
    SqBf16(SqCluster<bf16>),
    SqF32(SqCluster<f32>),
    Pq(PqCluster),
}

impl Cluster {
    fn new(kind: ClusterKind, centroid: Vec<f32>, seed: u64) -> Self {
        match kind {
            ClusterKind::Flat => Cluster::Flat(FlatCluster {
                centroid,
                rows: Vec::new(),
            }),
            ClusterKind::SqI8 => Cluster::SqI8(SqCluster::new(centroid)),
            ClusterKind::SqF16 => Cluster::SqF16(SqCluster::new(centroid)),
            ClusterKind::SqBf16 => Cluster::SqBf16(SqCluster::new(centroid)),
            ClusterKind::SqF32 => Cluster::SqF32(SqCluster::new(centroid)),
            ClusterKind::Pq => Cluster::Pq(PqCluster::new(centroid, seed)),
        }
    }

    fn centroid(&self) -> &[f32] {
        match self {
            Cluster::Flat(c) => &c.centroid,
            Cluster::SqI8(c) => c.quantizer.centroid(),
            Cluster::SqF16(c) => c.quantizer.centroid(),
            Cluster::SqBf16(c) => c.quantizer.centroid(),
            Cluster::SqF32(c) => c.quantizer.centroid(),
            Cluster::Pq(c) => c.quantizer.centroid(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Cluster::Flat(c) => c.rows.len(),
            Cluster::SqI8(c) => c.ids.len(),
            Cluster::SqF16(c) => c.ids.len(),
            Cluster::SqBf16(c) => c.ids.len(),
            Cluster::SqF32(c) => c.ids.len(),
            Cluster::Pq(c) => c.ids.len(),
        }
    }

    fn add(&mut self, id: VectorId, vector: &[f32]) {
        match self {
            Cluster::Flat(c) => c.rows.push((id, vector.to_vec())),
            Cluster::SqI8(c) => c.add(id, vector),
            Cluster::SqF16(c) => c.add(id, vector),
            Cluster::SqBf16(c) => c.add(id, vector),
            Cluster::SqF32(c) => c.add(id, vector),
            Cluster::Pq(c) => c.add(id, vector),
        }
    }

    fn train(&mut self) -> Result<()> {
        match self {
            Cluster::Flat(_) => Ok(()),
            Cluster::SqI8(c) => {
                c.train();
                Ok(())
            }
            Cluster::SqF16(c) => {
                c.train();
                Ok(())
            }
            Cluster::SqBf16(c) => {
                c.train();
                Ok(())
            }
            Cluster::SqF32(c) => {
                c.train();
                Ok(())
            }
            Cluster::Pq(c) => c.train(),
        }
    }

    fn predict(&self, k: usize, query: &[f32], calc: &DistanceCalc) -> NeighborQueue {
        match self {
            Cluster::Flat(c) => c.predict(k, query, calc),
            Cluster::SqI8(c) => c.predict(k, query, calc),
            Cluster::SqF16(c) => c.predict(k, query, calc),
            Cluster::SqBf16(c) => c.predict(k, query, calc),
            Cluster::SqF32(c) => c.predict(k, query, calc),
            Cluster::Pq(c) => c.predict(k, query, calc),
        }
    }
}

/// Inverted-file index with pluggable cluster storage.
pub struct IvfIndex {
    config: IvfConfig,
    calc: DistanceCalc,
    pending: MemoryVectorStorage,
    slots: HashMap<VectorId, VectorId>,
    order: Vec<VectorId>,
    clusters: Vec<Cluster>,
    built: bool,
    next_auto_id: VectorId,
}

impl IvfIndex {
    pub fn new(config: IvfConfig) -> Result<Self> {
        if config.nlist == 0 {
            return Err(Error::InvalidArgument("nlist must be positive".to_string()));
        }
        if config.nprobe == 0 || config.nprobe > config.nlist {
            return Err(Error::InvalidArgument(format!(
                "nprobe {} out of range 1..={}",
                config.nprobe, config.nlist
            )));
        }
        if config.cluster_kind == ClusterKind::Pq && config.dim < PQ_SUBQUANTIZERS {
            return Err(Error::InvalidArgument(format!(
                "dimension {} cannot be split into {} sub-quantizers",
                config.dim, PQ_SUBQUANTIZERS
            )));
        }
        Ok(Self {
            calc: DistanceCalc::new(config.distance),
            pending: MemoryVectorStorage::new(config.dim)?,
            slots: HashMap::new(),
            order: Vec::new(),
            clusters: Vec::new(),
            built: false,
            next_auto_id: 0,
            config,
        })
    }

    pub fn config(&self) -> &IvfConfig {
        &self.config
    }

    /// Header written ahead of the trained state when the index is
    /// persisted.
    pub fn file_header(&self) -> IvfIndexFileHeader {
        IvfIndexFileHeader {
            lists: self.config.nlist as i32,
            probes: self.config.nprobe as i32,
            dim: self.config.dim as i32,
            distance_kind: self.config.distance.code(),
            cluster_kind: self.config.cluster_kind.code(),
        }
    }

    /// Buffer a vector for the next `build`. Clusters are not touched.
    pub fn add(&mut self, id: VectorId, vector: &[f32]) -> Result<()> {
        if self.built {
            return Err(Error::InvalidArgument(
                "index is already built and read-only".to_string(),
            ));
        }
        if vector.len() != self.config.dim {
            return Err(Error::InvalidArgument(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.config.dim,
                vector.len()
            )));
        }
        if self.slots.contains_key(&id) {
            return Err(Error::InvalidArgument(format!("duplicate id {id}")));
        }
        let slot = self.pending.add_vector(vector)?;
        self.slots.insert(id, slot);
        self.order.push(id);
        Ok(())
    }

    pub fn add_auto(&mut self, vector: &[f32]) -> Result<VectorId> {
        let mut id = self.next_auto_id;
        while self.slots.contains_key(&id) {
            id += 1;
        }
        self.add(id, vector)?;
        self.next_auto_id = id + 1;
        Ok(id)
    }

    /// Train centroids, assign every buffered vector to its nearest
    /// cluster, and train the cluster back-ends. Idempotent once built;
    /// on failure the buffered state is left untouched so the caller can
    /// retry with different parameters.
    pub fn build(&mut self) -> Result<()> {
        if self.built {
            return Ok(());
        }
        if self.order.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot build an index with no vectors".to_string(),
            ));
        }

        let rows = self.pending_rows()?;

        // Centroid training runs under L2 regardless of the query metric;
        // assignment below uses the index metric.
        let config = KMeansConfig::new(self.config.nlist).with_seed(self.config.seed);
        let mut kmeans = KMeansPP::new(config, DistanceKind::L2);
        let centroids = kmeans.fit(&rows);
        info!(
            clusters = centroids.len(),
            vectors = rows.len(),
            "ivf build: centroids trained"
        );

        let mut clusters: Vec<Cluster> = centroids
            .into_iter()
            .map(|centroid| Cluster::new(self.config.cluster_kind, centroid, self.config.seed))
            .collect();

        for (slot, &id) in self.order.iter().enumerate() {
            let vector = rows[slot];
            let mut best = 0;
            let mut best_distance = f32::MAX;
            for (i, cluster) in clusters.iter().enumerate() {
                let distance = self.calc.ranked(vector, cluster.centroid());
                if distance < best_distance {
                    best_distance = distance;
                    best = i;
                }
            }
            clusters[best].add(id, vector);
        }

        let clusters = self.train_clusters(clusters)?;
        self.clusters = clusters;
        self.built = true;
        Ok(())
    }

    /// The approximate `k` nearest neighbors across the `nprobe` closest
    /// clusters, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.config.dim {
            return Err(Error::InvalidArgument(format!(
                "query dimension mismatch: expected {}, got {}",
                self.config.dim,
                query.len()
            )));
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".to_string()));
        }
        if !self.built || self.clusters.is_empty() {
            return Ok(Vec::new());
        }

        let mut probes: BoundedQueue<(f32, usize), _> =
            BoundedQueue::new(self.config.nprobe, |a: &(f32, usize), b: &(f32, usize)| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
        for (i, cluster) in self.clusters.iter().enumerate() {
            probes.push((self.calc.ranked(query, cluster.centroid()), i));
        }

        let mut results = neighbor_queue(k);
        for (_, i) in probes.dump() {
            results.merge(self.clusters[i].predict(k, query, &self.calc));
        }

        let mut hits = results.dump();
        hits.reverse();
        for hit in &mut hits {
            hit.distance = self.calc.raw_from_ranked(hit.distance);
        }
        Ok(hits)
    }

    pub fn dimension(&self) -> usize {
        self.config.dim
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn pending_rows(&self) -> Result<Vec<&[f32]>> {
        let mut rows = Vec::with_capacity(self.order.len());
        for slot in 0..self.order.len() {
            let row = self
                .pending
                .get_vector(slot as VectorId)
                .ok_or_else(|| Error::Corruption(format!("missing slot {slot} in buffer")))?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Train quantized back-ends on the executor; flat clusters pass
    /// through. All handles are joined before the first failure is
    /// reported, so a failed build leaves no work behind.
    fn train_clusters(&self, clusters: Vec<Cluster>) -> Result<Vec<Cluster>> {
        if self.config.cluster_kind == ClusterKind::Flat {
            return Ok(clusters);
        }

        let executor = Executor::new(self.config.train_workers);
        let handles: Vec<_> = clusters
            .into_iter()
            .map(|mut cluster| {
                executor.submit(move || {
                    let outcome = cluster.train();
                    (cluster, outcome)
                })
            })
            .collect();

        let mut trained = Vec::with_capacity(handles.len());
        let mut failure = None;
        for handle in handles {
            let (cluster, outcome) = handle.wait()?;
            if let Err(e) = outcome {
                failure.get_or_insert(e);
            }
            trained.push(cluster);
        }
        if let Some(e) = failure {
            debug!(error = %e, "ivf build aborted: cluster training failed");
            return Err(e);
        }
        Ok(trained)
    }
}

impl VectorIndex for IvfIndex {
    fn add(&mut self, id: VectorId, vector: &[f32]) -> Result<()> {
        IvfIndex::add(self, id, vector)
    }

    fn add_auto(&mut self, vector: &[f32]) -> Result<VectorId> {
        IvfIndex::add_auto(self, vector)
    }

    fn build(&mut self) -> Result<()> {
        IvfIndex::build(self)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        IvfIndex::search(self, query, k)
    }

    fn dimension(&self) -> usize {
        IvfIndex::dimension(self)
    }

    fn len(&self) -> usize {
        IvfIndex::len(self)
    }
}
