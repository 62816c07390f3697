//! Approximate Nearest Neighbor Search for Proxima
//!
//! This crate provides the two index engines and their supporting
//! machinery:
//!
//! - **IVF indexing**: k-means++ partitioning with flat, scalar-quantized,
//!   or product-quantized per-cluster storage; queries fan out over the
//!   `nprobe` nearest clusters
//! - **HNSW indexing**: hierarchical navigable small world graphs for fast
//!   approximate nearest neighbor search
//! - **Multiple distance metrics**: squared Euclidean, inner product,
//!   cosine similarity
//! - **Common search plumbing**: bounded top-k queues shared by every
//!   search path
//!
//! # Example
//!
//! ```rust
//! use proxima_vector::{ClusterKind, DistanceKind, make_ivf_index};
//!
//! # fn example() -> proxima_vector::Result<()> {
//! let mut index = make_ivf_index(ClusterKind::Flat, DistanceKind::L2, 4, 8, 2)?;
//! index.add(1, &[0.1, 0.2, 0.3, 0.4])?;
//! index.build()?;
//! let hits = index.search(&[0.1, 0.2, 0.3, 0.4], 1)?;
//! assert_eq!(hits[0].id, 1);
//! # Ok(())
//! # }
//! ```
//!
//! Both engines are single-writer while building and many-reader once
//! built; neither supports mutation during search.

mod distance;
mod hnsw;
mod index;
mod ivf;
mod kmeans;
mod quantizer;
mod topk;

pub use distance::{
    DistanceCalc, DistanceKind, EPSILON, compare_scalar, compare_vectors, cosine, ip, l2,
};
pub use hnsw::{HnswConfig, HnswIndex};
pub use index::{SearchResult, VectorIndex, make_hnsw_index, make_ivf_index};
pub use ivf::{ClusterKind, IvfConfig, IvfIndex, IvfIndexFileHeader};
pub use kmeans::{KMeans, KMeansConfig, KMeansPP};
pub use quantizer::{
    PQ_CODEBOOK_SIZE, PQ_MIN_TRAINING_VECTORS, PQ_SUBQUANTIZERS, ProductQuantizer,
    ScalarQuantizer, SqCode,
};
pub use topk::BoundedQueue;

pub use proxima_core::{Error, Result, StatusCode, VectorId};
