//! Example: building and querying both index engines
//!
//! Indexes a small synthetic dataset with IVF and HNSW and compares the
//! answers they give for the same queries.

use proxima_vector::{ClusterKind, DistanceKind, make_hnsw_index, make_ivf_index};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    const DIM: usize = 16;
    const COUNT: usize = 2_000;

    let mut rng = StdRng::seed_from_u64(7);
    let dataset: Vec<Vec<f32>> = (0..COUNT)
        .map(|_| (0..DIM).map(|_| rng.random_range(-1.0f32..1.0)).collect())
        .collect();

    println!("Indexing {COUNT} vectors of dimension {DIM}\n");

    let mut ivf = make_ivf_index(ClusterKind::SqI8, DistanceKind::L2, DIM, 32, 4)?;
    for v in &dataset {
        ivf.add_auto(v)?;
    }
    ivf.build()?;
    println!("IVF (32 lists, 4 probes, int8-quantized clusters) built");

    let mut hnsw = make_hnsw_index(16, 32, 200, 100, DIM, DistanceKind::L2)?;
    for v in &dataset {
        hnsw.add_auto(v)?;
    }
    println!("HNSW (M=16, ef_construction=200) built\n");

    for (label, query) in [("stored vector", &dataset[100]), ("fresh query", &dataset[0])] {
        println!("Top-5 for {label}:");
        let ivf_hits = ivf.search(query, 5)?;
        let hnsw_hits = hnsw.search(query, 5)?;
        println!("  IVF : {:?}", ivf_hits.iter().map(|h| h.id).collect::<Vec<_>>());
        println!("  HNSW: {:?}", hnsw_hits.iter().map(|h| h.id).collect::<Vec<_>>());
        println!(
            "  best distances: ivf={:.4} hnsw={:.4}\n",
            ivf_hits[0].distance, hnsw_hits[0].distance
        );
    }

    Ok(())
}
