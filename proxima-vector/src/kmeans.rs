//! K-means clustering with k-means++ seeding
//!
//! Produces the centroids behind IVF cluster assignment and PQ codebooks.
//! Centroid updates run through a compensated running mean so that large
//! memberships do not lose low-order bits to cancellation.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::distance::{DistanceCalc, DistanceKind};

/// Clustering parameters. `seed` makes training reproducible: identical
/// inputs and seed yield bit-identical centroids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Number of centroids to produce (clamped to the input size).
    pub k: usize,
    /// Iteration cap for Lloyd refinement.
    pub max_iters: usize,
    /// Convergence threshold on per-centroid movement.
    pub tolerance: f32,
    /// RNG seed for initialization and seeding.
    pub seed: u64,
}

impl KMeansConfig {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iters: 100,
            tolerance: 1e-4,
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Compensated (Kahan-style) running mean with a per-dimension residual
/// accumulator. The residual re-injects rounding error lost when a small
/// per-point delta lands on a large running mean.
struct KahanMean {
    count: usize,
    mean: Vec<f32>,
    residual: Vec<f32>,
}

impl KahanMean {
    fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: Vec::with_capacity(dim),
            residual: vec![0.0; dim],
        }
    }

    fn add(&mut self, point: &[f32]) {
        if self.count == 0 {
            self.mean.clear();
            self.mean.extend_from_slice(point);
            self.count = 1;
            return;
        }
        let next = (self.count + 1) as f64;
        for i in 0..self.mean.len() {
            let delta = ((point[i] as f64 - self.mean[i] as f64) / next) as f32;
            let y = delta - self.residual[i];
            let t = self.mean[i] + y;
            self.residual[i] = (t - self.mean[i]) - y;
            self.mean[i] = t;
        }
        self.count += 1;
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn into_mean(self) -> Vec<f32> {
        self.mean
    }
}

/// Lloyd's algorithm with reservoir-sampled initialization.
pub struct KMeans {
    config: KMeansConfig,
    calc: DistanceCalc,
    rng: StdRng,
}

impl KMeans {
    pub fn new(config: KMeansConfig, distance: DistanceKind) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            calc: DistanceCalc::new(distance),
            rng,
        }
    }

    /// Cluster `data` into up to `k` centroids, sampling the initial
    /// centroids from the input via reservoir sampling.
    pub fn fit(&mut self, data: &[&[f32]]) -> Vec<Vec<f32>> {
        if data.is_empty() {
            return Vec::new();
        }
        let seeds = self.reservoir_seeds(data);
        self.lloyd(data, seeds)
    }

    /// Cluster `data` starting from the given centroids.
    pub fn fit_seeded(&mut self, data: &[&[f32]], seeds: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
        if data.is_empty() || seeds.is_empty() {
            return seeds;
        }
        self.lloyd(data, seeds)
    }

    fn reservoir_seeds(&mut self, data: &[&[f32]]) -> Vec<Vec<f32>> {
        let k = self.config.k.min(data.len());
        let mut seeds: Vec<Vec<f32>> = data[..k].iter().map(|v| v.to_vec()).collect();
        for m in k..data.len() {
            let j = self.rng.random_range(0..=m);
            if j < k {
                seeds[j] = data[m].to_vec();
            }
        }
        seeds
    }

    fn lloyd(&mut self, data: &[&[f32]], mut centroids: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
        let k = centroids.len();
        let dim = centroids[0].len();

        for iter in 0..self.config.max_iters {
            let mut means: Vec<KahanMean> = (0..k).map(|_| KahanMean::new(dim)).collect();
            for point in data {
                let assigned = self.nearest_centroid(point, &centroids);
                means[assigned].add(point);
            }

            let mut converged = true;
            for (j, mean) in means.into_iter().enumerate() {
                // A cluster left without members keeps its previous
                // centroid for the rest of the training run.
                if mean.is_empty() {
                    continue;
                }
                let updated = mean.into_mean();
                if self.calc.ranked(&updated, &centroids[j]) > self.config.tolerance {
                    converged = false;
                }
                centroids[j] = updated;
            }

            if converged {
                debug!(iterations = iter + 1, k, "k-means converged");
                break;
            }
        }
        centroids
    }

    /// Index of the nearest centroid; equidistant centroids resolve to the
    /// smallest index.
    fn nearest_centroid(&self, point: &[f32], centroids: &[Vec<f32>]) -> usize {
        let mut best = 0;
        let mut best_distance = f32::MAX;
        for (j, centroid) in centroids.iter().enumerate() {
            let distance = self.calc.ranked(point, centroid);
            if distance < best_distance {
                best_distance = distance;
                best = j;
            }
        }
        best
    }
}

/// K-means++ : D²-weighted seeding followed by Lloyd refinement.
pub struct KMeansPP {
    means: KMeans,
    rng: StdRng,
}

impl KMeansPP {
    pub fn new(config: KMeansConfig, distance: DistanceKind) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            means: KMeans::new(config, distance),
            rng,
        }
    }

    pub fn fit(&mut self, data: &[&[f32]]) -> Vec<Vec<f32>> {
        if data.is_empty() {
            return Vec::new();
        }
        let seeds = self.seed_pp(data);
        self.means.fit_seeded(data, seeds)
    }

    /// Pick the first centroid uniformly, then each further centroid with
    /// probability proportional to the squared distance from its nearest
    /// already-chosen centroid. The per-point weight only shrinks, so one
    /// pass against the newest seed keeps it current.
    fn seed_pp(&mut self, data: &[&[f32]]) -> Vec<Vec<f32>> {
        let k = self.means.config.k.min(data.len());
        let calc = self.means.calc;

        let first = self.rng.random_range(0..data.len());
        let mut seeds: Vec<Vec<f32>> = vec![data[first].to_vec()];
        let mut weights: Vec<f64> = data
            .iter()
            .map(|point| f64::from(calc.ranked(point, &seeds[0]).max(0.0)))
            .collect();

        while seeds.len() < k {
            let total: f64 = weights.iter().sum();
            let chosen = if total <= 0.0 {
                // Every remaining point coincides with a chosen centroid.
                self.rng.random_range(0..data.len())
            } else {
                let threshold = self.rng.random_range(0.0..total);
                let mut cumulative = 0.0f64;
                let mut chosen = data.len() - 1;
                for (j, weight) in weights.iter().enumerate() {
                    cumulative += weight;
                    if cumulative >= threshold {
                        chosen = j;
                        break;
                    }
                }
                chosen
            };
            seeds.push(data[chosen].to_vec());

            let newest = &seeds[seeds.len() - 1];
            for (j, point) in data.iter().enumerate() {
                let distance = f64::from(calc.ranked(point, newest).max(0.0));
                if distance < weights[j] {
                    weights[j] = distance;
                }
            }
        }
        seeds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_slices(data: &[Vec<f32>]) -> Vec<&[f32]> {
        data.iter().map(|v| v.as_slice()).collect()
    }

    /// Two well-separated uniform blobs around (0, 0) and (10, 10).
    fn two_blobs(seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = Vec::with_capacity(200);
        for center in [[0.0f32, 0.0], [10.0, 10.0]] {
            for _ in 0..100 {
                data.push(vec![
                    center[0] + rng.random_range(-1.0..1.0),
                    center[1] + rng.random_range(-1.0..1.0),
                ]);
            }
        }
        data
    }

    #[test]
    fn test_two_cluster_convergence() {
        let data = two_blobs(7);
        let mut config = KMeansConfig::new(2).with_seed(3);
        config.max_iters = 20;
        let mut kmeans = KMeansPP::new(config, DistanceKind::L2);
        let mut centroids = kmeans.fit(&as_slices(&data));
        assert_eq!(centroids.len(), 2);

        centroids.sort_by(|a, b| a[0].partial_cmp(&b[0]).unwrap());
        let near_origin = &centroids[0];
        let near_ten = &centroids[1];
        assert!(crate::distance::l2(near_origin, &[0.0, 0.0]) < 1.0);
        assert!(crate::distance::l2(near_ten, &[10.0, 10.0]) < 1.0);
    }

    #[test]
    fn test_seeded_determinism() {
        let data = two_blobs(11);
        let slices = as_slices(&data);

        let run = || {
            let mut kmeans = KMeansPP::new(KMeansConfig::new(4).with_seed(99), DistanceKind::L2);
            kmeans.fit(&slices)
        };
        let first = run();
        let second = run();
        assert_eq!(first, second, "same inputs and seed must reproduce centroids");
    }

    #[test]
    fn test_k_clamped_to_input_size() {
        let data = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        let mut kmeans = KMeansPP::new(KMeansConfig::new(8).with_seed(0), DistanceKind::L2);
        let centroids = kmeans.fit(&as_slices(&data));
        assert_eq!(centroids.len(), 2);
    }

    #[test]
    fn test_empty_input() {
        let mut kmeans = KMeans::new(KMeansConfig::new(3), DistanceKind::L2);
        assert!(kmeans.fit(&[]).is_empty());
    }

    #[test]
    fn test_empty_cluster_keeps_previous_centroid() {
        // Both points sit far from the stranded seed; it must survive
        // training unchanged instead of being reinitialized.
        let data = vec![vec![0.0f32, 0.0], vec![0.2, 0.0]];
        let seeds = vec![vec![0.1f32, 0.0], vec![50.0, 50.0]];
        let mut kmeans = KMeans::new(KMeansConfig::new(2), DistanceKind::L2);
        let centroids = kmeans.fit_seeded(&as_slices(&data), seeds);
        assert_eq!(centroids[1], vec![50.0, 50.0]);
    }

    #[test]
    fn test_kahan_mean_survives_large_magnitudes() {
        // Around 1e6 the f32 grid step is 0.0625, so the per-point update
        // (mean shift / n) underflows the mean entirely for large n; only
        // the residual accumulator carries it. Both inputs and the exact
        // mean lie on the grid.
        let mut mean = KahanMean::new(1);
        for i in 0..20_000 {
            let value = if i % 2 == 0 { 1_000_000.0 } else { 1_000_000.25 };
            mean.add(&[value]);
        }
        let value = mean.into_mean()[0];
        assert!(
            (value - 1_000_000.125).abs() < 0.1,
            "compensated mean drifted: {value}"
        );
    }

    #[test]
    fn test_single_point_centroid_is_point() {
        let data = vec![vec![3.0f32, -4.0]];
        let mut kmeans = KMeans::new(KMeansConfig::new(1), DistanceKind::L2);
        let centroids = kmeans.fit(&as_slices(&data));
        assert_eq!(centroids, vec![vec![3.0, -4.0]]);
    }
}
