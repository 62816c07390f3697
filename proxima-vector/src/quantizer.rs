//! Scalar and product quantizers for IVF cluster storage
//!
//! Both quantizers operate on residuals: the cluster centroid is
//! subtracted before training and codes reconstruct back into absolute
//! coordinates. The centroid is owned by the quantizer for its lifetime
//! and frozen, as are the captured range and the codebooks once `train`
//! has run.

use half::{bf16, f16};
use proxima_core::{Error, Result};
use std::marker::PhantomData;
use tracing::debug;

use crate::distance::{DistanceKind, l2};
use crate::kmeans::{KMeansConfig, KMeansPP};

/// Default sub-quantizer count for product quantization.
pub const PQ_SUBQUANTIZERS: usize = 8;

/// Sub-centroids per PQ codebook; codes are single bytes.
pub const PQ_CODEBOOK_SIZE: usize = 256;

/// Product quantization refuses to train on this many vectors or fewer.
pub const PQ_MIN_TRAINING_VECTORS: usize = 8;

/// Fixed-point code width for scalar quantization.
pub trait SqCode: Copy + Send + Sync + 'static {
    /// Full-scale magnitude the captured range is mapped onto.
    const MAX: f64;

    fn encode(value: f64) -> Self;
    fn decode(self) -> f64;
}

impl SqCode for i8 {
    const MAX: f64 = i8::MAX as f64;

    fn encode(value: f64) -> Self {
        value as i8
    }

    fn decode(self) -> f64 {
        f64::from(self)
    }
}

impl SqCode for f32 {
    const MAX: f64 = f32::MAX as f64;

    fn encode(value: f64) -> Self {
        value as f32
    }

    fn decode(self) -> f64 {
        f64::from(self)
    }
}

impl SqCode for f16 {
    const MAX: f64 = 65504.0;

    fn encode(value: f64) -> Self {
        f16::from_f64(value)
    }

    fn decode(self) -> f64 {
        self.to_f64()
    }
}

impl SqCode for bf16 {
    const MAX: f64 = 3.389_531_389_251_535_5e38;

    fn encode(value: f64) -> Self {
        bf16::from_f64(value)
    }

    fn decode(self) -> f64 {
        self.to_f64()
    }
}

/// Per-cluster scalar quantizer.
///
/// `add` accumulates residuals and a running scalar min/max over their
/// components; `train` freezes the range and converts every residual into
/// fixed-point codes via `q = ((v - min) / diff - 0.5) * 2 * MAX`.
pub struct ScalarQuantizer<T: SqCode> {
    centroid: Vec<f32>,
    residuals: Vec<Vec<f32>>,
    min: f32,
    max: f32,
    diff: f64,
    trained: bool,
    _code: PhantomData<T>,
}

impl<T: SqCode> ScalarQuantizer<T> {
    pub fn new(centroid: Vec<f32>) -> Self {
        Self {
            centroid,
            residuals: Vec::new(),
            min: f32::MAX,
            max: f32::MIN,
            diff: 0.0,
            trained: false,
            _code: PhantomData,
        }
    }

    pub fn centroid(&self) -> &[f32] {
        &self.centroid
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Buffer the residual of `vector` against the centroid and widen the
    /// captured range.
    pub fn add(&mut self, vector: &[f32]) {
        let residual: Vec<f32> = vector
            .iter()
            .zip(self.centroid.iter())
            .map(|(v, c)| v - c)
            .collect();
        for &component in &residual {
            self.min = self.min.min(component);
            self.max = self.max.max(component);
        }
        self.residuals.push(residual);
    }

    /// Freeze the captured range, quantize every buffered residual in
    /// insertion order, and release the raw copies.
    pub fn train(&mut self) -> Vec<Vec<T>> {
        self.diff = f64::from(self.max) - f64::from(self.min);
        let codes = self
            .residuals
            .iter()
            .map(|residual| self.quantize(residual))
            .collect();
        self.residuals = Vec::new();
        self.trained = true;
        codes
    }

    /// Quantize one residual vector against the frozen range.
    pub fn quantize(&self, residual: &[f32]) -> Vec<T> {
        residual
            .iter()
            .map(|&component| {
                if self.diff <= 0.0 {
                    T::encode(0.0)
                } else {
                    let unit = (f64::from(component) - f64::from(self.min)) / self.diff - 0.5;
                    T::encode(2.0 * unit * T::MAX)
                }
            })
            .collect()
    }

    /// Reconstruct a residual vector from its codes.
    pub fn dequantize(&self, codes: &[T]) -> Vec<f32> {
        codes
            .iter()
            .map(|&code| {
                if self.diff <= 0.0 {
                    self.min
                } else {
                    ((code.decode() / (2.0 * T::MAX) + 0.5) * self.diff + f64::from(self.min))
                        as f32
                }
            })
            .collect()
    }

    /// Reconstruct the absolute vector: decoded residual plus centroid.
    pub fn dequantize_absolute(&self, codes: &[T]) -> Vec<f32> {
        let mut vector = self.dequantize(codes);
        for (value, c) in vector.iter_mut().zip(self.centroid.iter()) {
            *value += c;
        }
        vector
    }
}

/// Per-cluster product quantizer.
///
/// Splits each residual into `m` contiguous sub-vectors of `dim / m`
/// components (the last takes the remainder), trains an independent
/// k-means codebook per sub-space, and encodes every residual as `m`
/// bytes. After training the codebooks are shifted back by the centroid,
/// so decoded vectors are in absolute coordinate space.
pub struct ProductQuantizer {
    centroid: Vec<f32>,
    m: usize,
    chunk: usize,
    seed: u64,
    residuals: Vec<Vec<f32>>,
    codebooks: Vec<Vec<Vec<f32>>>,
    trained: bool,
}

impl ProductQuantizer {
    pub fn new(centroid: Vec<f32>, m: usize, seed: u64) -> Self {
        let chunk = if m == 0 { 0 } else { centroid.len() / m };
        Self {
            centroid,
            m,
            chunk,
            seed,
            residuals: Vec::new(),
            codebooks: Vec::new(),
            trained: false,
        }
    }

    pub fn centroid(&self) -> &[f32] {
        &self.centroid
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    fn subspace_bounds(&self, subspace: usize) -> (usize, usize) {
        let start = subspace * self.chunk;
        let end = if subspace == self.m - 1 {
            self.centroid.len()
        } else {
            start + self.chunk
        };
        (start, end)
    }

    /// Buffer the residual of `vector` against the centroid.
    pub fn add(&mut self, vector: &[f32]) {
        let residual = vector
            .iter()
            .zip(self.centroid.iter())
            .map(|(v, c)| v - c)
            .collect();
        self.residuals.push(residual);
    }

    /// Train one codebook per sub-space over the buffered residuals,
    /// encode every residual in insertion order, then shift the codebooks
    /// into absolute coordinates and release the raw copies.
    pub fn train(&mut self) -> Result<Vec<Vec<u8>>> {
        if self.m == 0 || self.chunk == 0 {
            return Err(Error::InvalidArgument(format!(
                "dimension {} cannot be split into {} sub-quantizers",
                self.centroid.len(),
                self.m
            )));
        }
        if self.residuals.len() <= PQ_MIN_TRAINING_VECTORS {
            return Err(Error::NotSupported(format!(
                "product quantization needs more than {} training vectors, got {}",
                PQ_MIN_TRAINING_VECTORS,
                self.residuals.len()
            )));
        }

        for subspace in 0..self.m {
            let (start, end) = self.subspace_bounds(subspace);
            let chunks: Vec<&[f32]> = self.residuals.iter().map(|r| &r[start..end]).collect();
            let config = KMeansConfig::new(PQ_CODEBOOK_SIZE)
                .with_seed(self.seed.wrapping_add(subspace as u64));
            let mut kmeans = KMeansPP::new(config, DistanceKind::L2);
            self.codebooks.push(kmeans.fit(&chunks));
        }
        debug!(
            subspaces = self.m,
            vectors = self.residuals.len(),
            "product quantizer trained"
        );

        let codes = self
            .residuals
            .iter()
            .map(|residual| self.encode_residual(residual))
            .collect();

        for subspace in 0..self.m {
            let (start, _) = self.subspace_bounds(subspace);
            for entry in &mut self.codebooks[subspace] {
                for (i, value) in entry.iter_mut().enumerate() {
                    *value += self.centroid[start + i];
                }
            }
        }

        self.residuals = Vec::new();
        self.trained = true;
        Ok(codes)
    }

    /// Nearest codebook entry per sub-space. Valid only between codebook
    /// training and the absolute-coordinate shift.
    fn encode_residual(&self, residual: &[f32]) -> Vec<u8> {
        let mut codes = Vec::with_capacity(self.m);
        for subspace in 0..self.m {
            let (start, end) = self.subspace_bounds(subspace);
            let chunk = &residual[start..end];
            let mut best = 0usize;
            let mut best_distance = f32::MAX;
            for (index, entry) in self.codebooks[subspace].iter().enumerate() {
                let distance = l2(chunk, entry);
                if distance < best_distance {
                    best_distance = distance;
                    best = index;
                }
            }
            codes.push(best as u8);
        }
        codes
    }

    /// Reconstruct the absolute vector by concatenating codebook entries.
    ///
    /// `codes` must have been produced by this quantizer's `train`.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.centroid.len());
        for (subspace, &code) in codes.iter().enumerate() {
            vector.extend_from_slice(&self.codebooks[subspace][usize::from(code)]);
        }
        vector
    }
}
