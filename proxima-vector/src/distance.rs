//! Distance kernels for vector similarity

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Absolute tolerance for scalar comparisons; differences inside it count
/// as equal, ordering beyond it is strict.
pub const EPSILON: f32 = 1e-6;

/// Distance functions for measuring vector similarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum DistanceKind {
    /// Squared Euclidean distance (no square root)
    /// Range: [0, ∞], lower means more similar
    /// Best for: embeddings where magnitude matters
    L2 = 1,

    /// Inner product
    /// Range: (-∞, ∞), higher means more similar
    /// Best for: normalized vectors with magnitude-weighted similarity
    Ip = 2,

    /// Cosine similarity
    /// Range: [-1, 1], where 1 means identical direction
    /// Best for: text embeddings regardless of magnitude
    Cosine = 3,
}

impl DistanceKind {
    /// Returns true if higher kernel values mean more similar (Ip, Cosine)
    /// and false if lower values mean more similar (L2).
    pub fn higher_is_closer(&self) -> bool {
        matches!(self, DistanceKind::Ip | DistanceKind::Cosine)
    }

    /// Stable numeric code used in persisted headers.
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

/// Squared Euclidean distance between two vectors.
///
/// The square root is never taken: ordering is identical and the kernel
/// stays a single fused multiply-add loop.
#[inline]
pub fn l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Inner product of two vectors. Higher values indicate more similar
/// vectors (for normalized inputs).
#[inline]
pub fn ip(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when either operand has zero norm.
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Binds a distance kind to its kernel so components can be parameterized
/// on a runtime-selected metric.
///
/// Kernels report raw values (L2: squared distance, Ip/Cosine:
/// similarity). For ordering, `ranked` negates similarity metrics so that
/// smaller always means closer; `raw_from_ranked` undoes the negation when
/// results are emitted.
#[derive(Clone, Copy)]
pub struct DistanceCalc {
    kind: DistanceKind,
    kernel: fn(&[f32], &[f32]) -> f32,
}

impl DistanceCalc {
    pub fn new(kind: DistanceKind) -> Self {
        let kernel = match kind {
            DistanceKind::L2 => l2,
            DistanceKind::Ip => ip,
            DistanceKind::Cosine => cosine,
        };
        Self { kind, kernel }
    }

    pub fn kind(&self) -> DistanceKind {
        self.kind
    }

    /// Raw kernel value, as reported to callers.
    #[inline]
    pub fn raw(&self, a: &[f32], b: &[f32]) -> f32 {
        (self.kernel)(a, b)
    }

    /// Kernel value mapped so smaller means closer for every metric.
    #[inline]
    pub fn ranked(&self, a: &[f32], b: &[f32]) -> f32 {
        let value = (self.kernel)(a, b);
        if self.kind.higher_is_closer() { -value } else { value }
    }

    /// Map a ranked value back to the raw kernel value.
    #[inline]
    pub fn raw_from_ranked(&self, ranked: f32) -> f32 {
        if self.kind.higher_is_closer() {
            -ranked
        } else {
            ranked
        }
    }
}

/// Epsilon-tolerant scalar comparison: equal within `EPSILON`, strict
/// beyond it.
pub fn compare_scalar(a: f32, b: f32) -> Ordering {
    let diff = a - b;
    if diff > EPSILON {
        Ordering::Greater
    } else if diff < -EPSILON {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Lexicographic epsilon-tolerant comparison of two equal-length vectors.
pub fn compare_vectors(a: &[f32], b: &[f32]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_scalar(*x, *y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn test_l2_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(approx_eq(l2(&v, &v), 0.0));
    }

    #[test]
    fn test_l2_is_squared() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![3.0, 4.0, 0.0];
        // 3-4-5 triangle, squared
        assert!(approx_eq(l2(&a, &b), 25.0));
    }

    #[test]
    fn test_ip() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        assert!(approx_eq(ip(&a, &b), 32.0));
    }

    #[test]
    fn test_cosine_identical_direction() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![2.0, 4.0, 6.0];
        assert!(approx_eq(cosine(&a, &b), 1.0));
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(approx_eq(cosine(&a, &b), 0.0));
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 2.0];
        let b = vec![-1.0, -2.0];
        assert!(approx_eq(cosine(&a, &b), -1.0));
    }

    #[test]
    fn test_cosine_zero_norm_sentinel() {
        let zero = vec![0.0, 0.0, 0.0];
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine(&zero, &v), 0.0);
        assert_eq!(cosine(&v, &zero), 0.0);
        assert_eq!(cosine(&zero, &zero), 0.0);
    }

    #[test]
    fn test_ranked_orders_similarity_metrics() {
        let query = vec![1.0, 0.0];
        let near = vec![0.9, 0.1];
        let far = vec![0.0, 1.0];

        for kind in [DistanceKind::L2, DistanceKind::Ip, DistanceKind::Cosine] {
            let calc = DistanceCalc::new(kind);
            assert!(
                calc.ranked(&query, &near) < calc.ranked(&query, &far),
                "{kind:?}: closer vector must rank first"
            );
        }
    }

    #[test]
    fn test_raw_from_ranked_round_trip() {
        let a = vec![0.3, -0.2, 0.9];
        let b = vec![0.1, 0.4, -0.5];
        for kind in [DistanceKind::L2, DistanceKind::Ip, DistanceKind::Cosine] {
            let calc = DistanceCalc::new(kind);
            let raw = calc.raw(&a, &b);
            assert!(approx_eq(calc.raw_from_ranked(calc.ranked(&a, &b)), raw));
        }
    }

    #[test]
    fn test_compare_scalar_epsilon() {
        assert_eq!(compare_scalar(1.0, 1.0 + 1e-8), Ordering::Equal);
        assert_eq!(compare_scalar(1.0, 1.1), Ordering::Less);
        assert_eq!(compare_scalar(1.1, 1.0), Ordering::Greater);
    }

    #[test]
    fn test_compare_vectors_lexicographic() {
        assert_eq!(
            compare_vectors(&[1.0, 2.0], &[1.0 + 1e-8, 2.0]),
            Ordering::Equal
        );
        assert_eq!(compare_vectors(&[1.0, 2.0], &[1.0, 3.0]), Ordering::Less);
        assert_eq!(compare_vectors(&[2.0, 0.0], &[1.0, 9.0]), Ordering::Greater);
    }

    #[test]
    fn test_distance_kind_codes() {
        assert_eq!(DistanceKind::L2.code(), 1);
        assert_eq!(DistanceKind::Ip.code(), 2);
        assert_eq!(DistanceKind::Cosine.code(), 3);
    }
}
