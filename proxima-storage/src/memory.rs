//! In-memory vector storage over one flat buffer

use proxima_core::{Error, Result, VectorId};

use crate::VectorStorage;

/// Vector store keeping every row in a single contiguous `Vec<f32>`.
///
/// Row `id` lives at `data[id * dim .. (id + 1) * dim]`; appends never
/// invalidate previously assigned ids.
pub struct MemoryVectorStorage {
    dim: usize,
    data: Vec<f32>,
}

impl MemoryVectorStorage {
    /// Create a store for vectors of the given dimensionality.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidArgument(
                "vector dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            dim,
            data: Vec::new(),
        })
    }

    /// Pre-allocate room for `vectors` additional rows.
    pub fn reserve(&mut self, vectors: usize) {
        self.data.reserve(vectors * self.dim);
    }
}

impl VectorStorage for MemoryVectorStorage {
    fn add_vector(&mut self, vector: &[f32]) -> Result<VectorId> {
        if vector.len() != self.dim {
            return Err(Error::InvalidArgument(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            )));
        }
        self.data.extend_from_slice(vector);
        Ok((self.len() - 1) as VectorId)
    }

    fn get_vector(&self, id: VectorId) -> Option<&[f32]> {
        if id < 0 || id as usize >= self.len() {
            return None;
        }
        let start = id as usize * self.dim;
        Some(&self.data[start..start + self.dim])
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.data.len() / self.dim
    }
}
