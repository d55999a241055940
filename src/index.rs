//! In-memory vector index with atomic rebuild.
//!
//! The index holds an `Arc` to an immutable [`IndexStore`] behind a
//! `RwLock`. [`VectorIndex::build`] prepares a complete new store without
//! touching the lock, then swaps the pointer in one short write. Queries
//! clone the `Arc` under a read lock and score without holding it, so a
//! reader sees either the old store or the new one, never a mix.
//!
//! # Similarity
//!
//! Cosine similarity. Stored vectors are kept as returned by the provider
//! (not normalised); their norms are computed once at build time.
//! Results are ordered by descending score, ties by ascending insertion
//! position.

use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use crate::embedding::{cosine_with_norms, norm};
use crate::error::IndexError;
use crate::models::{Chunk, EmbeddedChunk, ScoredChunk};

/// One fully built, immutable generation of the index.
#[derive(Debug)]
pub struct IndexStore {
    repository: String,
    dims: usize,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    norms: Vec<f32>,
}

impl IndexStore {
    /// Validate and assemble a store. Every vector must have `dims` entries.
    pub fn new(
        repository: impl Into<String>,
        dims: usize,
        items: Vec<EmbeddedChunk>,
    ) -> Result<Self, IndexError> {
        let mut chunks = Vec::with_capacity(items.len());
        let mut vectors = Vec::with_capacity(items.len());
        let mut norms = Vec::with_capacity(items.len());

        for item in items {
            if item.vector.len() != dims {
                return Err(IndexError::Dimension {
                    expected: dims,
                    got: item.vector.len(),
                });
            }
            norms.push(norm(&item.vector));
            vectors.push(item.vector);
            chunks.push(item.chunk);
        }

        Ok(Self {
            repository: repository.into(),
            dims,
            chunks,
            vectors,
            norms,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Stored entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&Chunk, &[f32])> {
        self.chunks
            .iter()
            .zip(self.vectors.iter().map(Vec::as_slice))
    }

    /// Top `k` entries by cosine similarity to `vector`.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if vector.len() != self.dims {
            return Err(IndexError::Dimension {
                expected: self.dims,
                got: vector.len(),
            });
        }

        let query_norm = norm(vector);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .zip(self.norms.iter())
            .enumerate()
            .map(|(pos, (v, &n))| (pos, cosine_with_norms(vector, query_norm, v, n)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: self.chunks[position].clone(),
                score,
                position,
            })
            .collect())
    }
}

/// Shared handle to the current index generation.
#[derive(Debug, Default)]
pub struct VectorIndex {
    current: RwLock<Option<Arc<IndexStore>>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a new generation from `items` and replace the current one.
    ///
    /// On error the previous generation stays in place.
    pub fn build(
        &self,
        repository: impl Into<String>,
        dims: usize,
        items: Vec<EmbeddedChunk>,
    ) -> Result<usize, IndexError> {
        let store = IndexStore::new(repository, dims, items)?;
        let len = store.len();
        self.install(Arc::new(store));
        tracing::info!(chunks = len, dims, "vector index built");
        Ok(len)
    }

    /// Swap in an already assembled store.
    pub fn install(&self, store: Arc<IndexStore>) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(store);
    }

    /// The current generation, if any.
    pub fn snapshot(&self) -> Option<Arc<IndexStore>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let store = self.snapshot().ok_or(IndexError::NotReady)?;
        store.query(vector, k)
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    pub fn len(&self) -> usize {
        self.snapshot().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dims(&self) -> Option<usize> {
        self.snapshot().map(|s| s.dims())
    }

    pub fn repository(&self) -> Option<String> {
        self.snapshot().map(|s| s.repository().to_string())
    }
}
