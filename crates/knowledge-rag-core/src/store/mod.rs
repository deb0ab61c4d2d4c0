//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is everything the index builder, retriever and
//! lifecycle manager need from a vector database: collection management,
//! idempotent upsert, and nearest-neighbor search. Backends: the in-memory
//! [`memory::InMemoryVectorStore`] and the Qdrant REST store in the app crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes. The
//! trait adds no locking of its own; overlapping upserts to one id are
//! last-write-wins.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Typed store conditions that callers may want to recover from.
///
/// Returned inside `anyhow::Error`; use `downcast_ref::<StoreError>()`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),

    #[error(
        "collection '{collection}' holds {actual}-dimensional vectors but the embedding model \
         produces {expected}; reset the index and rebuild"
    )]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("vector store error: {0}")]
    Backend(String),
}

/// A document ready for insertion: id, vector, canonical text and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// A search hit returned by [`VectorStore::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    /// Cosine similarity; higher is closer.
    pub score: f32,
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// Shape of an existing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    pub dims: usize,
    pub points: u64,
}

/// Abstract vector database backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`collection_info`](VectorStore::collection_info) | Dims and size, `None` if absent |
/// | [`create_collection`](VectorStore::create_collection) | Create a cosine-distance collection |
/// | [`ensure_collection`](VectorStore::ensure_collection) | Create if absent, check dims if present |
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite points by id |
/// | [`search`](VectorStore::search) | Top-k nearest neighbors, best first |
/// | [`drop_collection`](VectorStore::drop_collection) | Irreversibly delete a collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns the collection's dims and point count, or `None` if absent.
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>>;

    /// Create an empty collection for `dims`-dimensional vectors.
    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()>;

    /// Delete a collection and every vector in it.
    ///
    /// Fails with [`StoreError::CollectionNotFound`] if it does not exist.
    async fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Insert or overwrite points by id.
    ///
    /// Fails with [`StoreError::CollectionNotFound`] if the collection is
    /// absent, and [`StoreError::DimensionMismatch`] on a wrong-sized vector.
    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<()>;

    /// Return at most `top_k` points, descending by similarity.
    ///
    /// An absent or empty collection yields an empty result, not an error.
    async fn search(&self, collection: &str, vector: &[f32], top_k: usize)
        -> Result<Vec<ScoredPoint>>;

    /// Create the collection if absent; verify its dims if present.
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        match self.collection_info(collection).await? {
            None => self.create_collection(collection, dims).await,
            Some(info) if info.dims == dims => Ok(()),
            Some(info) => Err(StoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: dims,
                actual: info.dims,
            }
            .into()),
        }
    }
}
