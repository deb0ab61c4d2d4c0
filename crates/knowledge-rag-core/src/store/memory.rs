//! In-memory [`VectorStore`] implementation for testing and offline use.
//!
//! Uses `HashMap`s behind `std::sync::RwLock` for thread safety.
//! Search is brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;

use super::{CollectionInfo, ScoredPoint, StoreError, VectorPoint, VectorStore};

struct MemCollection {
    dims: usize,
    points: HashMap<String, VectorPoint>,
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, MemCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    StoreError::Backend("in-memory store lock poisoned".to_string()).into()
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections.get(collection).map(|c| CollectionInfo {
            dims: c.dims,
            points: c.points.len() as u64,
        }))
    }

    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        if collections.contains_key(collection) {
            return Err(StoreError::Backend(format!(
                "collection '{}' already exists",
                collection
            ))
            .into());
        }
        collections.insert(
            collection.to_string(),
            MemCollection {
                dims,
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        match collections.remove(collection) {
            Some(_) => Ok(()),
            None => Err(StoreError::CollectionNotFound(collection.to_string()).into()),
        }
    }

    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        // Validate the whole batch before writing any of it
        if let Some(bad) = points.iter().find(|p| p.vector.len() != coll.dims) {
            return Err(StoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: bad.vector.len(),
                actual: coll.dims,
            }
            .into());
        }

        for p in points {
            coll.points.insert(p.id.clone(), p.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        let coll = match collections.get(collection) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };

        let mut hits: Vec<ScoredPoint> = coll
            .points
            .values()
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                text: p.text.clone(),
                metadata: p.metadata.clone(),
            })
            .collect();

        // Sort: score desc, id asc (deterministic)
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}
