//! Retriever: query text → embedding → nearest neighbors → ranked hits.
//!
//! The retriever owns no configuration beyond what it is constructed with:
//! an embedding provider, a vector store and a collection name. It must be
//! given the same provider configuration that built the index; scores from
//! a different model are meaningless.
//!
//! Each indexed point carries the `embedding_model` that produced it. Hits
//! from another model are still returned, with a warning. A collection
//! whose dimensionality differs from the provider's is an error.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::models::KnowledgeType;
use crate::store::{StoreError, VectorStore};

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Document id (`"<type>:<record id>"`).
    pub id: String,
    pub kind: Option<KnowledgeType>,
    /// Cosine similarity to the query.
    pub score: f32,
    /// Canonical text of the matched record.
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// Semantic search over one collection.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Return up to `top_k` hits for `query`, best first.
    ///
    /// A blank query, `top_k == 0`, or a missing collection all yield an
    /// empty result.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let info = match self.store.collection_info(&self.collection).await? {
            Some(info) => info,
            None => return Ok(Vec::new()),
        };
        if info.dims != self.embedder.dims() {
            return Err(StoreError::DimensionMismatch {
                collection: self.collection.clone(),
                expected: self.embedder.dims(),
                actual: info.dims,
            }
            .into());
        }

        let query_vec = self.embedder.embed(query).await?;
        let points = self
            .store
            .search(&self.collection, &query_vec, top_k)
            .await?;

        let model = self.embedder.model_name();
        let foreign = points
            .iter()
            .filter(|p| {
                p.metadata
                    .get("embedding_model")
                    .and_then(Value::as_str)
                    .is_some_and(|m| m != model)
            })
            .count();
        if foreign > 0 {
            tracing::warn!(
                collection = %self.collection,
                model,
                foreign,
                "hits were indexed with a different embedding model; rebuild the index for meaningful scores"
            );
        }

        let mut hits: Vec<SearchHit> = points
            .into_iter()
            .map(|p| SearchHit {
                kind: p
                    .metadata
                    .get("knowledge_type")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok()),
                id: p.id,
                score: p.score,
                content: p.text,
                metadata: p.metadata,
            })
            .collect();

        // Backends already rank; re-sort so the contract holds for any store
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Render hits as ranked `{content, score}` blocks for people and agents.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results.".to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let kind = hit.kind.map(|k| k.as_str()).unwrap_or("unknown");
            format!(
                "{}. [{:.4}] {} ({})\n{}",
                i + 1,
                hit.score,
                kind,
                hit.id,
                hit.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
