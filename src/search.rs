//! `kb search` and the shared retriever wiring used by the MCP server.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::qdrant::QdrantStore;
use knowledge_rag_core::search::{format_hits, Retriever};
use knowledge_rag_core::store::VectorStore;

/// Retriever over the configured Qdrant collection with the configured
/// embedding provider.
pub fn build_retriever(config: &Config) -> Result<Retriever> {
    let embedder = create_provider(&config.embedding)?;
    let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::connect(&config.store)?);
    Ok(Retriever::new(
        embedder,
        store,
        config.store.collection.clone(),
    ))
}

/// Run a query and render the hits as text.
pub async fn search_knowledge(retriever: &Retriever, query: &str, top_k: usize) -> Result<String> {
    let hits = retriever.search(query, top_k).await?;
    tracing::debug!(query, hits = hits.len(), "search complete");
    Ok(format_hits(&hits))
}

pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let retriever = build_retriever(config)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    println!("{}", search_knowledge(&retriever, query, top_k).await?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_rag_core::embedding::HashEmbedder;
    use knowledge_rag_core::store::memory::InMemoryVectorStore;

    #[tokio::test]
    async fn test_search_knowledge_empty_index() {
        let retriever = Retriever::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
            "ojt_knowledge",
        );
        let out = search_knowledge(&retriever, "anything", 5).await.unwrap();
        assert_eq!(out, "No results.");
    }

    #[test]
    fn test_build_retriever_rejects_disabled_provider() {
        let mut config = Config::default();
        config.embedding.provider = "disabled".into();
        assert!(build_retriever(&config).is_err());
    }
}
