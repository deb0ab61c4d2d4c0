//! Index lifecycle: reset and status of the configured collection.
//!
//! A reset drops the whole collection. It is the migration path when the
//! embedding model or its dimensionality changes, since vectors from the
//! old model are meaningless to the new one. There is no partial reset.

use anyhow::Result;

use crate::store::{CollectionInfo, StoreError, VectorStore};

/// What a reset did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Dropped,
    /// The collection did not exist; nothing to drop.
    AlreadyAbsent,
}

/// Drop `collection`.
///
/// The store reports a missing collection as
/// [`StoreError::CollectionNotFound`]; a reset treats exactly that as
/// success. Every other failure is returned unchanged.
pub async fn reset(store: &dyn VectorStore, collection: &str) -> Result<ResetOutcome> {
    match store.drop_collection(collection).await {
        Ok(()) => {
            tracing::info!(collection, "dropped collection");
            Ok(ResetOutcome::Dropped)
        }
        Err(e) => match e.downcast_ref::<StoreError>() {
            Some(StoreError::CollectionNotFound(_)) => {
                tracing::info!(collection, "collection already absent");
                Ok(ResetOutcome::AlreadyAbsent)
            }
            _ => Err(e),
        },
    }
}

/// Current shape of `collection`, or `None` if no index has been built.
pub async fn status(store: &dyn VectorStore, collection: &str) -> Result<Option<CollectionInfo>> {
    store.collection_info(collection).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryVectorStore;
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_reset_existing_then_absent() {
        let store = InMemoryVectorStore::new();
        store.create_collection("kb", 4).await.unwrap();

        assert_eq!(reset(&store, "kb").await.unwrap(), ResetOutcome::Dropped);
        assert!(status(&store, "kb").await.unwrap().is_none());
        assert_eq!(
            reset(&store, "kb").await.unwrap(),
            ResetOutcome::AlreadyAbsent
        );
    }

    struct BrokenStore;

    #[async_trait]
    impl VectorStore for BrokenStore {
        async fn collection_info(&self, _: &str) -> Result<Option<CollectionInfo>> {
            Ok(None)
        }
        async fn create_collection(&self, _: &str, _: usize) -> Result<()> {
            Ok(())
        }
        async fn drop_collection(&self, _: &str) -> Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn upsert(&self, _: &str, _: &[crate::store::VectorPoint]) -> Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _: &str,
            _: &[f32],
            _: usize,
        ) -> Result<Vec<crate::store::ScoredPoint>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_reset_surfaces_other_failures_verbatim() {
        let err = reset(&BrokenStore, "kb").await.unwrap_err();
        assert_eq!(err.to_string(), "connection refused");
    }
}
