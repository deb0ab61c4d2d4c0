//! Qdrant vector store over the REST API.
//!
//! Qdrant point ids must be unsigned integers or UUIDs, so each document id
//! (`"glossary:g-17"`) is mapped to a UUID v5 under a fixed namespace and the
//! original id is kept in the payload as `doc_id`. The mapping is stable, so
//! re-indexing the same record overwrites its point.
//!
//! Payload layout: `{ "doc_id": ..., "text": ..., "metadata": {...} }`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::embedding::body_text;
use knowledge_rag_core::store::{CollectionInfo, ScoredPoint, StoreError, VectorPoint, VectorStore};

/// [`VectorStore`] backed by a Qdrant server.
pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantStore {
    /// Build a client for `[store]`. Does not contact the server.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow!("{} environment variable not set (store.api_key_env)", var))?,
            ),
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<(StatusCode, Value)> {
        let response = req
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("{} failed ({}): {}", what, self.base_url, e)))?;
        let status = response.status();
        let text = body_text(response).await;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok((status, body))
    }
}

/// Stable point id for a document id.
pub fn point_id(doc_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, doc_id.as_bytes())
}

fn backend_error(what: &str, status: StatusCode, body: &Value) -> anyhow::Error {
    let detail = body
        .pointer("/status/error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    StoreError::Backend(format!("{} returned {}: {}", what, status, detail)).into()
}

fn parse_collection_info(body: &Value) -> Result<CollectionInfo> {
    let result = body
        .get("result")
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result"))?;
    let dims = result
        .pointer("/config/params/vectors/size")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing vectors.size"))?;
    let points = result
        .get("points_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Ok(CollectionInfo {
        dims: dims as usize,
        points,
    })
}

fn point_body(point: &VectorPoint) -> Value {
    json!({
        "id": point_id(&point.id).to_string(),
        "vector": point.vector,
        "payload": {
            "doc_id": point.id,
            "text": point.text,
            "metadata": point.metadata,
        },
    })
}

fn parse_search_response(body: &Value) -> Result<Vec<ScoredPoint>> {
    let hits = body
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result array"))?;

    Ok(hits
        .iter()
        .map(|hit| {
            let payload = hit.get("payload");
            let field = |name: &str| {
                payload
                    .and_then(|p| p.get(name))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let id = match field("doc_id") {
                id if id.is_empty() => hit.get("id").map(|v| v.to_string()).unwrap_or_default(),
                id => id,
            };
            ScoredPoint {
                id,
                score: hit.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                text: field("text"),
                metadata: payload
                    .and_then(|p| p.get("metadata"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_else(Map::new),
            }
        })
        .collect())
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        let req = self.request(reqwest::Method::GET, &format!("/collections/{}", collection));
        let (status, body) = self.send(req, "get collection").await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => parse_collection_info(&body).map(Some),
            s => Err(backend_error("get collection", s, &body)),
        }
    }

    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let req = self
            .request(reqwest::Method::PUT, &format!("/collections/{}", collection))
            .json(&json!({ "vectors": { "size": dims, "distance": "Cosine" } }));
        let (status, body) = self.send(req, "create collection").await?;
        if !status.is_success() {
            return Err(backend_error("create collection", status, &body));
        }
        tracing::info!(collection, dims, "created qdrant collection");
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        // Qdrant answers DELETE on a missing collection with 200 and `result: false`.
        if self.collection_info(collection).await?.is_none() {
            return Err(StoreError::CollectionNotFound(collection.to_string()).into());
        }
        let req = self.request(reqwest::Method::DELETE, &format!("/collections/{}", collection));
        let (status, body) = self.send(req, "delete collection").await?;
        match status {
            StatusCode::NOT_FOUND => Err(StoreError::CollectionNotFound(collection.to_string()).into()),
            s if s.is_success() => Ok(()),
            s => Err(backend_error("delete collection", s, &body)),
        }
    }

    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": points.iter().map(point_body).collect::<Vec<_>>() });
        let req = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", collection),
            )
            .json(&body);
        let (status, body) = self.send(req, "upsert points").await?;
        match status {
            StatusCode::NOT_FOUND => Err(StoreError::CollectionNotFound(collection.to_string()).into()),
            s if s.is_success() => Ok(()),
            s => Err(backend_error("upsert points", s, &body)),
        }
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let req = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", collection),
            )
            .json(&json!({ "vector": vector, "limit": top_k, "with_payload": true }));
        let (status, body) = self.send(req, "search").await?;
        match status {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => parse_search_response(&body),
            s => Err(backend_error("search", s, &body)),
        }
    }
}
