//! MCP server over stdio.
//!
//! Exposes one tool, `search_knowledge`, so agents can recall glossary
//! terms, datasets, rules and past analyses from the index. Stdout carries
//! the JSON-RPC framing; all logging goes to stderr.

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::Result;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use serde_json::{json, Map, Value};

use crate::config::Config;
use crate::search::{build_retriever, search_knowledge};
use knowledge_rag_core::search::Retriever;

pub const SEARCH_TOOL: &str = "search_knowledge";

/// Serves the retriever to MCP clients. Cheap to clone.
#[derive(Clone)]
pub struct McpBridge {
    retriever: Arc<Retriever>,
    default_top_k: usize,
}

impl McpBridge {
    pub fn new(retriever: Arc<Retriever>, default_top_k: usize) -> Self {
        Self {
            retriever,
            default_top_k,
        }
    }

    fn search_tool() -> Tool {
        let schema = json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query string."
                },
                "top_k": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of results (default from config)."
                }
            },
            "required": ["query"]
        });
        let input_schema: Arc<Map<String, Value>> = match schema {
            Value::Object(map) => Arc::new(map),
            _ => Arc::new(Map::new()),
        };

        Tool {
            name: Cow::Borrowed(SEARCH_TOOL),
            title: Some("Search knowledge".to_string()),
            description: Some(Cow::Borrowed(
                "Search the knowledge base for relevant information. Use this tool when you \
                 need to recall definitions, datasets, rules, or past analyses.",
            )),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }

    /// Execute a `search_knowledge` call. Failures become tool errors, not
    /// protocol errors, so the agent sees the reason.
    pub async fn call_search(&self, args: &Map<String, Value>) -> CallToolResult {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return CallToolResult::error(vec![Content::text(
                "Error searching knowledge: missing query".to_string(),
            )]);
        };
        let top_k = args
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or(self.default_top_k);

        match search_knowledge(&self.retriever, query, top_k).await {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => {
                tracing::warn!(error = %e, "search_knowledge failed");
                CallToolResult::error(vec![Content::text(format!(
                    "Error searching knowledge: {}",
                    e
                ))])
            }
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "knowledge-rag".to_string(),
                title: Some("Knowledge RAG".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Knowledge base of glossary terms, dataset descriptions, rules and past \
                 analyses. Call search_knowledge with a natural-language query."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(vec![
            Self::search_tool(),
        ])))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        (name == SEARCH_TOOL).then(Self::search_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if request.name != SEARCH_TOOL {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }
        let args = request.arguments.unwrap_or_default();
        Ok(self.call_search(&args).await)
    }
}

/// `kb serve mcp`: serve until the client closes stdin.
pub async fn run_server(config: &Config) -> Result<()> {
    let retriever = Arc::new(build_retriever(config)?);
    let bridge = McpBridge::new(retriever, config.retrieval.top_k);

    tracing::info!(collection = %config.store.collection, "MCP server listening on stdio");
    let service = bridge.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_rag_core::embedding::HashEmbedder;
    use knowledge_rag_core::store::memory::InMemoryVectorStore;
    use knowledge_rag_core::store::{VectorPoint, VectorStore};

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect::<Vec<_>>()
            .join("")
    }

    #[test]
    fn test_tool_descriptor() {
        let tool = McpBridge::search_tool();
        assert_eq!(tool.name, SEARCH_TOOL);
        assert_eq!(tool.input_schema["required"], json!(["query"]));
    }

    #[tokio::test]
    async fn test_call_search_returns_ranked_text() {
        let embedder = Arc::new(HashEmbedder::new(64));
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_collection("kb", 64).await.unwrap();
        let text = "Term: SLA\nDefinition: Service Level Agreement";
        store
            .upsert(
                "kb",
                &[VectorPoint {
                    id: "glossary:g1".into(),
                    vector: embedder.embed_sync(text),
                    text: text.into(),
                    metadata: Map::new(),
                }],
            )
            .await
            .unwrap();

        let bridge = McpBridge::new(Arc::new(Retriever::new(embedder, store, "kb")), 5);
        let mut args = Map::new();
        args.insert("query".into(), json!("service agreement"));
        let result = bridge.call_search(&args).await;

        assert_ne!(result.is_error, Some(true));
        let out = text_of(&result);
        assert!(out.starts_with("1. ["));
        assert!(out.contains("Term: SLA"));
    }

    #[tokio::test]
    async fn test_call_search_failure_is_tool_error() {
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_collection("kb", 16).await.unwrap();
        // Provider dims differ from the collection's.
        let retriever = Retriever::new(Arc::new(HashEmbedder::new(8)), store, "kb");
        let bridge = McpBridge::new(Arc::new(retriever), 5);

        let mut args = Map::new();
        args.insert("query".into(), json!("anything"));
        let result = bridge.call_search(&args).await;

        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).starts_with("Error searching knowledge: "));
    }

    #[tokio::test]
    async fn test_call_search_missing_query_is_tool_error() {
        let store = Arc::new(InMemoryVectorStore::new());
        let retriever = Retriever::new(Arc::new(HashEmbedder::new(8)), store, "kb");
        let bridge = McpBridge::new(Arc::new(retriever), 5);

        let result = bridge.call_search(&Map::new()).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(text_of(&result), "Error searching knowledge: missing query");

        let mut args = Map::new();
        args.insert("query".into(), json!(42));
        let result = bridge.call_search(&args).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(text_of(&result), "Error searching knowledge: missing query");
    }
}
