//! # Knowledge RAG
//!
//! Semantic index and retrieval over structured knowledge records: glossary
//! terms, dataset descriptions, rules and analyses, kept as append-only
//! NDJSON partitions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌─────────┐   ┌──────────┐
//! │ approved/    │──▶│ Normalizer  │──▶│ Embed   │──▶│  Qdrant  │
//! │ *.jsonl      │   │ canon. text │   │ batches │   │ collection│
//! └──────────────┘   └─────────────┘   └─────────┘   └────┬─────┘
//!                                                         │
//!                                   ┌─────────────────────┤
//!                                   ▼                     ▼
//!                              ┌──────────┐         ┌──────────┐
//!                              │   CLI    │         │   MCP    │
//!                              │   (kb)   │         │  stdio   │
//!                              └──────────┘         └──────────┘
//! ```
//!
//! The I/O-free pieces (record model, normalizer, traits, retriever, reset)
//! live in `knowledge-rag-core`; this crate supplies configuration, the
//! network backends, the directory-scanning builder and the host surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`embedding`] | Gemini, OpenAI, Ollama, local and hash embedders |
//! | [`qdrant`] | Qdrant REST vector store |
//! | [`ingest`] | Index builder |
//! | [`knowledge`] | Partition validation and record append |
//! | [`search`] | Retriever wiring and `kb search` |
//! | [`lifecycle`] | `kb reset` / `kb status` |
//! | [`mcp`] | MCP stdio server |

pub mod config;
pub mod embedding;
pub mod ingest;
pub mod knowledge;
pub mod lifecycle;
pub mod mcp;
pub mod qdrant;
pub mod search;

pub use knowledge_rag_core::models;
pub use knowledge_rag_core::normalize;
pub use knowledge_rag_core::store;
