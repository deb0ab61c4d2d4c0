//! # Knowledge RAG Core
//!
//! I/O-free logic for Knowledge RAG: the knowledge record model, the record
//! normalizer, the embedding trait, the vector store trait with an
//! in-memory backend, the retriever, and index lifecycle operations.
//!
//! This crate contains no tokio, reqwest, or filesystem I/O. Concrete
//! embedding backends, the Qdrant store and the index builder live in the
//! `knowledge-rag` app crate.

pub mod embedding;
pub mod lifecycle;
pub mod models;
pub mod normalize;
pub mod search;
pub mod store;
