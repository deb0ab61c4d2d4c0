//! Index build: partition files → normalized documents → embeddings → store.
//!
//! A build is a full pass over the source directory. Every matching file is
//! read line by line, each line normalized into an [`IndexedDocument`],
//! embedded in batches and upserted. Points are keyed by document id, so
//! rebuilding over an existing collection overwrites rather than duplicates.
//! Nothing is deleted: to drop records that vanished from the source, reset
//! first.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::qdrant::QdrantStore;
use knowledge_rag_core::embedding::{check_embeddings, EmbeddingProvider};
use knowledge_rag_core::models::{IndexedDocument, KnowledgeType};
use knowledge_rag_core::normalize::normalize;
use knowledge_rag_core::store::{VectorPoint, VectorStore};

/// Counters from one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Partition files read.
    pub files: usize,
    /// Non-empty lines seen.
    pub lines: usize,
    /// Distinct documents upserted.
    pub documents: usize,
    /// Lines dropped: invalid UTF-8 or JSON, or unrecognized with indexing of those disabled.
    pub skipped_lines: usize,
    /// Lines that matched no record shape and were indexed as raw JSON.
    pub unrecognized: usize,
}

/// Builds the vector index from a directory of partition files.
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    include: GlobSet,
    batch_size: usize,
    upsert_batch_size: usize,
    index_unrecognized: bool,
}

impl IndexBuilder {
    /// A builder with default batching that indexes `**/*.jsonl`.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            embedder,
            store,
            collection: collection.into(),
            include: build_globset(&["**/*.jsonl".to_string()])?,
            batch_size: 64,
            upsert_batch_size: 256,
            index_unrecognized: true,
        })
    }

    /// A builder wired from `config`.
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        Ok(Self {
            include: build_globset(&config.knowledge.include_globs)?,
            batch_size: config.embedding.batch_size.max(1),
            upsert_batch_size: config.store.upsert_batch_size.max(1),
            index_unrecognized: config.knowledge.index_unrecognized,
            ..Self::new(embedder, store, config.store.collection.clone())?
        })
    }

    pub fn with_batch_sizes(mut self, embed: usize, upsert: usize) -> Self {
        self.batch_size = embed.max(1);
        self.upsert_batch_size = upsert.max(1);
        self
    }

    pub fn with_index_unrecognized(mut self, yes: bool) -> Self {
        self.index_unrecognized = yes;
        self
    }

    /// Index every partition file under `source_dir`.
    ///
    /// A missing directory is created and yields an empty report.
    pub async fn build(&self, source_dir: &Path) -> Result<BuildReport> {
        let mut report = BuildReport::default();

        if !source_dir.exists() {
            std::fs::create_dir_all(source_dir).with_context(|| {
                format!("Failed to create source directory: {}", source_dir.display())
            })?;
            tracing::info!(dir = %source_dir.display(), "created empty source directory");
            return Ok(report);
        }

        let files = scan_partitions(source_dir, &self.include)?;
        let mut docs: Vec<IndexedDocument> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for path in &files {
            report.files += 1;
            let relative = path
                .strip_prefix(source_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            let hint = KnowledgeType::from_path(path);
            let content = std::fs::read(path)
                .with_context(|| format!("Failed to read partition file: {}", path.display()))?;

            for (lineno, raw) in content.split(|b| *b == b'\n').enumerate() {
                if raw.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                report.lines += 1;

                // Decode per line; a bad byte drops only its own line.
                let line = match std::str::from_utf8(raw) {
                    Ok(l) => l.trim(),
                    Err(e) => {
                        tracing::warn!(file = %relative, line = lineno + 1, error = %e, "skipping line with invalid UTF-8");
                        report.skipped_lines += 1;
                        continue;
                    }
                };

                let value: Value = match serde_json::from_str(line) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(file = %relative, line = lineno + 1, error = %e, "skipping invalid JSON line");
                        report.skipped_lines += 1;
                        continue;
                    }
                };

                let mut doc = normalize(&value, line, hint);
                if doc.kind.is_none() {
                    if !self.index_unrecognized {
                        tracing::warn!(file = %relative, line = lineno + 1, "skipping unrecognized record");
                        report.skipped_lines += 1;
                        continue;
                    }
                    report.unrecognized += 1;
                }
                doc.metadata
                    .insert("source".to_string(), Value::String(relative.clone()));
                doc.metadata.insert(
                    "embedding_model".to_string(),
                    Value::String(self.embedder.model_name().to_string()),
                );

                // Later lines win: append-only partitions record updates as new lines.
                match positions.get(&doc.id) {
                    Some(&i) => docs[i] = doc,
                    None => {
                        positions.insert(doc.id.clone(), docs.len());
                        docs.push(doc);
                    }
                }
            }
        }

        if docs.is_empty() {
            tracing::info!(files = report.files, "no documents to index");
            return Ok(report);
        }

        let dims = self.embedder.dims();
        self.store.ensure_collection(&self.collection, dims).await?;

        let mut pending: Vec<VectorPoint> = Vec::with_capacity(self.upsert_batch_size);
        for batch in docs.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            check_embeddings(&vectors, texts.len(), dims)?;

            for (doc, vector) in batch.iter().zip(vectors) {
                pending.push(VectorPoint {
                    id: doc.id.clone(),
                    vector,
                    text: doc.text.clone(),
                    metadata: doc.metadata.clone(),
                });
                if pending.len() >= self.upsert_batch_size {
                    self.store.upsert(&self.collection, &pending).await?;
                    report.documents += pending.len();
                    pending.clear();
                }
            }
            tracing::debug!(embedded = report.documents + pending.len(), total = docs.len(), "embedding progress");
        }
        if !pending.is_empty() {
            self.store.upsert(&self.collection, &pending).await?;
            report.documents += pending.len();
        }

        tracing::info!(
            collection = %self.collection,
            files = report.files,
            documents = report.documents,
            skipped = report.skipped_lines,
            "index build complete"
        );
        Ok(report)
    }
}

/// Partition files under `root` matching `include`, sorted by path.
pub fn scan_partitions(root: &Path, include: &GlobSet) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if include.is_match(relative) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// `kb build`: index `source` (default `<root>/approved`) into Qdrant.
pub async fn run_build(config: &Config, source: Option<PathBuf>) -> Result<()> {
    let source = source.unwrap_or_else(|| config.knowledge.approved_dir());
    let embedder = create_provider(&config.embedding)?;
    let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::connect(&config.store)?);

    let report = IndexBuilder::from_config(config, embedder, store)?
        .build(&source)
        .await?;

    println!("build {}", source.display());
    println!("  files: {}", report.files);
    println!("  lines: {}", report.lines);
    println!("  documents indexed: {}", report.documents);
    println!("  unrecognized: {}", report.unrecognized);
    println!("  skipped lines: {}", report.skipped_lines);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_rag_core::embedding::HashEmbedder;
    use knowledge_rag_core::store::memory::InMemoryVectorStore;
    use std::fs;
    use tempfile::TempDir;

    fn builder(store: Arc<InMemoryVectorStore>) -> IndexBuilder {
        IndexBuilder::new(Arc::new(HashEmbedder::new(64)), store, "kb").unwrap()
    }

    #[tokio::test]
    async fn test_build_counts_and_dedupes() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("glossary.jsonl"),
            concat!(
                "{\"id\":\"g1\",\"term\":\"SLA\",\"definition\":\"old\"}\n",
                "\n",
                "{\"id\":\"g1\",\"term\":\"SLA\",\"definition\":\"Service Level Agreement\"}\n",
                "not json\n",
                "{\"foo\":\"bar\"}\n",
            ),
        )
        .unwrap();

        let store = Arc::new(InMemoryVectorStore::new());
        let report = builder(store.clone()).build(tmp.path()).await.unwrap();

        assert_eq!(report.files, 1);
        assert_eq!(report.lines, 4);
        assert_eq!(report.documents, 2);
        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.unrecognized, 1);

        let info = store.collection_info("kb").await.unwrap().unwrap();
        assert_eq!(info.points, 2);
        assert_eq!(info.dims, 64);

        let hits = store
            .search("kb", &HashEmbedder::new(64).embed_sync("Term: SLA\nDefinition: Service Level Agreement"), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "glossary:g1");
        assert!(hits[0].text.contains("Service Level Agreement"));
        assert_eq!(hits[0].metadata["source"], "glossary.jsonl");
        assert_eq!(hits[0].metadata["embedding_model"], "fnv1a-hash-64");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut glossary = b"{\"id\":\"g1\",\"term\":\"SLA\",\"definition\":\"Service Level Agreement\"}\r\n".to_vec();
        glossary.extend_from_slice(b"{\"term\":\"bad \xff\",\"definition\":\"x\"}\n");
        fs::write(tmp.path().join("glossary.jsonl"), glossary).unwrap();
        fs::write(
            tmp.path().join("rule.jsonl"),
            "{\"id\":\"r1\",\"title\":\"PII\",\"rule_content\":\"Mask emails\"}\n",
        )
        .unwrap();

        let store = Arc::new(InMemoryVectorStore::new());
        let report = builder(store.clone()).build(tmp.path()).await.unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.lines, 3);
        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.documents, 2);
        assert_eq!(store.collection_info("kb").await.unwrap().unwrap().points, 2);
    }

    #[tokio::test]
    async fn test_skip_unrecognized_when_disabled() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("misc.jsonl"), "{\"foo\":1}\n").unwrap();

        let store = Arc::new(InMemoryVectorStore::new());
        let report = builder(store.clone())
            .with_index_unrecognized(false)
            .build(tmp.path())
            .await
            .unwrap();
        assert_eq!(report.documents, 0);
        assert_eq!(report.skipped_lines, 1);
        assert!(store.collection_info("kb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_source_is_created_and_empty() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("approved");
        let store = Arc::new(InMemoryVectorStore::new());
        let report = builder(store).build(&source).await.unwrap();
        assert_eq!(report, BuildReport::default());
        assert!(source.is_dir());
    }

    #[tokio::test]
    async fn test_small_batches_index_everything() {
        let tmp = TempDir::new().unwrap();
        let lines: String = (0..7)
            .map(|i| format!("{{\"id\":\"r{i}\",\"title\":\"Rule {i}\",\"rule_content\":\"Do thing {i}\"}}\n"))
            .collect();
        fs::write(tmp.path().join("rules.jsonl"), lines).unwrap();

        let store = Arc::new(InMemoryVectorStore::new());
        let report = builder(store.clone())
            .with_batch_sizes(2, 3)
            .build(tmp.path())
            .await
            .unwrap();
        assert_eq!(report.documents, 7);
        assert_eq!(store.collection_info("kb").await.unwrap().unwrap().points, 7);
    }

    #[test]
    fn test_scan_partitions_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("nested")).unwrap();
        fs::write(tmp.path().join("rules.jsonl"), "").unwrap();
        fs::write(tmp.path().join("glossary.jsonl"), "").unwrap();
        fs::write(tmp.path().join("nested/analysis.jsonl"), "").unwrap();
        fs::write(tmp.path().join("notes.md"), "").unwrap();

        let set = build_globset(&["**/*.jsonl".to_string()]).unwrap();
        let files = scan_partitions(tmp.path(), &set).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["glossary.jsonl", "nested/analysis.jsonl", "rules.jsonl"]);
    }
}
