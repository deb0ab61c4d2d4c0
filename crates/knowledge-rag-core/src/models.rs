//! Core data models: knowledge types, typed knowledge records, and the
//! derived documents that flow into the vector index.
//!
//! Partition files carry no type discriminator per line; the type is the
//! file stem (`glossary.jsonl` holds [`KnowledgeType::Glossary`] records).
//! The typed records here are what validation and `kb add` work with. The
//! index builder works on raw JSON through [`crate::normalize`] so that
//! legacy or malformed lines can still be indexed.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The four kinds of knowledge a partition can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeType {
    Glossary,
    Dataset,
    Rule,
    Analysis,
}

impl KnowledgeType {
    /// All types, in classification priority order.
    pub const ALL: [KnowledgeType; 4] = [
        KnowledgeType::Glossary,
        KnowledgeType::Dataset,
        KnowledgeType::Rule,
        KnowledgeType::Analysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeType::Glossary => "glossary",
            KnowledgeType::Dataset => "dataset",
            KnowledgeType::Rule => "rule",
            KnowledgeType::Analysis => "analysis",
        }
    }

    /// Partition file name, e.g. `glossary.jsonl`.
    pub fn file_name(&self) -> String {
        format!("{}.jsonl", self.as_str())
    }

    /// Derive the type tag from a partition file path (its stem).
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok())
    }

    /// Fields whose joint presence identifies this shape in an untagged line.
    pub fn shape_fields(&self) -> &'static [&'static str] {
        match self {
            KnowledgeType::Glossary => &["term", "definition"],
            KnowledgeType::Dataset => &["name", "description"],
            KnowledgeType::Rule => &["title", "rule_content"],
            KnowledgeType::Analysis => &["title", "summary"],
        }
    }
}

impl fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "glossary" => Ok(KnowledgeType::Glossary),
            "dataset" => Ok(KnowledgeType::Dataset),
            "rule" => Ok(KnowledgeType::Rule),
            "analysis" => Ok(KnowledgeType::Analysis),
            other => anyhow::bail!(
                "Unknown knowledge type: '{}'. Must be one of: glossary, dataset, rule, analysis",
                other
            ),
        }
    }
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_author() -> String {
    "user".to_string()
}

/// Fields shared by every knowledge record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default = "generate_id")]
    pub id: String,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryItem {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub term: String,
    pub definition: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub schema_info: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleItem {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    pub rule_content: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisItem {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    pub summary: String,
    pub findings: String,
    #[serde(default)]
    pub related_files: Vec<String>,
}

/// A schema-checked knowledge record.
///
/// Serialized without a tag: the partition file is the discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum KnowledgeRecord {
    Glossary(GlossaryItem),
    Dataset(DatasetItem),
    Rule(RuleItem),
    Analysis(AnalysisItem),
}

impl KnowledgeRecord {
    /// Check a parsed JSON value against the schema of `kind`.
    ///
    /// Missing `id`, timestamps, `author` and `tags` are filled with their
    /// defaults. Unknown extra fields are ignored.
    pub fn from_value(
        kind: KnowledgeType,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            KnowledgeType::Glossary => KnowledgeRecord::Glossary(serde_json::from_value(value)?),
            KnowledgeType::Dataset => KnowledgeRecord::Dataset(serde_json::from_value(value)?),
            KnowledgeType::Rule => KnowledgeRecord::Rule(serde_json::from_value(value)?),
            KnowledgeType::Analysis => KnowledgeRecord::Analysis(serde_json::from_value(value)?),
        })
    }

    /// Parse one partition line as a record of `kind`.
    pub fn parse_line(kind: KnowledgeType, line: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        Self::from_value(kind, value)
    }

    pub fn kind(&self) -> KnowledgeType {
        match self {
            KnowledgeRecord::Glossary(_) => KnowledgeType::Glossary,
            KnowledgeRecord::Dataset(_) => KnowledgeType::Dataset,
            KnowledgeRecord::Rule(_) => KnowledgeType::Rule,
            KnowledgeRecord::Analysis(_) => KnowledgeType::Analysis,
        }
    }

    pub fn meta(&self) -> &RecordMeta {
        match self {
            KnowledgeRecord::Glossary(r) => &r.meta,
            KnowledgeRecord::Dataset(r) => &r.meta,
            KnowledgeRecord::Rule(r) => &r.meta,
            KnowledgeRecord::Analysis(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut RecordMeta {
        match self {
            KnowledgeRecord::Glossary(r) => &mut r.meta,
            KnowledgeRecord::Dataset(r) => &mut r.meta,
            KnowledgeRecord::Rule(r) => &mut r.meta,
            KnowledgeRecord::Analysis(r) => &mut r.meta,
        }
    }

    /// Serialize as a single NDJSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        match self {
            KnowledgeRecord::Glossary(r) => serde_json::to_string(r),
            KnowledgeRecord::Dataset(r) => serde_json::to_string(r),
            KnowledgeRecord::Rule(r) => serde_json::to_string(r),
            KnowledgeRecord::Analysis(r) => serde_json::to_string(r),
        }
    }
}

/// A record prepared for the vector index.
///
/// `text` is the canonical text (embedding input); `metadata` travels
/// alongside it and is never embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    /// `"<type>:<record id>"`, or `"unknown:<hash>"` for unrecognized shapes.
    pub id: String,
    pub kind: Option<KnowledgeType>,
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Parse a timestamp written either as RFC 3339 or as a naive ISO-8601
/// datetime (legacy files), the latter read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc()),
    }
}

mod timestamp {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_roundtrip_and_file_name() {
        for kind in KnowledgeType::ALL {
            assert_eq!(kind.as_str().parse::<KnowledgeType>().unwrap(), kind);
        }
        assert_eq!(KnowledgeType::Rule.file_name(), "rule.jsonl");
        assert!("glossaries".parse::<KnowledgeType>().is_err());
    }

    #[test]
    fn test_type_from_path() {
        assert_eq!(
            KnowledgeType::from_path(Path::new("approved/dataset.jsonl")),
            Some(KnowledgeType::Dataset)
        );
        assert_eq!(KnowledgeType::from_path(Path::new("notes.jsonl")), None);
    }

    #[test]
    fn test_defaults_filled() {
        let rec = KnowledgeRecord::from_value(
            KnowledgeType::Glossary,
            json!({"term": "SLA", "definition": "Service Level Agreement"}),
        )
        .unwrap();
        let meta = rec.meta();
        assert_eq!(meta.author, "user");
        assert!(meta.tags.is_empty());
        assert!(uuid::Uuid::parse_str(&meta.id).is_ok());
        assert_eq!(rec.kind(), KnowledgeType::Glossary);
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let err = KnowledgeRecord::from_value(
            KnowledgeType::Analysis,
            json!({"title": "Churn", "summary": "Q3 churn review"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("findings"));
    }

    #[test]
    fn test_legacy_naive_timestamp_accepted() {
        let rec = KnowledgeRecord::parse_line(
            KnowledgeType::Rule,
            r#"{"id":"r1","created_at":"2024-05-01T10:20:30.123456","updated_at":"2024-05-01T10:20:30","title":"t","rule_content":"c"}"#,
        )
        .unwrap();
        assert_eq!(rec.meta().id, "r1");
        assert_eq!(
            rec.meta().created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            "2024-05-01T10:20:30.123456Z"
        );
    }

    #[test]
    fn test_json_line_has_no_tag_and_reparses() {
        let rec = KnowledgeRecord::from_value(
            KnowledgeType::Dataset,
            json!({"id": "d1", "name": "orders", "description": "daily orders"}),
        )
        .unwrap();
        let line = rec.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(value.get("kind").is_none());
        assert_eq!(value["name"], "orders");
        let again = KnowledgeRecord::parse_line(KnowledgeType::Dataset, &line).unwrap();
        assert_eq!(again, rec);
    }
}
