//! Record normalizer: raw JSON record → canonical embeddable text.
//!
//! Each knowledge type has a fixed, labeled field order. Identifiers,
//! timestamps, author and tags never enter the canonical text; they travel
//! as metadata instead.
//!
//! # Classification
//!
//! 1. An explicit `kind` discriminator naming a known type.
//! 2. The partition tag (derived from the file name) passed as `hint`.
//! 3. Field-shape inference, first match wins:
//!    Glossary > Dataset > Rule > Analysis.
//! 4. Anything else is unrecognized and rendered as compact JSON.
//!
//! A candidate from steps 1–2 is only taken when its shape fields are
//! present and non-blank. Normalization never fails.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::models::{IndexedDocument, KnowledgeType};

/// Decide which knowledge type a raw record is.
pub fn classify(fields: &Map<String, Value>, hint: Option<KnowledgeType>) -> Option<KnowledgeType> {
    let explicit = fields
        .get("kind")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<KnowledgeType>().ok());

    explicit
        .into_iter()
        .chain(hint)
        .chain(KnowledgeType::ALL)
        .find(|kind| has_shape(fields, *kind))
}

fn has_shape(fields: &Map<String, Value>, kind: KnowledgeType) -> bool {
    kind.shape_fields()
        .iter()
        .all(|f| fields.get(*f).and_then(render_value).is_some())
}

/// Build the canonical text for a record already classified as `kind`.
pub fn canonical_text(kind: KnowledgeType, fields: &Map<String, Value>) -> String {
    let layout: &[(&str, &str)] = match kind {
        KnowledgeType::Glossary => &[
            ("Term", "term"),
            ("Definition", "definition"),
            ("Category", "category"),
            ("Synonyms", "synonyms"),
        ],
        KnowledgeType::Dataset => &[
            ("Dataset Name", "name"),
            ("Description", "description"),
            ("Schema", "schema_info"),
        ],
        KnowledgeType::Rule => &[
            ("Rule Title", "title"),
            ("Content", "rule_content"),
            ("Context", "context"),
        ],
        KnowledgeType::Analysis => &[
            ("Analysis Title", "title"),
            ("Summary", "summary"),
            ("Findings", "findings"),
        ],
    };

    layout
        .iter()
        .filter_map(|(label, key)| {
            fields
                .get(*key)
                .and_then(render_value)
                .map(|v| format!("{}: {}", label, v))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a field value for canonical text. `None` for null, empty strings
/// and empty lists so optional fields drop out.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(render_value).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

/// Normalize one raw record into an [`IndexedDocument`].
///
/// `raw_line` is the line the value was parsed from; its hash stands in for
/// the record id when the record has none, so rebuilds produce stable ids.
pub fn normalize(value: &Value, raw_line: &str, hint: Option<KnowledgeType>) -> IndexedDocument {
    let empty = Map::new();
    let fields = value.as_object().unwrap_or(&empty);

    let kind = if value.is_object() {
        classify(fields, hint)
    } else {
        None
    };

    let record_id = fields
        .get("id")
        .and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| content_hash(raw_line));

    let (id, text) = match kind {
        Some(k) => (format!("{}:{}", k, record_id), canonical_text(k, fields)),
        None => (format!("unknown:{}", content_hash(raw_line)), fallback_text(value)),
    };

    let mut metadata = Map::new();
    metadata.insert(
        "knowledge_type".to_string(),
        kind.map(|k| Value::String(k.to_string()))
            .unwrap_or(Value::Null),
    );
    metadata.insert("record_id".to_string(), Value::String(record_id));
    metadata.insert("record".to_string(), value.clone());

    IndexedDocument {
        id,
        kind,
        text,
        metadata,
    }
}

fn fallback_text(value: &Value) -> String {
    let text = value.to_string();
    if text.trim().is_empty() || text == "\"\"" {
        "(empty record)".to_string()
    } else {
        text
    }
}

/// Hex SHA-256 of a string.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value, hint: Option<KnowledgeType>) -> IndexedDocument {
        let line = value.to_string();
        normalize(&value, &line, hint)
    }

    fn assert_in_order(text: &str, parts: &[&str]) {
        let mut cursor = 0;
        for part in parts {
            let pos = text[cursor..]
                .find(part)
                .unwrap_or_else(|| panic!("'{}' missing or out of order in:\n{}", part, text));
            cursor += pos + part.len();
        }
    }

    #[test]
    fn test_glossary_text() {
        let d = doc(
            json!({"id": "g1", "term": "SLA", "definition": "Service Level Agreement",
                   "category": "ops", "synonyms": ["service agreement", "uptime contract"]}),
            None,
        );
        assert_eq!(d.kind, Some(KnowledgeType::Glossary));
        assert_eq!(d.id, "glossary:g1");
        assert_eq!(
            d.text,
            "Term: SLA\nDefinition: Service Level Agreement\nCategory: ops\nSynonyms: service agreement, uptime contract"
        );
    }

    #[test]
    fn test_dataset_text_excludes_location() {
        let d = doc(
            json!({"name": "orders", "description": "Daily orders", "schema_info": "id INT",
                   "location": "s3://bucket/orders"}),
            None,
        );
        assert_eq!(d.kind, Some(KnowledgeType::Dataset));
        assert_in_order(&d.text, &["Dataset Name: orders", "Description: Daily orders", "Schema: id INT"]);
        assert!(!d.text.contains("s3://"));
    }

    #[test]
    fn test_rule_text() {
        let d = doc(
            json!({"title": "No PII", "rule_content": "Mask emails", "context": "exports"}),
            None,
        );
        assert_eq!(d.kind, Some(KnowledgeType::Rule));
        assert_in_order(&d.text, &["Rule Title: No PII", "Content: Mask emails", "Context: exports"]);
    }

    #[test]
    fn test_analysis_text() {
        let d = doc(
            json!({"title": "Churn Q3", "summary": "Churn rose", "findings": "Pricing change",
                   "related_files": ["churn.ipynb"]}),
            None,
        );
        assert_eq!(d.kind, Some(KnowledgeType::Analysis));
        assert_in_order(
            &d.text,
            &["Analysis Title: Churn Q3", "Summary: Churn rose", "Findings: Pricing change"],
        );
        assert!(!d.text.contains("churn.ipynb"));
    }

    #[test]
    fn test_metadata_fields_not_embedded() {
        let d = doc(
            json!({"id": "abc-123", "term": "ETL", "definition": "Extract transform load",
                   "author": "alice", "tags": ["data"], "created_at": "2024-01-01T00:00:00"}),
            None,
        );
        assert!(!d.text.contains("abc-123"));
        assert!(!d.text.contains("alice"));
        assert!(!d.text.contains("2024"));
        assert_eq!(d.metadata["record"]["author"], "alice");
        assert_eq!(d.metadata["record_id"], "abc-123");
        assert_eq!(d.metadata["knowledge_type"], "glossary");
    }

    #[test]
    fn test_glossary_wins_ambiguous_shape() {
        let d = doc(
            json!({"term": "KPI", "definition": "Key indicator", "title": "T", "summary": "S"}),
            None,
        );
        assert_eq!(d.kind, Some(KnowledgeType::Glossary));
        assert!(d.text.starts_with("Term: KPI"));
    }

    #[test]
    fn test_rule_beats_analysis_on_shared_title() {
        let fields = json!({"title": "T", "rule_content": "R", "summary": "S"});
        assert_eq!(
            classify(fields.as_object().unwrap(), None),
            Some(KnowledgeType::Rule)
        );
    }

    #[test]
    fn test_hint_and_explicit_kind_take_precedence() {
        let fields = json!({"term": "KPI", "definition": "d", "title": "T", "summary": "S"});
        let map = fields.as_object().unwrap();
        assert_eq!(
            classify(map, Some(KnowledgeType::Analysis)),
            Some(KnowledgeType::Analysis)
        );

        let tagged = json!({"kind": "analysis", "term": "KPI", "definition": "d", "title": "T", "summary": "S"});
        assert_eq!(
            classify(tagged.as_object().unwrap(), Some(KnowledgeType::Glossary)),
            Some(KnowledgeType::Analysis)
        );
    }

    #[test]
    fn test_hint_ignored_when_shape_missing() {
        let fields = json!({"name": "orders", "description": "d"});
        assert_eq!(
            classify(fields.as_object().unwrap(), Some(KnowledgeType::Glossary)),
            Some(KnowledgeType::Dataset)
        );
    }

    #[test]
    fn test_null_required_field_is_absent() {
        let fields = json!({"term": "X", "definition": null});
        assert_eq!(classify(fields.as_object().unwrap(), None), None);
    }

    #[test]
    fn test_blank_required_fields_do_not_match_shape() {
        let value = json!({"term": "", "definition": "  "});
        let doc = normalize(&value, &value.to_string(), Some(KnowledgeType::Glossary));
        assert_eq!(doc.kind, None);
        assert!(doc.id.starts_with("unknown:"));
        assert!(!doc.text.trim().is_empty());
    }

    #[test]
    fn test_unrecognized_shapes_fall_back() {
        for value in [
            json!({"foo": "bar"}),
            json!({}),
            json!([1, 2, 3]),
            json!("just a string"),
            json!(""),
            json!(42),
            Value::Null,
        ] {
            let d = doc(value.clone(), Some(KnowledgeType::Glossary));
            assert_eq!(d.kind, None, "{value}");
            assert!(!d.text.trim().is_empty(), "empty text for {value}");
            assert!(d.id.starts_with("unknown:"));
        }
    }

    #[test]
    fn test_id_stable_without_explicit_id() {
        let value = json!({"term": "SLA", "definition": "Service Level Agreement"});
        let line = value.to_string();
        let a = normalize(&value, &line, None);
        let b = normalize(&value, &line, None);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, format!("glossary:{}", content_hash(&line)));
    }

    #[test]
    fn test_non_string_values_rendered() {
        let d = doc(json!({"title": "Limit", "rule_content": 500, "context": true}), None);
        assert_eq!(d.text, "Rule Title: Limit\nContent: 500\nContext: true");
    }
}
