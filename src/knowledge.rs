//! Partition maintenance: schema validation and record append.
//!
//! Partitions under `<root>/raw` are written by people and agents; these
//! helpers keep them well-formed before they are promoted to `approved/`
//! and indexed.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use knowledge_rag_core::models::{KnowledgeRecord, KnowledgeType};

/// Author recorded on appended records that do not name one.
pub const AGENT_AUTHOR: &str = "ai_agent";

/// One invalid line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    /// 1-based.
    pub line: usize,
    pub message: String,
}

/// Result of validating one partition file.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub kind: KnowledgeType,
    /// Non-empty lines checked.
    pub checked: usize,
    pub errors: Vec<LineError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check one line against the schema of `kind`.
pub fn validate_line(line: &str, kind: KnowledgeType) -> Result<KnowledgeRecord> {
    let value: Value = serde_json::from_str(line).context("invalid JSON")?;
    if !value.is_object() {
        bail!("expected a JSON object");
    }
    Ok(KnowledgeRecord::from_value(kind, value)?)
}

/// Validate every non-empty line of `path` as `kind`.
///
/// Fails only when the file cannot be read; bad lines are reported.
pub fn validate_file(path: &Path, kind: KnowledgeType) -> Result<ValidationReport> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let mut report = ValidationReport {
        path: path.to_path_buf(),
        kind,
        checked: 0,
        errors: Vec::new(),
    };
    for (i, raw) in content.split(|b| *b == b'\n').enumerate() {
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        report.checked += 1;
        let checked = std::str::from_utf8(raw)
            .context("invalid UTF-8")
            .and_then(|line| validate_line(line, kind));
        if let Err(e) = checked {
            report.errors.push(LineError {
                line: i + 1,
                message: format!("{:#}", e),
            });
        }
    }
    Ok(report)
}

/// Validate each `<type>.jsonl` that exists in `dir`. Missing partitions
/// are not an error.
pub fn validate_all(dir: &Path) -> Result<Vec<ValidationReport>> {
    KnowledgeType::ALL
        .iter()
        .map(|kind| (dir.join(kind.file_name()), *kind))
        .filter(|(path, _)| path.is_file())
        .map(|(path, kind)| validate_file(&path, kind))
        .collect()
}

/// Validate `json`, fill defaults, and append it as one line to
/// `<raw_dir>/<type>.jsonl`. Returns the partition path and the stored record.
///
/// A missing `author` becomes [`AGENT_AUTHOR`]; the schema default
/// (`"user"`) applies only to records read back without one.
pub fn append_record(
    raw_dir: &Path,
    kind: KnowledgeType,
    json: &str,
) -> Result<(PathBuf, KnowledgeRecord)> {
    let value: Value = serde_json::from_str(json).context("Invalid JSON string")?;
    let has_author = value.get("author").is_some();
    let mut record = KnowledgeRecord::from_value(kind, value)
        .with_context(|| format!("Record does not match the {} schema", kind))?;
    if !has_author {
        record.meta_mut().author = AGENT_AUTHOR.to_string();
    }

    std::fs::create_dir_all(raw_dir)
        .with_context(|| format!("Failed to create {}", raw_dir.display()))?;
    let path = raw_dir.join(kind.file_name());
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{}", record.to_json_line()?)?;

    tracing::info!(path = %path.display(), id = %record.meta().id, "appended record");
    Ok((path, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_validate_line() {
        assert!(validate_line(r#"{"term":"SLA","definition":"x"}"#, KnowledgeType::Glossary).is_ok());
        assert!(validate_line(r#"{"term":"SLA"}"#, KnowledgeType::Glossary).is_err());
        assert!(validate_line("[1,2]", KnowledgeType::Glossary).is_err());
        assert!(validate_line("nope", KnowledgeType::Rule).is_err());
    }

    #[test]
    fn test_validate_file_reports_line_numbers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rule.jsonl");
        fs::write(
            &path,
            "{\"title\":\"a\",\"rule_content\":\"b\"}\n\n{\"title\":\"c\"}\n",
        )
        .unwrap();

        let report = validate_file(&path, KnowledgeType::Rule).unwrap();
        assert_eq!(report.checked, 2);
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].line, 3);
        assert!(report.errors[0].message.contains("rule_content"));
    }

    #[test]
    fn test_validate_file_reports_invalid_utf8_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("glossary.jsonl");
        let mut bytes = b"{\"term\":\"SLA\",\"definition\":\"x\"}\r\n".to_vec();
        bytes.extend_from_slice(b"{\"term\":\"\xff\",\"definition\":\"y\"}\n");
        fs::write(&path, bytes).unwrap();

        let report = validate_file(&path, KnowledgeType::Glossary).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].line, 2);
        assert!(report.errors[0].message.contains("UTF-8"));
    }

    #[test]
    fn test_validate_file_missing() {
        let tmp = TempDir::new().unwrap();
        let err = validate_file(&tmp.path().join("x.jsonl"), KnowledgeType::Dataset).unwrap_err();
        assert!(err.to_string().starts_with("File not found"));
    }

    #[test]
    fn test_validate_all_skips_absent_partitions() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("dataset.jsonl"),
            "{\"name\":\"orders\",\"description\":\"daily orders\"}\n",
        )
        .unwrap();
        let reports = validate_all(tmp.path()).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, KnowledgeType::Dataset);
        assert!(reports[0].is_valid());
    }

    #[test]
    fn test_append_record_defaults_author_and_appends() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("raw");

        let (path, first) = append_record(
            &raw,
            KnowledgeType::Glossary,
            r#"{"term":"SLA","definition":"Service Level Agreement"}"#,
        )
        .unwrap();
        assert_eq!(path, raw.join("glossary.jsonl"));
        assert_eq!(first.meta().author, AGENT_AUTHOR);

        let (_, second) = append_record(
            &raw,
            KnowledgeType::Glossary,
            r#"{"term":"ETL","definition":"Extract, transform, load","author":"dana"}"#,
        )
        .unwrap();
        assert_eq!(second.meta().author, "dana");

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let reparsed = KnowledgeRecord::parse_line(KnowledgeType::Glossary, lines[0]).unwrap();
        assert_eq!(reparsed, first);
        assert!(validate_file(&path, KnowledgeType::Glossary).unwrap().is_valid());
    }

    #[test]
    fn test_append_record_rejects_invalid() {
        let tmp = TempDir::new().unwrap();
        assert!(append_record(tmp.path(), KnowledgeType::Analysis, r#"{"title":"x"}"#).is_err());
        assert!(append_record(tmp.path(), KnowledgeType::Analysis, "{oops").is_err());
        assert!(!tmp.path().join("analysis.jsonl").exists());
    }
}
