use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::errors::AppError;

/// The per-source shape written by the chunkers: `{"linkedin": {"chunks": [...]}, "resume": {...}}`.
#[derive(Debug, Default, Deserialize)]
struct SourceDocuments {
    #[serde(default)]
    linkedin: Option<SourceChunks>,
    #[serde(default)]
    resume: Option<SourceChunks>,
}

#[derive(Debug, Default, Deserialize)]
struct SourceChunks {
    #[serde(default)]
    chunks: Vec<Value>,
}

/// Parses upstream chunk JSON into raw records, LinkedIn chunks before resume chunks.
///
/// Accepts either a flat array or the per-source object. Records are not validated here.
pub fn parse_sources(raw: &str) -> Result<Vec<Value>, AppError> {
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return match value {
            Value::Array(records) => Ok(records),
            _ => Err(AppError::Input(
                "chunk input must be a JSON array or object".to_string(),
            )),
        };
    }

    let sources: SourceDocuments = serde_json::from_value(value)?;
    if sources.linkedin.is_none() && sources.resume.is_none() {
        return Err(AppError::Input(
            "expected a 'linkedin' or 'resume' key with a 'chunks' array".to_string(),
        ));
    }

    let linkedin = sources.linkedin.unwrap_or_default().chunks;
    let resume = sources.resume.unwrap_or_default().chunks;
    info!(
        "Loaded {} LinkedIn chunks and {} resume chunks",
        linkedin.len(),
        resume.len()
    );

    let mut records = linkedin;
    records.extend(resume);
    Ok(records)
}

pub async fn load_chunks(path: impl AsRef<Path>) -> Result<Vec<Value>, AppError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path).await?;
    let records = parse_sources(&raw)?;
    info!("Read {} chunk records from {}", records.len(), path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_flat_array() {
        let records = parse_sources(r#"[{"chunk_id": "a"}, {"chunk_id": "b"}]"#).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_sources_linkedin_first() {
        let raw = json!({
            "resume": {"chunks": [{"chunk_id": "r1"}]},
            "linkedin": {"chunks": [{"chunk_id": "l1"}, {"chunk_id": "l2"}]}
        })
        .to_string();
        let records = parse_sources(&raw).unwrap();
        let ids: Vec<&str> = records
            .iter()
            .filter_map(|r| r["chunk_id"].as_str())
            .collect();
        assert_eq!(ids, vec!["l1", "l2", "r1"]);
    }

    #[test]
    fn test_single_source() {
        let raw = r#"{"resume": {"chunks": [{"chunk_id": "r1"}]}}"#;
        assert_eq!(parse_sources(raw).unwrap().len(), 1);
    }

    #[test]
    fn test_unrecognised_shapes() {
        assert!(matches!(parse_sources(r#"{"other": []}"#), Err(AppError::Input(_))));
        assert!(matches!(parse_sources("42"), Err(AppError::Input(_))));
        assert!(matches!(parse_sources("[oops"), Err(AppError::Json(_))));
    }

    #[tokio::test]
    async fn test_load_chunks_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"linkedin": {{"chunks": [{{"chunk_id": "l1"}}]}}}}"#).unwrap();

        let records = load_chunks(file.path()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_chunks(dir.path().join("missing.json")).await.unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }
}
