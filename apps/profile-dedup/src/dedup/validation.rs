//! Input validation: upstream JSON records become `Chunk`s before any clustering.
//!
//! A record without a `metadata` object or without narrative text is rejected on its own;
//! the rest of the batch carries on. Missing or null metadata fields become the `N/A`
//! sentinel (`Other` for the section).

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::errors::ValidationError;
use crate::models::{Chunk, ChunkMetadata, DEFAULT_SECTION, UNKNOWN};

#[derive(Debug, Clone, Serialize)]
pub struct RejectedRecord {
    pub error: ValidationError,
    pub record: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ValidatedChunks {
    pub chunks: Vec<Chunk>,
    pub rejected: Vec<RejectedRecord>,
}

/// Validates every record, assigning a fresh id where the producer left none or reused one.
pub fn validate_chunks(records: Vec<Value>) -> ValidatedChunks {
    let mut validated = ValidatedChunks::default();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (index, record) in records.into_iter().enumerate() {
        match validate_chunk(index, &record) {
            Ok(mut chunk) => {
                if chunk.chunk_id.is_empty() || !seen_ids.insert(chunk.chunk_id.clone()) {
                    if !chunk.chunk_id.is_empty() {
                        warn!("record {index} reuses chunk_id {}, assigning a new one", chunk.chunk_id);
                    }
                    chunk.chunk_id = Uuid::new_v4().to_string();
                    seen_ids.insert(chunk.chunk_id.clone());
                }
                validated.chunks.push(chunk);
            }
            Err(error) => {
                warn!("Rejected upstream chunk: {error}");
                validated.rejected.push(RejectedRecord { error, record });
            }
        }
    }

    validated
}

/// Validates one record. The returned chunk has an empty id when the record carried none.
pub fn validate_chunk(index: usize, record: &Value) -> Result<Chunk, ValidationError> {
    let object = record
        .as_object()
        .ok_or(ValidationError::NotAnObject { index })?;

    let metadata = object
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or(ValidationError::MissingMetadata { index })?;

    let embedding_text = object
        .get("embedding_text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or(ValidationError::MissingEmbeddingText { index })?;

    let chunk_id = match object.get("chunk_id") {
        Some(Value::String(id)) => id.trim().to_string(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    };

    Ok(Chunk {
        chunk_id,
        embedding_text: embedding_text.to_string(),
        metadata: ChunkMetadata {
            section_type: metadata_field(metadata, "section_type", DEFAULT_SECTION),
            date_range: metadata_field(metadata, "date_range", UNKNOWN),
            company: metadata_field(metadata, "company", UNKNOWN),
            location: metadata_field(metadata, "location", UNKNOWN),
            job_title: metadata_field(metadata, "job_title", UNKNOWN),
        },
    })
}

fn metadata_field(metadata: &Map<String, Value>, key: &str, fallback: &str) -> String {
    let value = match metadata.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    };

    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_record() {
        let record = json!({
            "chunk_id": "li-3",
            "embedding_text": "  Built payment services at Shopify.  ",
            "metadata": {
                "section_type": "Experience",
                "date_range": "May 2021 - Aug 2022",
                "company": "Shopify",
                "location": "Ottawa, ON",
                "job_title": "Backend Developer"
            }
        });
        let chunk = validate_chunk(0, &record).unwrap();
        assert_eq!(chunk.chunk_id, "li-3");
        assert_eq!(chunk.embedding_text, "Built payment services at Shopify.");
        assert_eq!(chunk.metadata.company, "Shopify");
        assert_eq!(chunk.metadata.location, "Ottawa, ON");
    }

    #[test]
    fn test_missing_fields_become_sentinels() {
        let record = json!({
            "embedding_text": "Volunteered at the food bank.",
            "metadata": { "company": null, "job_title": "" }
        });
        let chunk = validate_chunk(0, &record).unwrap();
        assert_eq!(chunk.metadata.section_type, "Other");
        assert_eq!(chunk.metadata.company, "N/A");
        assert_eq!(chunk.metadata.job_title, "N/A");
        assert_eq!(chunk.metadata.date_range, "N/A");
    }

    #[test]
    fn test_missing_metadata_is_rejected() {
        let record = json!({ "embedding_text": "No metadata here." });
        assert_eq!(
            validate_chunk(7, &record),
            Err(ValidationError::MissingMetadata { index: 7 })
        );
    }

    #[test]
    fn test_blank_text_is_rejected() {
        let record = json!({ "embedding_text": "   ", "metadata": {} });
        assert_eq!(
            validate_chunk(1, &record),
            Err(ValidationError::MissingEmbeddingText { index: 1 })
        );
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert_eq!(
            validate_chunk(2, &json!("just a string")),
            Err(ValidationError::NotAnObject { index: 2 })
        );
    }

    #[test]
    fn test_list_metadata_is_joined() {
        let record = json!({
            "embedding_text": "Text",
            "metadata": { "location": ["Toronto", "Remote"] }
        });
        assert_eq!(validate_chunk(0, &record).unwrap().metadata.location, "Toronto, Remote");
    }

    #[test]
    fn test_batch_keeps_valid_and_reports_rejected() {
        let records = vec![
            json!({ "embedding_text": "A", "metadata": {} }),
            json!({ "embedding_text": "B" }),
            json!({ "embedding_text": "C", "metadata": {} }),
        ];
        let validated = validate_chunks(records);
        assert_eq!(validated.chunks.len(), 2);
        assert_eq!(validated.rejected.len(), 1);
        assert_eq!(
            validated.rejected[0].error,
            ValidationError::MissingMetadata { index: 1 }
        );
    }

    #[test]
    fn test_ids_are_assigned_and_unique() {
        let records = vec![
            json!({ "chunk_id": "x", "embedding_text": "A", "metadata": {} }),
            json!({ "chunk_id": "x", "embedding_text": "B", "metadata": {} }),
            json!({ "embedding_text": "C", "metadata": {} }),
        ];
        let validated = validate_chunks(records);
        let ids: HashSet<&str> = validated.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(validated.chunks[0].chunk_id, "x");
        assert!(validated.chunks.iter().all(|c| !c.chunk_id.is_empty()));
    }
}
