//! Merge Stage — collapses a confirmed cluster into one unified chunk.
//!
//! Two backends share the [`Merger`] trait:
//! - `LlmMerger`: narrative consolidation by the LLM, response validated strictly.
//! - `RuleMerger`: deterministic sentence-level consolidation, used offline and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::dedup::prompts::{MERGE_PROMPT, MERGE_SYSTEM};
use crate::dedup::similarity::{
    is_match, normalize, similarity_ratio, COMPANY_MATCH_THRESHOLD, TITLE_MATCH_THRESHOLD,
};
use crate::errors::CapabilityError;
use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, NO_FABRICATION_INSTRUCTION};
use crate::llm_client::LlmClient;
use crate::models::{
    Chunk, ChunkMetadata, Cluster, MetadataValue, UnifiedChunk, UnifiedMetadata, UNKNOWN,
};

pub const MIN_SUMMARY_WORDS: usize = 100;
pub const MAX_SUMMARY_WORDS: usize = 250;

/// Sentences at least this similar are treated as restatements of each other.
const SENTENCE_DUPLICATE_RATIO: f32 = 0.9;

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// Consolidates one cluster. Carried by the pipeline as `Arc<dyn Merger>`.
///
/// The `Cluster` type guarantees at least two members.
#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge(&self, cluster: &Cluster) -> Result<UnifiedChunk, CapabilityError>;

    fn name(&self) -> &'static str;
}

// ────────────────────────────────────────────────────────────────────────────
// LlmMerger
// ────────────────────────────────────────────────────────────────────────────

pub struct LlmMerger {
    llm: LlmClient,
}

impl LlmMerger {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

/// What the model sees of a member: no bookkeeping id.
#[derive(Debug, Serialize)]
struct MergeEntry<'a> {
    embedding_text: &'a str,
    metadata: &'a ChunkMetadata,
}

#[async_trait]
impl Merger for LlmMerger {
    async fn merge(&self, cluster: &Cluster) -> Result<UnifiedChunk, CapabilityError> {
        let entries: Vec<MergeEntry<'_>> = cluster
            .members()
            .iter()
            .map(|c| MergeEntry {
                embedding_text: &c.embedding_text,
                metadata: &c.metadata,
            })
            .collect();
        let cluster_json = serde_json::to_string_pretty(&entries)
            .map_err(|e| CapabilityError::Encode(e.to_string()))?;

        let prompt = format!(
            "{}\n\n{}",
            MERGE_PROMPT.replace("{cluster_json}", &cluster_json),
            NO_FABRICATION_INSTRUCTION
        );
        let system = format!("{MERGE_SYSTEM} {JSON_ONLY_SYSTEM}");

        let unified: UnifiedChunk = self.llm.call_json(&prompt, &system).await?;
        let unified = validate_unified(unified)?;

        let words = word_count(&unified.embedding_text);
        if !(MIN_SUMMARY_WORDS..=MAX_SUMMARY_WORDS).contains(&words) {
            warn!(
                "Merged summary has {} words (expected {}-{})",
                words, MIN_SUMMARY_WORDS, MAX_SUMMARY_WORDS
            );
        }
        for (field, value) in unrepresented_values(cluster, &unified) {
            warn!("Merged record does not mention member {field} '{value}'");
        }

        Ok(unified)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Rejects a merge response that has the right JSON shape but unusable content.
pub fn validate_unified(unified: UnifiedChunk) -> Result<UnifiedChunk, CapabilityError> {
    if unified.embedding_text.trim().is_empty() {
        return Err(CapabilityError::Malformed(
            "merged embedding_text is empty".to_string(),
        ));
    }
    if unified.metadata.section_type.trim().is_empty() {
        return Err(CapabilityError::Malformed(
            "merged section_type is empty".to_string(),
        ));
    }

    let metadata = &unified.metadata;
    for (field, value) in [
        ("date_range", &metadata.date_range),
        ("company", &metadata.company),
        ("location", &metadata.location),
        ("job_title", &metadata.job_title),
    ] {
        if matches!(value, MetadataValue::Many(values) if values.is_empty()) || value.is_blank() {
            return Err(CapabilityError::Malformed(format!(
                "merged {field} has no value"
            )));
        }
    }

    Ok(unified)
}

/// Known member values of the multi-valued fields that the merged record dropped.
///
/// A value counts as represented when it fuzzy-matches one of the merged values.
pub fn unrepresented_values(cluster: &Cluster, unified: &UnifiedChunk) -> Vec<(&'static str, String)> {
    let mut missing: Vec<(&'static str, String)> = Vec::new();

    for member in cluster.members() {
        for (field, value, merged, threshold) in [
            ("company", &member.metadata.company, &unified.metadata.company, COMPANY_MATCH_THRESHOLD),
            ("location", &member.metadata.location, &unified.metadata.location, COMPANY_MATCH_THRESHOLD),
            ("job_title", &member.metadata.job_title, &unified.metadata.job_title, TITLE_MATCH_THRESHOLD),
        ] {
            let Some(value) = ChunkMetadata::known(value) else {
                continue;
            };
            let represented = merged
                .values()
                .iter()
                .filter_map(|m| ChunkMetadata::known(m))
                .any(|m| is_match(m, value, threshold));
            let seen = missing.iter().any(|(f, v)| *f == field && v.as_str() == value);
            if !represented && !seen {
                missing.push((field, value.to_string()));
            }
        }
    }

    missing
}

// ────────────────────────────────────────────────────────────────────────────
// RuleMerger
// ────────────────────────────────────────────────────────────────────────────

/// Deterministic merger. Keeps every distinct metadata value and every non-repeated sentence.
///
/// Algorithm:
/// 1. Split member narratives into sentences, drop near-identical restatements
/// 2. Concatenate in member order, capped at `MAX_SUMMARY_WORDS`
/// 3. company / location / job_title: fuzzy-equal values collapse to the longest, the
///    rest are kept side by side
/// 4. date_range: the most specific value; section_type: the most common
pub struct RuleMerger;

#[async_trait]
impl Merger for RuleMerger {
    async fn merge(&self, cluster: &Cluster) -> Result<UnifiedChunk, CapabilityError> {
        let unified = UnifiedChunk {
            embedding_text: merge_narratives(cluster.members()),
            metadata: reconcile_metadata(cluster.members()),
        };
        info!(
            "Rule-merged {} chunks into one ({} words)",
            cluster.len(),
            word_count(&unified.embedding_text)
        );
        validate_unified(unified)
    }

    fn name(&self) -> &'static str {
        "rule"
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(|c: char| matches!(c, '.' | '!' | '?'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Joins member narratives without repeating sentences, capped at `MAX_SUMMARY_WORDS`.
pub fn merge_narratives(members: &[Chunk]) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut kept_normalized: Vec<String> = Vec::new();

    for member in members {
        for sentence in split_sentences(&member.embedding_text) {
            let normalized = normalize(sentence);
            let repeated = kept_normalized
                .iter()
                .any(|k| similarity_ratio(k, &normalized) >= SENTENCE_DUPLICATE_RATIO);
            if !repeated {
                kept.push(sentence);
                kept_normalized.push(normalized);
            }
        }
    }

    let mut words: Vec<&str> = Vec::new();
    for sentence in kept {
        let sentence_words: Vec<&str> = sentence.split_whitespace().collect();
        if words.len() + sentence_words.len() > MAX_SUMMARY_WORDS {
            if words.is_empty() {
                words.extend(sentence_words.into_iter().take(MAX_SUMMARY_WORDS));
            }
            break;
        }
        words.extend(sentence_words);
    }

    words.join(" ")
}

/// Reconciles member metadata without dropping any distinct known value.
pub fn reconcile_metadata(members: &[Chunk]) -> UnifiedMetadata {
    UnifiedMetadata {
        section_type: most_common_section(members),
        date_range: MetadataValue::One(most_specific_date(
            members.iter().map(|c| c.metadata.date_range.as_str()),
        )),
        company: reconcile_values(
            members.iter().map(|c| c.metadata.company.as_str()),
            COMPANY_MATCH_THRESHOLD,
        ),
        location: reconcile_values(
            members.iter().map(|c| c.metadata.location.as_str()),
            COMPANY_MATCH_THRESHOLD,
        ),
        job_title: reconcile_values(
            members.iter().map(|c| c.metadata.job_title.as_str()),
            TITLE_MATCH_THRESHOLD,
        ),
    }
}

/// Fuzzy-equal values collapse to the longest spelling; distinct ones are all kept.
fn reconcile_values<'a>(values: impl Iterator<Item = &'a str>, threshold: f32) -> MetadataValue {
    let mut kept: Vec<String> = Vec::new();

    for value in values.filter_map(ChunkMetadata::known) {
        match kept.iter_mut().find(|k| is_match(k.as_str(), value, threshold)) {
            Some(existing) => {
                if value.len() > existing.len() {
                    *existing = value.to_string();
                }
            }
            None => kept.push(value.to_string()),
        }
    }

    MetadataValue::from_values(kept)
}

fn most_common_section(members: &[Chunk]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for member in members {
        *counts.entry(member.metadata.section_type.as_str()).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for member in members {
        let section = member.metadata.section_type.as_str();
        let count = counts.get(section).copied().unwrap_or(0);
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((section, count));
        }
    }

    best.map(|(s, _)| s.to_string())
        .unwrap_or_else(|| crate::models::DEFAULT_SECTION.to_string())
}

/// Picks the highest-scoring known date; among equal scores the first wins, so a date
/// that cannot be scored is still kept over the sentinel.
fn most_specific_date<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut best: Option<(&str, u32)> = None;
    for value in values.filter_map(ChunkMetadata::known) {
        let score = date_specificity(value);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((value, score));
        }
    }
    best.map(|(value, _)| value.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

const RANGE_SEPARATORS: &[&str] = &[" - ", " – ", " — ", " to ", "–", "—"];

/// Scores how precise a date range is: full dates beat month-year, which beats bare years.
pub fn date_specificity(range: &str) -> u32 {
    let Some(range) = ChunkMetadata::known(range) else {
        return 0;
    };

    if let Some(sep) = RANGE_SEPARATORS.iter().find(|sep| range.contains(*sep)) {
        return range.split(*sep).map(endpoint_specificity).sum();
    }

    // "2019-2021" / "2019-present": a bare hyphen only separates two scorable endpoints.
    if let Some((start, end)) = range.split_once('-') {
        if !end.contains('-') {
            let (start, end) = (endpoint_specificity(start), endpoint_specificity(end));
            if start > 0 && end > 0 {
                return start + end;
            }
        }
    }

    endpoint_specificity(range)
}

fn endpoint_specificity(part: &str) -> u32 {
    let part = part.trim().trim_end_matches(',');
    if part.is_empty() {
        return 0;
    }

    let full_date = ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"]
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(part, fmt).is_ok());
    if full_date {
        return 3;
    }

    let padded = format!("1 {part}");
    let month_year = ["%d %B %Y", "%d %b %Y"]
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(&padded, fmt).is_ok())
        || NaiveDate::parse_from_str(&format!("{part}-01"), "%Y-%m-%d").is_ok();
    if month_year {
        return 2;
    }

    let is_year = part.len() == 4 && part.chars().all(|c| c.is_ascii_digit());
    let is_open = ["present", "current", "now"]
        .iter()
        .any(|w| part.eq_ignore_ascii_case(w));
    if is_year || is_open {
        return 1;
    }

    0
}
