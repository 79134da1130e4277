//! Rule-based partitioning of raw chunks into valid, company-less and excluded sets.
//!
//! Rules are evaluated in order and the first one that applies decides the partition.
//! Chunks no rule claims are `Valid`.

use serde::Serialize;
use tracing::{debug, info};

use crate::models::{Chunk, ChunkMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Valid,
    NaCompany,
    Excluded,
}

/// A named predicate routing matching chunks to a partition.
#[derive(Debug, Clone, Copy)]
pub struct PartitionRule {
    pub name: &'static str,
    pub partition: Partition,
    pub applies: fn(&ChunkMetadata) -> bool,
}

fn section_contains(metadata: &ChunkMetadata, needle: &str) -> bool {
    metadata.section_type.to_lowercase().contains(needle)
}

fn is_skills_section(metadata: &ChunkMetadata) -> bool {
    section_contains(metadata, "skills")
}

fn is_about_section(metadata: &ChunkMetadata) -> bool {
    section_contains(metadata, "about")
}

fn has_no_company(metadata: &ChunkMetadata) -> bool {
    metadata.company().is_none()
}

/// Noise sections first, then the company check.
pub const DEFAULT_RULES: &[PartitionRule] = &[
    PartitionRule {
        name: "skills_section",
        partition: Partition::Excluded,
        applies: is_skills_section,
    },
    PartitionRule {
        name: "about_section",
        partition: Partition::Excluded,
        applies: is_about_section,
    },
    PartitionRule {
        name: "missing_company",
        partition: Partition::NaCompany,
        applies: has_no_company,
    },
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct FilteredChunks {
    pub valid: Vec<Chunk>,
    pub na_company: Vec<Chunk>,
    /// Kept for audit only; never clustered or merged.
    pub excluded: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct RuleFilter {
    rules: Vec<PartitionRule>,
}

impl Default for RuleFilter {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
        }
    }
}

impl RuleFilter {
    pub fn new(rules: Vec<PartitionRule>) -> Self {
        Self { rules }
    }

    /// Appends a rule evaluated after the existing ones.
    pub fn with_rule(mut self, rule: PartitionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn classify(&self, chunk: &Chunk) -> Partition {
        match self.rules.iter().find(|rule| (rule.applies)(&chunk.metadata)) {
            Some(rule) => {
                debug!(
                    "chunk {} -> {:?} (rule {})",
                    chunk.chunk_id, rule.partition, rule.name
                );
                rule.partition
            }
            None => Partition::Valid,
        }
    }

    pub fn filter(&self, chunks: Vec<Chunk>) -> FilteredChunks {
        let mut filtered = FilteredChunks::default();

        for chunk in chunks {
            match self.classify(&chunk) {
                Partition::Valid => filtered.valid.push(chunk),
                Partition::NaCompany => filtered.na_company.push(chunk),
                Partition::Excluded => filtered.excluded.push(chunk),
            }
        }

        info!(
            "Filtered chunks: {} valid, {} without company, {} excluded",
            filtered.valid.len(),
            filtered.na_company.len(),
            filtered.excluded.len()
        );
        filtered
    }
}

/// Partitions chunks with the default rules.
pub fn filter_chunks(chunks: Vec<Chunk>) -> FilteredChunks {
    RuleFilter::default().filter(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, section: &str, company: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            embedding_text: format!("Narrative for {id}"),
            metadata: ChunkMetadata {
                section_type: section.to_string(),
                company: company.to_string(),
                ..ChunkMetadata::default()
            },
        }
    }

    fn ids(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_technical_skills_is_excluded() {
        let filtered = filter_chunks(vec![chunk("a", "Technical Skills", "Acme")]);
        assert_eq!(ids(&filtered.excluded), vec!["a"]);
        assert!(filtered.valid.is_empty());
        assert!(filtered.na_company.is_empty());
    }

    #[test]
    fn test_about_section_is_excluded_case_insensitive() {
        let filtered = filter_chunks(vec![chunk("a", "ABOUT ME", "N/A")]);
        assert_eq!(ids(&filtered.excluded), vec!["a"]);
    }

    #[test]
    fn test_exclusion_wins_over_missing_company() {
        let filtered = filter_chunks(vec![chunk("a", "Skills", "")]);
        assert_eq!(filtered.excluded.len(), 1);
        assert!(filtered.na_company.is_empty());
    }

    #[test]
    fn test_missing_company_variants() {
        let filtered = filter_chunks(vec![
            chunk("a", "Volunteering", ""),
            chunk("b", "Volunteering", "n/a"),
            chunk("c", "Volunteering", "  N/A "),
            chunk("d", "Experience", "Acme"),
        ]);
        assert_eq!(ids(&filtered.na_company), vec!["a", "b", "c"]);
        assert_eq!(ids(&filtered.valid), vec!["d"]);
    }

    #[test]
    fn test_empty_input() {
        let filtered = filter_chunks(Vec::new());
        assert!(filtered.valid.is_empty());
        assert!(filtered.na_company.is_empty());
        assert!(filtered.excluded.is_empty());
    }

    #[test]
    fn test_partition_is_total_and_exclusive() {
        let input = vec![
            chunk("a", "Experience", "Acme"),
            chunk("b", "Skills", "Acme"),
            chunk("c", "Projects", "N/A"),
            chunk("d", "About", ""),
            chunk("e", "Education", "University of Alberta"),
        ];
        let filtered = filter_chunks(input.clone());
        let mut all: Vec<&str> = ids(&filtered.valid);
        all.extend(ids(&filtered.na_company));
        all.extend(ids(&filtered.excluded));
        all.sort_unstable();
        assert_eq!(all, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_refiltering_valid_is_idempotent() {
        let input = vec![
            chunk("a", "Experience", "Acme"),
            chunk("b", "Skills", "Acme"),
            chunk("c", "Projects", "N/A"),
            chunk("d", "Education", "MIT"),
        ];
        let first = filter_chunks(input);
        let second = filter_chunks(first.valid.clone());
        assert_eq!(second.valid, first.valid);
        assert!(second.na_company.is_empty());
        assert!(second.excluded.is_empty());
    }

    #[test]
    fn test_custom_rule_runs_after_defaults() {
        fn is_references(metadata: &ChunkMetadata) -> bool {
            metadata.section_type.eq_ignore_ascii_case("references")
        }
        let filter = RuleFilter::default().with_rule(PartitionRule {
            name: "references_section",
            partition: Partition::Excluded,
            applies: is_references,
        });
        let filtered = filter.filter(vec![
            chunk("a", "References", "Acme"),
            chunk("b", "Experience", "Acme"),
        ]);
        assert_eq!(ids(&filtered.excluded), vec!["a"]);
        assert_eq!(ids(&filtered.valid), vec!["b"]);
    }
}
