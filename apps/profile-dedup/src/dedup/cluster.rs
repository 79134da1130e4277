//! Deterministic Clusterer — groups chunks that likely describe the same experience.
//!
//! Valid chunks: section → fuzzy company → fuzzy job title (Education skips the title step).
//! Company-less chunks: section → exact job title.
//!
//! Fuzzy grouping is seed-based and single pass: each unassigned chunk seeds a group and
//! pulls in every *later* unassigned chunk that matches the seed. A chunk that matches a
//! non-seed member but not the seed stays out. Output depends on input order.

use std::collections::HashMap;

use tracing::debug;

use crate::dedup::similarity::{is_match, COMPANY_MATCH_THRESHOLD, TITLE_MATCH_THRESHOLD};
use crate::models::{Chunk, ChunkMetadata, Grouping};

/// Section whose company clusters are merged without splitting by degree / title.
pub const EDUCATION_SECTION: &str = "Education";

/// Result of one seed's scan.
enum Seeded {
    /// The seed has no usable key and cannot group with anything.
    Keyless(Chunk),
    Group(Vec<Chunk>),
}

/// Splits chunks by exact `section_type`, preserving first-appearance order.
fn group_by_section(chunks: Vec<Chunk>) -> Vec<(String, Vec<Chunk>)> {
    let mut sections: Vec<(String, Vec<Chunk>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for chunk in chunks {
        let section = chunk.metadata.section_type.clone();
        match index.get(&section) {
            Some(&i) => sections[i].1.push(chunk),
            None => {
                index.insert(section.clone(), sections.len());
                sections.push((section, vec![chunk]));
            }
        }
    }

    sections
}

fn seed_scan<K>(chunks: Vec<Chunk>, key: K, threshold: f32) -> Vec<Seeded>
where
    K: Fn(&Chunk) -> Option<&str>,
{
    let mut slots: Vec<Option<Chunk>> = chunks.into_iter().map(Some).collect();
    let mut seeded = Vec::new();

    for i in 0..slots.len() {
        let Some(seed) = slots[i].take() else {
            continue;
        };
        let Some(seed_key) = key(&seed).map(str::to_owned) else {
            seeded.push(Seeded::Keyless(seed));
            continue;
        };

        let mut group = vec![seed];
        for slot in slots.iter_mut().skip(i + 1) {
            let joins = slot
                .as_ref()
                .and_then(|candidate| key(candidate))
                .is_some_and(|candidate_key| is_match(&seed_key, candidate_key, threshold));
            if joins {
                if let Some(candidate) = slot.take() {
                    group.push(candidate);
                }
            }
        }
        seeded.push(Seeded::Group(group));
    }

    seeded
}

fn company_key(chunk: &Chunk) -> Option<&str> {
    chunk.metadata.company()
}

fn title_key(chunk: &Chunk) -> Option<&str> {
    chunk.metadata.job_title()
}

/// Clusters chunks that carry a real company.
pub fn cluster_valid(chunks: Vec<Chunk>) -> Grouping {
    let mut grouping = Grouping::default();

    for (section, section_chunks) in group_by_section(chunks) {
        for company_group in seed_scan(section_chunks, company_key, COMPANY_MATCH_THRESHOLD) {
            let company_group = match company_group {
                Seeded::Keyless(chunk) => {
                    grouping.unsimilar.push(chunk);
                    continue;
                }
                Seeded::Group(group) if group.len() < 2 => {
                    grouping.unsimilar.extend(group);
                    continue;
                }
                Seeded::Group(group) => group,
            };

            if section == EDUCATION_SECTION {
                debug!(
                    "education cluster of {} at {}",
                    company_group.len(),
                    company_group[0].metadata.company
                );
                grouping.push_group(company_group);
                continue;
            }

            for title_group in seed_scan(company_group, title_key, TITLE_MATCH_THRESHOLD) {
                match title_group {
                    Seeded::Keyless(chunk) => grouping.unsimilar.push(chunk),
                    Seeded::Group(group) => grouping.push_group(group),
                }
            }
        }
    }

    debug!(
        "valid partition: {} clusters, {} singles",
        grouping.similar.len(),
        grouping.unsimilar.len()
    );
    grouping
}

/// Clusters chunks without a company: same section and identical job title only.
pub fn cluster_na_company(chunks: Vec<Chunk>) -> Grouping {
    let mut grouping = Grouping::default();

    for (_, section_chunks) in group_by_section(chunks) {
        let mut buckets: Vec<(String, Vec<Chunk>)> = Vec::new();

        for chunk in section_chunks {
            let Some(title) = ChunkMetadata::known(&chunk.metadata.job_title).map(str::to_owned)
            else {
                grouping.unsimilar.push(chunk);
                continue;
            };
            match buckets.iter_mut().find(|(t, _)| *t == title) {
                Some((_, bucket)) => bucket.push(chunk),
                None => buckets.push((title, vec![chunk])),
            }
        }

        for (_, bucket) in buckets {
            grouping.push_group(bucket);
        }
    }

    debug!(
        "company-less partition: {} clusters, {} singles",
        grouping.similar.len(),
        grouping.unsimilar.len()
    );
    grouping
}
