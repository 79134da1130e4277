//! Arbitration Stage — a semantic second look at chunks the deterministic clusterer kept apart.
//!
//! The judge behind [`Arbiter`] is treated as imprecise. [`arbitrate`] normalises whatever it
//! returns so the result is still a lossless partition of the input: unknown chunks are
//! dropped, repeats keep their first placement, singleton groups are flattened and anything
//! the judge forgot lands back in `unsimilar`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dedup::prompts::{ARBITRATION_PROMPT, ARBITRATION_SYSTEM};
use crate::errors::CapabilityError;
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::LlmClient;
use crate::models::{Chunk, ChunkMetadata, Cluster, Grouping};

/// Raw verdict of a judge, before normalisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArbitrationOutcome {
    #[serde(default)]
    pub similar: Vec<Vec<Chunk>>,
    #[serde(default)]
    pub unsimilar: Vec<Chunk>,
}

/// Semantic duplicate judge. Carried by the pipeline as `Arc<dyn Arbiter>`.
#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn arbitrate(&self, chunks: &[Chunk]) -> Result<ArbitrationOutcome, CapabilityError>;

    fn name(&self) -> &'static str;
}

/// Judge that never finds duplicates; every chunk stays unsimilar.
pub struct NoopArbiter;

#[async_trait]
impl Arbiter for NoopArbiter {
    async fn arbitrate(&self, chunks: &[Chunk]) -> Result<ArbitrationOutcome, CapabilityError> {
        Ok(ArbitrationOutcome {
            similar: Vec::new(),
            unsimilar: chunks.to_vec(),
        })
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Judge backed by the LLM with a strict "same position only" rubric.
///
/// The model sees chunk ids and answers with ids, so it never has to echo chunk text back.
pub struct LlmArbiter {
    llm: LlmClient,
}

impl LlmArbiter {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[derive(Debug, Serialize)]
struct ArbitrationEntry<'a> {
    id: &'a str,
    embedding_text: &'a str,
    metadata: &'a ChunkMetadata,
}

#[derive(Debug, Deserialize)]
struct ArbitrationResponse {
    #[serde(default)]
    similar: Vec<Vec<String>>,
    #[serde(default)]
    unsimilar: Vec<String>,
}

#[async_trait]
impl Arbiter for LlmArbiter {
    async fn arbitrate(&self, chunks: &[Chunk]) -> Result<ArbitrationOutcome, CapabilityError> {
        let entries: Vec<ArbitrationEntry<'_>> = chunks
            .iter()
            .map(|c| ArbitrationEntry {
                id: &c.chunk_id,
                embedding_text: &c.embedding_text,
                metadata: &c.metadata,
            })
            .collect();
        let entries_json = serde_json::to_string_pretty(&entries)
            .map_err(|e| CapabilityError::Encode(e.to_string()))?;

        let prompt = ARBITRATION_PROMPT.replace("{entries_json}", &entries_json);
        let system = format!("{ARBITRATION_SYSTEM} {JSON_ONLY_SYSTEM}");
        let response: ArbitrationResponse = self.llm.call_json(&prompt, &system).await?;

        let by_id: HashMap<&str, &Chunk> =
            chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();
        let lookup = |ids: &[String]| -> Vec<Chunk> {
            ids.iter()
                .filter_map(|id| {
                    let found = by_id.get(id.as_str()).map(|c| (*c).clone());
                    if found.is_none() {
                        warn!("Arbiter referenced unknown chunk id {id}");
                    }
                    found
                })
                .collect()
        };

        Ok(ArbitrationOutcome {
            similar: response.similar.iter().map(|ids| lookup(ids)).collect(),
            unsimilar: lookup(&response.unsimilar),
        })
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Arbitration could not run; the chunks are handed back untouched.
#[derive(Debug)]
pub struct ArbitrationFailure {
    pub error: CapabilityError,
    pub chunks: Vec<Chunk>,
}

/// Runs the judge over `chunks` and normalises its verdict.
///
/// With fewer than two chunks there is nothing to pair and the judge is not called.
pub async fn arbitrate(
    arbiter: &dyn Arbiter,
    chunks: Vec<Chunk>,
) -> Result<Grouping, ArbitrationFailure> {
    if chunks.len() < 2 {
        return Ok(Grouping {
            similar: Vec::new(),
            unsimilar: chunks,
        });
    }

    info!(
        "Arbitrating {} unsimilar chunks with the {} arbiter",
        chunks.len(),
        arbiter.name()
    );

    match arbiter.arbitrate(&chunks).await {
        Ok(outcome) => {
            let grouping = normalize_outcome(chunks, outcome);
            info!(
                "After arbitration: {} new clusters, {} unsimilar chunks",
                grouping.similar.len(),
                grouping.unsimilar.len()
            );
            Ok(grouping)
        }
        Err(error) => Err(ArbitrationFailure { error, chunks }),
    }
}

/// Input chunks indexed by id; each slot can be claimed once.
struct ChunkPool {
    slots: Vec<Option<Chunk>>,
    by_id: HashMap<String, Vec<usize>>,
}

impl ChunkPool {
    fn new(chunks: Vec<Chunk>) -> Self {
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, chunk) in chunks.iter().enumerate() {
            by_id.entry(chunk.chunk_id.clone()).or_default().push(i);
        }
        Self {
            slots: chunks.into_iter().map(Some).collect(),
            by_id,
        }
    }

    fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    fn claim(&mut self, id: &str) -> Option<(usize, Chunk)> {
        let indices = self.by_id.get(id)?;
        let index = indices
            .iter()
            .copied()
            .find(|&i| self.slots[i].is_some())?;
        self.slots[index].take().map(|chunk| (index, chunk))
    }

    fn restore(&mut self, index: usize, chunk: Chunk) {
        self.slots[index] = Some(chunk);
    }

    fn into_remaining(self) -> Vec<Chunk> {
        self.slots.into_iter().flatten().collect()
    }
}

/// Turns a judge's verdict into a lossless [`Grouping`] over `input`.
///
/// Cluster members are the input chunks themselves, never the judge's copies, and the
/// resulting `unsimilar` keeps input order.
pub fn normalize_outcome(input: Vec<Chunk>, outcome: ArbitrationOutcome) -> Grouping {
    let mut pool = ChunkPool::new(input);
    let mut grouping = Grouping::default();
    let mut unknown = 0usize;
    let mut repeated = 0usize;
    let mut flattened = 0usize;

    for group in outcome.similar {
        let mut claimed: Vec<(usize, Chunk)> = Vec::with_capacity(group.len());
        for member in &group {
            if !pool.contains_id(&member.chunk_id) {
                unknown += 1;
                continue;
            }
            match pool.claim(&member.chunk_id) {
                Some(entry) => claimed.push(entry),
                None => repeated += 1,
            }
        }

        if claimed.len() < 2 {
            flattened += 1;
            for (index, chunk) in claimed {
                pool.restore(index, chunk);
            }
            continue;
        }

        let members: Vec<Chunk> = claimed.into_iter().map(|(_, chunk)| chunk).collect();
        if let Ok(cluster) = Cluster::new(members) {
            grouping.similar.push(cluster);
        }
    }

    unknown += outcome
        .unsimilar
        .iter()
        .filter(|c| !pool.contains_id(&c.chunk_id))
        .count();

    grouping.unsimilar = pool.into_remaining();

    if unknown + repeated + flattened > 0 {
        warn!(
            "Normalized arbitration verdict: {} unknown chunks dropped, {} repeats ignored, {} undersized groups flattened",
            unknown, repeated, flattened
        );
    }

    grouping
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            embedding_text: format!("Narrative for {id}"),
            metadata: ChunkMetadata::default(),
        }
    }

    fn chunks(ids: &[&str]) -> Vec<Chunk> {
        ids.iter().map(|id| chunk(id)).collect()
    }

    fn cluster_ids(grouping: &Grouping) -> Vec<Vec<&str>> {
        grouping
            .similar
            .iter()
            .map(|c| c.members().iter().map(|m| m.chunk_id.as_str()).collect())
            .collect()
    }

    fn single_ids(grouping: &Grouping) -> Vec<&str> {
        grouping.unsimilar.iter().map(|c| c.chunk_id.as_str()).collect()
    }

    /// Returns a canned verdict regardless of input.
    struct ScriptedArbiter(ArbitrationOutcome);

    #[async_trait]
    impl Arbiter for ScriptedArbiter {
        async fn arbitrate(&self, _chunks: &[Chunk]) -> Result<ArbitrationOutcome, CapabilityError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct FailingArbiter;

    #[async_trait]
    impl Arbiter for FailingArbiter {
        async fn arbitrate(&self, _chunks: &[Chunk]) -> Result<ArbitrationOutcome, CapabilityError> {
            Err(CapabilityError::Malformed("expected object".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_well_formed_verdict_is_kept() {
        let outcome = ArbitrationOutcome {
            similar: vec![chunks(&["a", "c"])],
            unsimilar: chunks(&["b", "d"]),
        };
        let grouping = normalize_outcome(chunks(&["a", "b", "c", "d"]), outcome);
        assert_eq!(cluster_ids(&grouping), vec![vec!["a", "c"]]);
        assert_eq!(single_ids(&grouping), vec!["b", "d"]);
    }

    #[test]
    fn test_singleton_group_is_flattened() {
        let outcome = ArbitrationOutcome {
            similar: vec![chunks(&["b"]), chunks(&["a", "c"])],
            unsimilar: chunks(&["d"]),
        };
        let grouping = normalize_outcome(chunks(&["a", "b", "c", "d"]), outcome);
        assert_eq!(cluster_ids(&grouping), vec![vec!["a", "c"]]);
        assert_eq!(single_ids(&grouping), vec!["b", "d"]);
    }

    #[test]
    fn test_unknown_chunks_are_dropped() {
        let outcome = ArbitrationOutcome {
            similar: vec![chunks(&["a", "ghost"])],
            unsimilar: chunks(&["b", "phantom"]),
        };
        let grouping = normalize_outcome(chunks(&["a", "b"]), outcome);
        assert!(grouping.similar.is_empty());
        assert_eq!(single_ids(&grouping), vec!["a", "b"]);
    }

    #[test]
    fn test_repeated_chunk_keeps_first_placement() {
        let outcome = ArbitrationOutcome {
            similar: vec![chunks(&["a", "b"]), chunks(&["b", "c"])],
            unsimilar: Vec::new(),
        };
        let grouping = normalize_outcome(chunks(&["a", "b", "c"]), outcome);
        assert_eq!(cluster_ids(&grouping), vec![vec!["a", "b"]]);
        assert_eq!(single_ids(&grouping), vec!["c"]);
    }

    #[test]
    fn test_omitted_chunks_return_to_unsimilar() {
        let outcome = ArbitrationOutcome::default();
        let grouping = normalize_outcome(chunks(&["a", "b", "c"]), outcome);
        assert!(grouping.similar.is_empty());
        assert_eq!(single_ids(&grouping), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_input_ids_stay_lossless() {
        let outcome = ArbitrationOutcome {
            similar: vec![chunks(&["a", "a"])],
            unsimilar: Vec::new(),
        };
        let grouping = normalize_outcome(chunks(&["a", "a", "b"]), outcome);
        assert_eq!(grouping.chunk_count(), 3);
        assert_eq!(cluster_ids(&grouping), vec![vec!["a", "a"]]);
    }

    #[test]
    fn test_judge_copies_are_not_trusted() {
        let mut rewritten = chunk("a");
        rewritten.embedding_text = "Rewritten by the judge".to_string();
        let outcome = ArbitrationOutcome {
            similar: vec![vec![rewritten, chunk("b")]],
            unsimilar: Vec::new(),
        };
        let grouping = normalize_outcome(chunks(&["a", "b"]), outcome);
        assert_eq!(grouping.similar[0].members()[0].embedding_text, "Narrative for a");
    }

    #[tokio::test]
    async fn test_arbitrate_skips_judge_for_single_chunk() {
        let grouping = arbitrate(&FailingArbiter, chunks(&["a"])).await.unwrap();
        assert_eq!(single_ids(&grouping), vec!["a"]);
    }

    #[tokio::test]
    async fn test_arbitrate_returns_chunks_on_failure() {
        let failure = arbitrate(&FailingArbiter, chunks(&["a", "b"])).await.unwrap_err();
        assert!(matches!(failure.error, CapabilityError::Malformed(_)));
        assert_eq!(failure.chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_arbitrate_normalizes_scripted_verdict() {
        let arbiter = ScriptedArbiter(ArbitrationOutcome {
            similar: vec![chunks(&["c"]), chunks(&["a", "b"])],
            unsimilar: Vec::new(),
        });
        let grouping = arbitrate(&arbiter, chunks(&["a", "b", "c"])).await.unwrap();
        assert_eq!(cluster_ids(&grouping), vec![vec!["a", "b"]]);
        assert_eq!(single_ids(&grouping), vec!["c"]);
    }

    #[tokio::test]
    async fn test_noop_arbiter_keeps_everything_unsimilar() {
        let grouping = arbitrate(&NoopArbiter, chunks(&["a", "b", "c"])).await.unwrap();
        assert!(grouping.similar.is_empty());
        assert_eq!(single_ids(&grouping), vec!["a", "b", "c"]);
    }
}
