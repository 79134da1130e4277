// Dedup — collapses the chunks from a user's resume and LinkedIn into one non-redundant profile.
//
// Stages, in order:
// 1. `validation`: raw JSON records → `Chunk`s, bad records rejected individually
// 2. `filter`: valid / company-less / excluded partitions
// 3. `cluster`: deterministic fuzzy grouping per partition (`similarity` underneath)
// 4. `arbitration`: semantic second look at the chunks left unclustered
// 5. `merge`: one unified record per cluster
//
// `pipeline::DedupPipeline` wires them together. Stages 1-3 are pure; 4 and 5 go through
// the `Arbiter` / `Merger` traits so tests and offline runs can swap the LLM out.
pub mod arbitration;
pub mod cluster;
pub mod filter;
pub mod merge;
pub mod pipeline;
pub mod prompts;
pub mod similarity;
pub mod validation;

pub use arbitration::{Arbiter, LlmArbiter, NoopArbiter};
pub use filter::{filter_chunks, FilteredChunks, Partition, RuleFilter};
pub use merge::{LlmMerger, Merger, RuleMerger};
pub use pipeline::{
    ArbitrationPolicy, ClusterFailure, DedupPipeline, DedupReport, DedupStats, PipelineOptions,
    StageFailure,
};
