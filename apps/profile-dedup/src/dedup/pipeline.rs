//! Pipeline orchestration. Filters, clusters, arbitrates and merges one user's chunks.
//!
//! The valid and company-less partitions are processed concurrently and independently.
//! Merge calls from both partitions fan out under one shared semaphore; a failure costs
//! only the cluster it happened in.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::dedup::arbitration::{arbitrate, Arbiter};
use crate::dedup::cluster::{cluster_na_company, cluster_valid};
use crate::dedup::filter::{Partition, RuleFilter};
use crate::dedup::merge::Merger;
use crate::dedup::validation::{validate_chunks, RejectedRecord};
use crate::errors::FailureKind;
use crate::models::{Chunk, Cluster, Grouping, ProfileChunk, UnifiedChunk};

pub const DEFAULT_MERGE_CONCURRENCY: usize = 4;

/// When the semantic judge gets a look at the chunks the clusterer left apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationPolicy {
    #[default]
    Always,
    /// Only when the deterministic stage already found duplicates in the partition.
    WhenClustersFound,
    Never,
}

impl FromStr for ArbitrationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(ArbitrationPolicy::Always),
            "when_clusters_found" => Ok(ArbitrationPolicy::WhenClustersFound),
            "never" => Ok(ArbitrationPolicy::Never),
            other => Err(format!(
                "unknown arbitration policy '{other}' (expected always, when_clusters_found or never)"
            )),
        }
    }
}

impl fmt::Display for ArbitrationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArbitrationPolicy::Always => "always",
            ArbitrationPolicy::WhenClustersFound => "when_clusters_found",
            ArbitrationPolicy::Never => "never",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Upper bound on merge calls in flight across the whole run.
    pub merge_concurrency: usize,
    pub arbitration: ArbitrationPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            merge_concurrency: DEFAULT_MERGE_CONCURRENCY,
            arbitration: ArbitrationPolicy::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Report types
// ────────────────────────────────────────────────────────────────────────────

/// A whole stage that could not run for a partition. Its input went through unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub partition: Partition,
    pub stage: &'static str,
    pub kind: FailureKind,
    pub error: String,
}

/// A cluster whose merge failed. Members are handed back so the caller can retry just it.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterFailure {
    pub partition: Partition,
    pub cluster_index: usize,
    pub kind: FailureKind,
    pub error: String,
    pub members: Vec<Chunk>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub input: usize,
    /// Clusters found by the deterministic clusterer.
    pub clusters: usize,
    /// Additional clusters confirmed by arbitration.
    pub arbitration_clusters: usize,
    pub merged: usize,
    pub failed_merges: usize,
    pub passthrough: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub input: usize,
    pub rejected: usize,
    pub excluded: usize,
    pub valid: PartitionStats,
    pub na_company: PartitionStats,
    pub output: usize,
}

/// Everything a run produced: the final profile plus what was left out and why.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupReport {
    /// Valid partition first, then company-less; merged records before pass-through chunks.
    pub chunks: Vec<ProfileChunk>,
    pub excluded: Vec<Chunk>,
    pub rejected: Vec<RejectedRecord>,
    pub stage_failures: Vec<StageFailure>,
    pub cluster_failures: Vec<ClusterFailure>,
    pub stats: DedupStats,
}

impl DedupReport {
    /// True when no stage and no cluster failed. Rejected input records do not count.
    pub fn is_complete(&self) -> bool {
        self.stage_failures.is_empty() && self.cluster_failures.is_empty()
    }
}

struct PartitionResult {
    chunks: Vec<ProfileChunk>,
    stage_failures: Vec<StageFailure>,
    cluster_failures: Vec<ClusterFailure>,
    stats: PartitionStats,
}

// ────────────────────────────────────────────────────────────────────────────
// DedupPipeline
// ────────────────────────────────────────────────────────────────────────────

pub struct DedupPipeline {
    arbiter: Arc<dyn Arbiter>,
    merger: Arc<dyn Merger>,
    filter: RuleFilter,
    options: PipelineOptions,
}

impl DedupPipeline {
    pub fn new(arbiter: Arc<dyn Arbiter>, merger: Arc<dyn Merger>, options: PipelineOptions) -> Self {
        Self {
            arbiter,
            merger,
            filter: RuleFilter::default(),
            options,
        }
    }

    /// Replaces the default exclusion rules.
    pub fn with_filter(mut self, filter: RuleFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Validates raw upstream records, then runs the pipeline over the ones that passed.
    pub async fn run_raw(&self, records: Vec<Value>) -> DedupReport {
        let validated = validate_chunks(records);
        if !validated.rejected.is_empty() {
            warn!("{} input records rejected", validated.rejected.len());
        }

        let mut report = self.run(validated.chunks).await;
        report.stats.rejected = validated.rejected.len();
        report.rejected = validated.rejected;
        report
    }

    pub async fn run(&self, chunks: Vec<Chunk>) -> DedupReport {
        let input = chunks.len();
        info!(
            "Deduplicating {} chunks (arbiter: {}, merger: {}, arbitration: {})",
            input,
            self.arbiter.name(),
            self.merger.name(),
            self.options.arbitration
        );

        let filtered = self.filter.filter(chunks);
        let merge_permits = Arc::new(Semaphore::new(self.options.merge_concurrency.max(1)));

        let (valid, na_company) = tokio::join!(
            self.process_partition(Partition::Valid, filtered.valid, cluster_valid, &merge_permits),
            self.process_partition(
                Partition::NaCompany,
                filtered.na_company,
                cluster_na_company,
                &merge_permits
            ),
        );

        let stats = DedupStats {
            input,
            rejected: 0,
            excluded: filtered.excluded.len(),
            valid: valid.stats,
            na_company: na_company.stats,
            output: valid.chunks.len() + na_company.chunks.len(),
        };

        let mut report = DedupReport {
            chunks: valid.chunks,
            excluded: filtered.excluded,
            rejected: Vec::new(),
            stage_failures: valid.stage_failures,
            cluster_failures: valid.cluster_failures,
            stats,
        };
        report.chunks.extend(na_company.chunks);
        report.stage_failures.extend(na_company.stage_failures);
        report.cluster_failures.extend(na_company.cluster_failures);

        info!(
            "Dedup finished: {} chunks in, {} out, {} excluded, {} failed merges",
            input,
            report.stats.output,
            report.stats.excluded,
            report.cluster_failures.len()
        );
        report
    }

    fn should_arbitrate(&self, clusters_found: usize) -> bool {
        match self.options.arbitration {
            ArbitrationPolicy::Always => true,
            ArbitrationPolicy::WhenClustersFound => clusters_found > 0,
            ArbitrationPolicy::Never => false,
        }
    }

    async fn process_partition(
        &self,
        partition: Partition,
        chunks: Vec<Chunk>,
        cluster: fn(Vec<Chunk>) -> Grouping,
        merge_permits: &Arc<Semaphore>,
    ) -> PartitionResult {
        let mut stats = PartitionStats {
            input: chunks.len(),
            ..PartitionStats::default()
        };
        let mut stage_failures = Vec::new();

        let Grouping {
            similar: mut clusters,
            unsimilar,
        } = cluster(chunks);
        stats.clusters = clusters.len();
        info!(
            "{:?}: {} clusters, {} unsimilar chunks after clustering",
            partition,
            clusters.len(),
            unsimilar.len()
        );

        let unsimilar = if self.should_arbitrate(clusters.len()) {
            match arbitrate(self.arbiter.as_ref(), unsimilar).await {
                Ok(grouping) => {
                    stats.arbitration_clusters = grouping.similar.len();
                    clusters.extend(grouping.similar);
                    grouping.unsimilar
                }
                Err(failure) => {
                    warn!(
                        "{:?}: arbitration failed, keeping deterministic grouping: {}",
                        partition, failure.error
                    );
                    stage_failures.push(StageFailure {
                        partition,
                        stage: "arbitration",
                        kind: failure.error.kind(),
                        error: failure.error.to_string(),
                    });
                    failure.chunks
                }
            }
        } else {
            unsimilar
        };

        let (merged, cluster_failures) = self.merge_clusters(partition, clusters, merge_permits).await;
        stats.merged = merged.len();
        stats.failed_merges = cluster_failures.len();
        stats.passthrough = unsimilar.len();

        let mut chunks: Vec<ProfileChunk> = merged.into_iter().map(ProfileChunk::Unified).collect();
        chunks.extend(unsimilar.into_iter().map(ProfileChunk::Passthrough));

        PartitionResult {
            chunks,
            stage_failures,
            cluster_failures,
            stats,
        }
    }

    /// Merges every cluster, each call holding one of the run's `merge_permits`.
    ///
    /// Results come back in cluster order regardless of completion order.
    async fn merge_clusters(
        &self,
        partition: Partition,
        clusters: Vec<Cluster>,
        merge_permits: &Arc<Semaphore>,
    ) -> (Vec<UnifiedChunk>, Vec<ClusterFailure>) {
        if clusters.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let clusters: Vec<Arc<Cluster>> = clusters.into_iter().map(Arc::new).collect();

        let handles: Vec<_> = clusters
            .iter()
            .map(|cluster| {
                let semaphore = Arc::clone(merge_permits);
                let merger = Arc::clone(&self.merger);
                let cluster = Arc::clone(cluster);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await;
                    merger.merge(&cluster).await
                })
            })
            .collect();

        let mut merged = Vec::with_capacity(clusters.len());
        let mut failures = Vec::new();

        for (index, (cluster, handle)) in clusters.into_iter().zip(handles).enumerate() {
            let (kind, message) = match handle.await {
                Ok(Ok(unified)) => {
                    merged.push(unified);
                    continue;
                }
                Ok(Err(e)) => (e.kind(), e.to_string()),
                Err(join_error) => (FailureKind::Internal, join_error.to_string()),
            };

            error!(
                "{:?}: merge of cluster {} ({} chunks) failed: {}",
                partition,
                index,
                cluster.len(),
                message
            );
            let members = Arc::try_unwrap(cluster)
                .map(Cluster::into_members)
                .unwrap_or_else(|shared| shared.members().to_vec());
            failures.push(ClusterFailure {
                partition,
                cluster_index: index,
                kind,
                error: message,
                members,
            });
        }

        info!(
            "{:?}: merged {} clusters, {} failed",
            partition,
            merged.len(),
            failures.len()
        );
        (merged, failures)
    }
}
