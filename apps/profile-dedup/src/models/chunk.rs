use serde::{Deserialize, Serialize};

/// Sentinel for a metadata value the chunk producer could not determine.
pub const UNKNOWN: &str = "N/A";

/// Section assigned to chunks whose producer left `section_type` empty.
pub const DEFAULT_SECTION: &str = "Other";

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn default_section() -> String {
    DEFAULT_SECTION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default = "default_section")]
    pub section_type: String,
    #[serde(default = "unknown")]
    pub date_range: String,
    #[serde(default = "unknown")]
    pub company: String,
    #[serde(default = "unknown")]
    pub location: String,
    #[serde(default = "unknown")]
    pub job_title: String,
}

impl ChunkMetadata {
    /// Returns the trimmed value unless it is blank or the `N/A` sentinel.
    pub fn known(value: &str) -> Option<&str> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case(UNKNOWN) {
            None
        } else {
            Some(value)
        }
    }

    pub fn company(&self) -> Option<&str> {
        Self::known(&self.company)
    }

    pub fn job_title(&self) -> Option<&str> {
        Self::known(&self.job_title)
    }
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            section_type: default_section(),
            date_range: unknown(),
            company: unknown(),
            location: unknown(),
            job_title: unknown(),
        }
    }
}

/// One atomic career record produced by the resume / LinkedIn chunkers.
///
/// `chunk_id` is bookkeeping only: unique within a run, never part of a merged record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub embedding_text: String,
    pub metadata: ChunkMetadata,
}

/// Two or more chunks judged to describe the same real-world experience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Cluster(Vec<Chunk>);

impl Cluster {
    /// Builds a cluster, handing the members back when there are fewer than two.
    pub fn new(members: Vec<Chunk>) -> Result<Self, Vec<Chunk>> {
        if members.len() < 2 {
            Err(members)
        } else {
            Ok(Self(members))
        }
    }

    pub fn members(&self) -> &[Chunk] {
        &self.0
    }

    pub fn into_members(self) -> Vec<Chunk> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Working result of a clustering stage for one partition.
///
/// Every chunk handed to the stage ends up in exactly one cluster or once in `unsimilar`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grouping {
    pub similar: Vec<Cluster>,
    pub unsimilar: Vec<Chunk>,
}

impl Grouping {
    /// Records a candidate group; groups of fewer than two land in `unsimilar`.
    pub fn push_group(&mut self, members: Vec<Chunk>) {
        match Cluster::new(members) {
            Ok(cluster) => self.similar.push(cluster),
            Err(singles) => self.unsimilar.extend(singles),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.similar.iter().map(Cluster::len).sum::<usize>() + self.unsimilar.len()
    }
}

/// A metadata field of a merged record: one value, or every value the members disagreed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    One(String),
    Many(Vec<String>),
}

impl MetadataValue {
    /// Collapses a list of distinct values; an empty list becomes the `N/A` sentinel.
    pub fn from_values(mut values: Vec<String>) -> Self {
        match values.len() {
            0 => MetadataValue::One(unknown()),
            1 => MetadataValue::One(values.remove(0)),
            _ => MetadataValue::Many(values),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            MetadataValue::One(v) => vec![v.as_str()],
            MetadataValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.values().iter().all(|v| v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedMetadata {
    pub section_type: String,
    pub date_range: MetadataValue,
    pub company: MetadataValue,
    pub location: MetadataValue,
    pub job_title: MetadataValue,
}

/// The single record that replaces a merged cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedChunk {
    pub embedding_text: String,
    pub metadata: UnifiedMetadata,
}

/// An element of the final profile handed to the embedding stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProfileChunk {
    Unified(UnifiedChunk),
    Passthrough(Chunk),
}

impl ProfileChunk {
    pub fn embedding_text(&self) -> &str {
        match self {
            ProfileChunk::Unified(c) => &c.embedding_text,
            ProfileChunk::Passthrough(c) => &c.embedding_text,
        }
    }

    pub fn metadata_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            ProfileChunk::Unified(c) => serde_json::to_value(&c.metadata),
            ProfileChunk::Passthrough(c) => serde_json::to_value(&c.metadata),
        }
    }

    pub fn is_unified(&self) -> bool {
        matches!(self, ProfileChunk::Unified(_))
    }
}
