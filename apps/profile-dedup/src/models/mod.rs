pub mod chunk;

pub use chunk::{
    Chunk, ChunkMetadata, Cluster, Grouping, MetadataValue, ProfileChunk, UnifiedChunk,
    UnifiedMetadata, DEFAULT_SECTION, UNKNOWN,
};
