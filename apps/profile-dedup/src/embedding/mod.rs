/// Embedding hand-off — vectorises the final profile for downstream retrieval.
///
/// Storage is somebody else's job; this module stops at `EmbeddedProfileChunk`.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::CapabilityError;
use crate::llm_client::{retry_with, LlmError, RetryPolicy};
use crate::models::ProfileChunk;

const VOYAGE_API_URL: &str = "https://api.voyageai.com/v1/embeddings";
pub const VOYAGE_MODEL: &str = "voyage-3.5";
pub const EMBEDDING_DIMENSION: usize = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Batch document embedder. Carried as `Arc<dyn Embedder>`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError>;

    fn name(&self) -> &'static str;
}

/// A profile chunk ready for the vector store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedProfileChunk {
    pub user_id: String,
    pub embedding_text: String,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
}

/// Embeds every chunk of a profile in a single batch.
///
/// Fails as `Malformed` when the provider returns the wrong number of vectors or a
/// vector of the wrong size.
pub async fn embed_profile(
    embedder: &dyn Embedder,
    user_id: &str,
    chunks: &[ProfileChunk],
) -> Result<Vec<EmbeddedProfileChunk>, CapabilityError> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.embedding_text().to_string()).collect();
    info!(
        "Embedding {} profile chunks for user {} with {}",
        texts.len(),
        user_id,
        embedder.name()
    );

    let embeddings = embedder.embed_documents(&texts).await?;
    if embeddings.len() != chunks.len() {
        return Err(CapabilityError::Malformed(format!(
            "expected {} embeddings, got {}",
            chunks.len(),
            embeddings.len()
        )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != EMBEDDING_DIMENSION) {
        return Err(CapabilityError::Malformed(format!(
            "expected {EMBEDDING_DIMENSION}-dimensional embeddings, got {}",
            bad.len()
        )));
    }

    chunks
        .iter()
        .zip(texts)
        .zip(embeddings)
        .map(|((chunk, embedding_text), embedding)| {
            Ok(EmbeddedProfileChunk {
                user_id: user_id.to_string(),
                embedding_text,
                metadata: chunk
                    .metadata_json()
                    .map_err(|e| CapabilityError::Encode(e.to_string()))?,
                embedding,
            })
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// VoyageEmbedder
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct VoyageRequest<'a> {
    input: &'a [String],
    model: &'a str,
    input_type: &'a str,
    output_dimension: usize,
}

#[derive(Debug, Deserialize)]
struct VoyageResponse {
    data: Vec<VoyageEmbedding>,
    #[serde(default)]
    usage: Option<VoyageUsage>,
}

#[derive(Debug, Deserialize)]
struct VoyageEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct VoyageUsage {
    total_tokens: u64,
}

#[derive(Clone)]
pub struct VoyageEmbedder {
    client: Client,
    api_key: String,
    retry: RetryPolicy,
}

impl VoyageEmbedder {
    pub fn new(api_key: String, retry: RetryPolicy) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CapabilityError::Encode(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            retry,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<VoyageResponse, LlmError> {
        let body = VoyageRequest {
            input: texts,
            model: VOYAGE_MODEL,
            input_type: "document",
            output_dimension: EMBEDDING_DIMENSION,
        };

        retry_with(self.retry, "Embedding call", || self.send_once(&body)).await
    }

    async fn send_once(&self, body: &VoyageRequest<'_>) -> Result<VoyageResponse, LlmError> {
        let response = self
            .client
            .post(VOYAGE_API_URL)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Embedder for VoyageEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        let response = self.request(texts).await?;
        if let Some(usage) = &response.usage {
            debug!("Voyage embedding call used {} tokens", usage.total_tokens);
        }
        Ok(ordered_embeddings(response.data))
    }

    fn name(&self) -> &'static str {
        "voyage"
    }
}

fn ordered_embeddings(mut data: Vec<VoyageEmbedding>) -> Vec<Vec<f32>> {
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}
