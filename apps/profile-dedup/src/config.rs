use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::dedup::{ArbitrationPolicy, PipelineOptions};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: DedupBackend,
    /// Required by the `llm` backend only.
    pub anthropic_api_key: Option<String>,
    pub chunks_path: PathBuf,
    /// Report destination; stdout when unset.
    pub output_path: Option<PathBuf>,
    pub embedding: Option<EmbeddingConfig>,
    pub merge_concurrency: usize,
    pub llm_max_retries: u32,
    pub arbitration_policy: ArbitrationPolicy,
    pub rust_log: String,
}

/// Which arbiter/merger pair the binary wires into the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupBackend {
    /// `LlmArbiter` + `LlmMerger`.
    #[default]
    Llm,
    /// `NoopArbiter` + `RuleMerger`; no network calls.
    Rule,
}

impl FromStr for DedupBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llm" => Ok(DedupBackend::Llm),
            "rule" => Ok(DedupBackend::Rule),
            other => Err(format!("unknown dedup backend '{other}' (expected llm or rule)")),
        }
    }
}

impl fmt::Display for DedupBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DedupBackend::Llm => "llm",
            DedupBackend::Rule => "rule",
        })
    }
}

/// Present only when both `VOYAGE_API_KEY` and `PROFILE_USER_ID` are set.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub voyage_api_key: String,
    pub user_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Required environment variable '{key}' is not set"))
        };

        let embedding = match (lookup("VOYAGE_API_KEY"), lookup("PROFILE_USER_ID")) {
            (Some(voyage_api_key), Some(user_id)) => Some(EmbeddingConfig {
                voyage_api_key,
                user_id,
            }),
            _ => None,
        };

        let defaults = PipelineOptions::default();

        let backend = lookup("DEDUP_BACKEND")
            .unwrap_or_else(|| DedupBackend::default().to_string())
            .parse::<DedupBackend>()
            .map_err(anyhow::Error::msg)?;
        let anthropic_api_key = match backend {
            DedupBackend::Llm => Some(require("ANTHROPIC_API_KEY")?),
            DedupBackend::Rule => lookup("ANTHROPIC_API_KEY"),
        };

        Ok(Config {
            backend,
            anthropic_api_key,
            chunks_path: PathBuf::from(require("CHUNKS_PATH")?),
            output_path: lookup("OUTPUT_PATH").map(PathBuf::from),
            embedding,
            merge_concurrency: lookup("MERGE_CONCURRENCY")
                .unwrap_or_else(|| defaults.merge_concurrency.to_string())
                .parse::<usize>()
                .context("MERGE_CONCURRENCY must be a positive integer")?
                .max(1),
            llm_max_retries: lookup("LLM_MAX_RETRIES")
                .unwrap_or_else(|| "3".to_string())
                .parse::<u32>()
                .context("LLM_MAX_RETRIES must be a non-negative integer")?,
            arbitration_policy: lookup("ARBITRATION_POLICY")
                .unwrap_or_else(|| defaults.arbitration.to_string())
                .parse::<ArbitrationPolicy>()
                .map_err(anyhow::Error::msg)?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            merge_concurrency: self.merge_concurrency,
            arbitration: self.arbitration_policy,
        }
    }
}
