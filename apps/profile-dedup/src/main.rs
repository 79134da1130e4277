use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use profile_dedup::config::{Config, DedupBackend};
use profile_dedup::dedup::{
    Arbiter, DedupPipeline, DedupReport, LlmArbiter, LlmMerger, Merger, NoopArbiter, RuleMerger,
};
use profile_dedup::embedding::{embed_profile, EmbeddedProfileChunk, VoyageEmbedder};
use profile_dedup::errors::AppError;
use profile_dedup::input::load_chunks;
use profile_dedup::llm_client::{self, LlmClient, RetryPolicy};

#[derive(Serialize)]
struct RunOutput<'a> {
    report: &'a DedupReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedded: Option<Vec<EmbeddedProfileChunk>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting profile-dedup v{}", env!("CARGO_PKG_VERSION"));

    let retry = RetryPolicy::new(config.llm_max_retries);
    let (arbiter, merger): (Arc<dyn Arbiter>, Arc<dyn Merger>) =
        match (config.backend, &config.anthropic_api_key) {
            (DedupBackend::Llm, Some(api_key)) => {
                let llm = LlmClient::new(api_key.clone(), retry)
                    .context("failed to build the LLM client")?;
                info!("LLM client initialized (model: {})", llm_client::MODEL);
                (
                    Arc::new(LlmArbiter::new(llm.clone())),
                    Arc::new(LlmMerger::new(llm)),
                )
            }
            (DedupBackend::Llm, None) => anyhow::bail!("the llm backend needs ANTHROPIC_API_KEY"),
            (DedupBackend::Rule, _) => {
                info!("Using rule-based merging; arbitration disabled");
                (Arc::new(NoopArbiter), Arc::new(RuleMerger))
            }
        };

    let pipeline = DedupPipeline::new(arbiter, merger, config.pipeline_options());

    let records = load_chunks(&config.chunks_path).await?;
    let report = pipeline.run_raw(records).await;
    if !report.is_complete() {
        warn!(
            "Run finished with {} stage failures and {} failed clusters",
            report.stage_failures.len(),
            report.cluster_failures.len()
        );
    }

    let embedded = match &config.embedding {
        Some(embedding) => {
            let embedder = VoyageEmbedder::new(embedding.voyage_api_key.clone(), retry)?;
            let embedded = embed_profile(&embedder, &embedding.user_id, &report.chunks)
                .await
                .map_err(AppError::from)?;
            Some(embedded)
        }
        None => None,
    };

    let output = serde_json::to_string_pretty(&RunOutput {
        report: &report,
        embedded,
    })?;

    match &config.output_path {
        Some(path) => {
            tokio::fs::write(path, output)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote dedup report to {}", path.display());
        }
        None => println!("{output}"),
    }

    Ok(())
}
