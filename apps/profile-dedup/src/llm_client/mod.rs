/// LLM Client — the single point of entry for every model call made by the dedup pipeline.
///
/// ARCHITECTURAL RULE: arbitration and merge talk to the Anthropic API only through this
/// module. The client is constructed once by the caller and passed in; there is no global.
///
/// Model: claude-sonnet-4-5, shared by arbitration and merge.
use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Gave up after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("LLM returned empty content")]
    EmptyContent,
}

impl LlmError {
    /// 429 and 5xx are worth retrying; every other status is final.
    pub fn is_transient_status(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }

    /// Connection-level failures and transient statuses. A body that arrived but did not
    /// decode is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(e) => !e.is_decode() && !e.is_builder(),
            LlmError::Api { status, .. } => Self::is_transient_status(*status),
            _ => false,
        }
    }
}

/// Bounded exponential backoff shared by every outbound provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before `attempt` (0-based): none for the first, then 1x, 2x, 4x ... the base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Wraps the Anthropic Messages API with retry logic and structured output helpers.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(api_key: String, retry: RetryPolicy) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            retry,
        })
    }

    /// Makes a raw call to the Claude API, returning the full response object.
    /// Retries network failures, 429 and 5xx with exponential backoff; other
    /// statuses fail immediately.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<LlmResponse, LlmError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let llm_response =
            retry_with(self.retry, "LLM call", || self.send_once(&request_body)).await?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );

        Ok(llm_response)
    }

    async fn send_once(&self, request_body: &AnthropicRequest<'_>) -> Result<LlmResponse, LlmError> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Calls the LLM and deserializes the text response as JSON.
    /// A response that does not parse is returned as `LlmError::Parse` and never retried.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
    ) -> Result<T, LlmError> {
        let response = self.call(prompt, system).await?;

        let text = response.text().ok_or(LlmError::EmptyContent)?;

        parse_json_response(text)
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or the policy's
/// attempts are used up. Shared by every outbound provider call.
pub async fn retry_with<T, F, Fut>(policy: RetryPolicy, what: &str, mut attempt: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_error: Option<LlmError> = None;

    for n in 0..policy.max_attempts {
        if n > 0 {
            let delay = policy.delay_for(n);
            warn!(
                "{} attempt {} failed, retrying after {}ms...",
                what,
                n,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                warn!("{} failed: {}", what, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(LlmError::RetriesExhausted {
        attempts: policy.max_attempts,
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string()),
    })
}

/// Parses model output as JSON after stripping any markdown fences around it.
pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    serde_json::from_str(strip_json_fences(text)).map_err(LlmError::Parse)
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"similar\": []}\n```";
        assert_eq!(strip_json_fences(input), "{\"similar\": []}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"similar\": []}\n```";
        assert_eq!(strip_json_fences(input), "{\"similar\": []}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"similar\": []}";
        assert_eq!(strip_json_fences(input), "{\"similar\": []}");
    }

    #[test]
    fn test_parse_json_response_reports_parse_error() {
        let err = parse_json_response::<serde_json::Value>("Sure! Here you go").unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_retry_policy_needs_one_attempt() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }

    fn api_error(status: u16) -> LlmError {
        LlmError::Api {
            status,
            message: format!("status {status}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_rate_limit() {
        let calls = AtomicU32::new(0);
        let result = retry_with(RetryPolicy::default(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(api_error(429))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_client_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = retry_with(RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(api_error(400)) }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Api { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_never_repeats_malformed_response() {
        let calls = AtomicU32::new(0);
        let result: Result<serde_json::Value, LlmError> =
            retry_with(RetryPolicy::default(), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { parse_json_response("not json") }
            })
            .await;
        assert!(matches!(result, Err(LlmError::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), LlmError> = retry_with(RetryPolicy::new(3), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(api_error(503)) }
        })
        .await;
        assert!(matches!(
            result,
            Err(LlmError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s then 2s of backoff between the three attempts.
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(LlmError::is_transient_status(429));
        assert!(LlmError::is_transient_status(529));
        assert!(!LlmError::is_transient_status(400));
        assert!(!LlmError::is_transient_status(401));
    }
}
