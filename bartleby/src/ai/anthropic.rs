//! The one [`AiProvider`] implementation this crate ships: Anthropic's
//! Messages API, hit directly with `reqwest` rather than through a
//! dedicated SDK, following the same shape as every other HTTP-backed
//! port in this crate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::AiConfig;
use crate::domain::{TransformationType, WorkItem};
use crate::executor::parse_ai_response;
use crate::ports::{AiExecutionResult, AiProvider, AiProviderError};
use crate::prompt::PromptContext;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Exponential backoff with jitter: base delay doubled per attempt,
/// +/-25% random jitter so concurrent retries don't all wake up in
/// lockstep.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
    let jitter_range = base / 4;
    let jitter = rand::random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
    Duration::from_millis((base as i64 + jitter).max(0) as u64)
}

pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(config: &AiConfig, api_key: String) -> Result<Self, AiProviderError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
        })
    }

    fn build_request_body(&self, prompt: &PromptContext) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": prompt.system_prompt,
            "messages": [
                { "role": "user", "content": prompt.user_prompt },
            ],
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<AnthropicResponse, AiProviderError> {
        let url = format!("{}/v1/messages", self.base_url);

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = backoff_with_jitter(attempt);
                warn!(attempt, backoff_ms = backoff.as_millis(), "AnthropicProvider::send: retrying after transient error");
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(attempt, error = %e, "AnthropicProvider::send: network error");
                    last_error = Some(AiProviderError::Network(e));
                    continue;
                }
            };

            let status = response.status().as_u16();

            if status == 401 || status == 403 {
                let text = response.text().await.unwrap_or_default();
                return Err(AiProviderError::Authentication(text));
            }

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(AiProviderError::RateLimited { retry_after: Duration::from_secs(retry_after) });
            }

            if is_retryable_status(status) && attempt < MAX_RETRIES {
                let text = response.text().await.unwrap_or_default();
                debug!(attempt, status, "AnthropicProvider::send: retryable error");
                last_error = Some(AiProviderError::ApiError { status, message: text });
                continue;
            }

            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(AiProviderError::ApiError { status, message: text });
            }

            return Ok(response.json().await?);
        }

        Err(last_error.unwrap_or(AiProviderError::InvalidResponse("max retries exceeded".to_string())))
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    async fn execute_work(
        &self,
        _item: &WorkItem,
        _transformation: TransformationType,
        _working_dir: &str,
        prompt: &PromptContext,
    ) -> Result<AiExecutionResult, AiProviderError> {
        let body = self.build_request_body(prompt);
        let response = self.send(&body).await?;

        let text: String = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let tokens_used = response.usage.input_tokens + response.usage.output_tokens;
        Ok(parse_ai_response(&text, tokens_used))
    }

    async fn test_connection(&self) -> bool {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "ping" }],
        });
        self.send(&body).await.is_ok()
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_system_and_user_prompt() {
        let config = AiConfig {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            timeout_ms: 1000,
        };
        let provider = AnthropicProvider::new(&config, "test-key".to_string()).unwrap();
        let prompt = PromptContext { system_prompt: "be terse".to_string(), user_prompt: "do the thing".to_string() };
        let body = provider.build_request_body(&prompt);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][0]["content"], "do the thing");
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
    }

    #[test]
    fn text_blocks_concatenate_and_non_text_blocks_are_ignored() {
        let json = r#"{
            "content": [{"type": "text", "text": "{\"outcome\":\"completed\"}"}, {"type": "tool_use"}],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let response: AnthropicResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.content.len(), 2);
        assert_eq!(response.usage.input_tokens, 10);
    }
}
