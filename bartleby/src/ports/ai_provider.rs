use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{TransformationType, WorkItem};
use crate::prompt::PromptContext;

/// Errors a concrete [`AiProvider`] implementation can surface. Mirrors the
/// retryability distinctions the Executor's retry loop depends on: rate
/// limits and server errors are transient, authentication and malformed
/// responses are not.
#[derive(Debug, Error)]
pub enum AiProviderError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("api error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl AiProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AiProviderError::RateLimited { .. } => true,
            AiProviderError::ApiError { status, .. } => *status >= 500,
            AiProviderError::Network(_) => true,
            AiProviderError::Timeout(_) => true,
            AiProviderError::Authentication(_) => false,
            AiProviderError::InvalidResponse(_) => false,
            AiProviderError::Cancelled => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AiProviderError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Raw result of one AI invocation, before [`crate::executor`] interprets
/// `outcome`/`questions` into domain mutations.
#[derive(Debug, Clone)]
pub struct AiExecutionResult {
    pub success: bool,
    /// Raw `outcome` string from the response payload — one of
    /// `completed`/`blocked`/`needs_context`, or anything else the model
    /// emitted; interpretation (including the "unknown defaults to
    /// needs_context" rule) is the Executor's job, not the provider's.
    pub outcome: String,
    pub summary: String,
    pub modified_files: Vec<String>,
    pub questions: Vec<String>,
    pub error_message: Option<String>,
    pub tokens_used: u64,
}

/// Chat-style completion with usage accounting. One implementation per AI
/// backend. Responsible for its own retries on transient failures — see
/// `crate::ai::anthropic` for the concrete backoff policy.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// `prompt` is the system/user pair [`crate::prompt::PromptBuilder`]
    /// assembled for this `transformation`; `item`/`working_dir` are passed
    /// alongside for adapters that need them for non-prompt purposes
    /// (token accounting keyed by item, sandboxing the working directory).
    async fn execute_work(
        &self,
        item: &WorkItem,
        transformation: TransformationType,
        working_dir: &str,
        prompt: &PromptContext,
    ) -> Result<AiExecutionResult, AiProviderError>;

    async fn test_connection(&self) -> bool;
}
