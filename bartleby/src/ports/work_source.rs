use async_trait::async_trait;
use thiserror::Error;

use crate::domain::WorkItem;

#[derive(Debug, Error)]
pub enum WorkSourceError {
    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("{0} not configured: missing owner/repo")]
    Configuration(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: std::time::Duration },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl WorkSourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkSourceError::RateLimited { .. } | WorkSourceError::Network(_))
    }
}

/// One implementation per external tracker. `sync()` must omit
/// pull-request-like objects; every item it returns carries
/// `source_name() == Name` and a non-empty external id.
#[async_trait]
pub trait WorkSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the current remote snapshot.
    async fn sync(&self) -> Result<Vec<WorkItem>, WorkSourceError>;

    /// Push a work item's Bartleby-managed status back to the tracker as
    /// labels (and a closed flag, where applicable).
    async fn update_status(&self, item: &WorkItem) -> Result<(), WorkSourceError>;

    async fn add_comment(&self, item: &WorkItem, text: &str) -> Result<(), WorkSourceError>;

    async fn test_connection(&self) -> bool;
}
