use thiserror::Error;

/// Errors raised by the generic store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("corrupt record in {collection} at line {line}: {message}")]
    Corrupt {
        collection: &'static str,
        line: usize,
        message: String,
    },
}
