use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A value that can be indexed and filtered on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    pub(crate) fn to_sql_text(&self) -> String {
        match self {
            IndexValue::String(s) => s.clone(),
            IndexValue::Int(i) => i.to_string(),
            IndexValue::Bool(b) => b.to_string(),
        }
    }
}

impl std::fmt::Display for IndexValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql_text())
    }
}

/// A type that can be persisted by [`crate::Store`].
///
/// Implementors are plain data; the store owns no behavior specific to
/// any one domain type beyond what this trait exposes.
pub trait Record: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static {
    /// Stable identifier, unique within the collection.
    fn id(&self) -> &str;

    /// Last-modified timestamp (Unix ms); used to order replays.
    fn updated_at(&self) -> i64;

    /// Name of the JSONL file / index table this type lives in.
    fn collection_name() -> &'static str;

    /// Fields exposed to the secondary index for filtered queries.
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
