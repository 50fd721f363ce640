use std::collections::HashMap;

use bartleby_store::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::generate_id;

/// One AI-mediated step in an item's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationType {
    Interpret,
    Plan,
    Execute,
    Refine,
    AskClarification,
    Finalize,
}

impl TransformationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationType::Interpret => "interpret",
            TransformationType::Plan => "plan",
            TransformationType::Execute => "execute",
            TransformationType::Refine => "refine",
            TransformationType::AskClarification => "ask_clarification",
            TransformationType::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for TransformationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal or in-flight result of a [`WorkSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    InProgress,
    Completed,
    Blocked,
    Failed,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::InProgress => "in_progress",
            SessionOutcome::Completed => "completed",
            SessionOutcome::Blocked => "blocked",
            SessionOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only provenance row: one per AI invocation, written before the
/// call (`Outcome::InProgress`) and updated after it returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: String,
    pub work_item_id: String,
    pub transformation: TransformationType,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub outcome: SessionOutcome,
    pub summary: String,
    pub modified_files: Vec<String>,
    pub commit_sha: Option<String>,
    pub tokens_used: u64,
    pub error_message: Option<String>,
}

impl WorkSession {
    /// Open a new session row, `Outcome::InProgress`, as required by the
    /// write-before-call provenance guarantee.
    pub fn start(work_item_id: impl Into<String>, transformation: TransformationType) -> Self {
        let work_item_id = work_item_id.into();
        let session = Self {
            id: generate_id("session", &format!("{transformation}")),
            work_item_id: work_item_id.clone(),
            transformation,
            started_at: now_ms(),
            ended_at: None,
            outcome: SessionOutcome::InProgress,
            summary: String::new(),
            modified_files: Vec::new(),
            commit_sha: None,
            tokens_used: 0,
            error_message: None,
        };
        debug!(id = %session.id, %work_item_id, %transformation, "WorkSession::start");
        session
    }

    pub fn complete(&mut self, summary: impl Into<String>, modified_files: Vec<String>, tokens_used: u64) {
        self.finish(SessionOutcome::Completed, summary, modified_files, tokens_used, None);
    }

    pub fn block(&mut self, summary: impl Into<String>, tokens_used: u64) {
        self.finish(SessionOutcome::Blocked, summary, Vec::new(), tokens_used, None);
    }

    pub fn fail(&mut self, summary: impl Into<String>, error_message: impl Into<String>, tokens_used: u64) {
        self.finish(SessionOutcome::Failed, summary, Vec::new(), tokens_used, Some(error_message.into()));
    }

    fn finish(
        &mut self,
        outcome: SessionOutcome,
        summary: impl Into<String>,
        modified_files: Vec<String>,
        tokens_used: u64,
        error_message: Option<String>,
    ) {
        self.outcome = outcome;
        self.summary = summary.into();
        self.modified_files = modified_files;
        self.tokens_used = tokens_used;
        self.error_message = error_message;
        self.ended_at = Some(now_ms());
        debug!(id = %self.id, %outcome, tokens_used, "WorkSession::finish");
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome != SessionOutcome::InProgress
    }
}

impl Record for WorkSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.ended_at.unwrap_or(self.started_at)
    }

    fn collection_name() -> &'static str {
        "work_sessions"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("work_item_id".to_string(), IndexValue::String(self.work_item_id.clone()));
        fields.insert("transformation".to_string(), IndexValue::String(self.transformation.as_str().to_string()));
        fields.insert("outcome".to_string(), IndexValue::String(self.outcome.as_str().to_string()));
        fields
    }
}
