use std::collections::HashMap;

use bartleby_store::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::generate_id;

/// Lifecycle state of a [`WorkItem`].
///
/// `Pending` and `Failed` are the only statuses a human or Sync can move an
/// item into directly; every other transition is owned by the Executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Ready,
    InProgress,
    Blocked,
    Complete,
    Failed,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Pending => "pending",
            WorkItemStatus::Ready => "ready",
            WorkItemStatus::InProgress => "in_progress",
            WorkItemStatus::Blocked => "blocked",
            WorkItemStatus::Complete => "complete",
            WorkItemStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a [`WorkItem`] came from, when it was ingested by Sync rather than
/// created manually. `(source_name, external_id)` is unique across the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub source_name: String,
    pub external_id: String,
    pub external_url: Option<String>,
}

/// The unit of work Bartleby drags through interpret → plan → execute →
/// refine → finalize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: WorkItemStatus,
    /// Saved when entering `Blocked`, restored on unblock. Invariant:
    /// `previous_status.is_some() <=> status == Blocked`.
    pub previous_status: Option<WorkItemStatus>,
    pub external: Option<ExternalRef>,
    pub dependencies: Vec<String>,
    pub labels: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_worked_at: Option<i64>,
    pub attempt_count: u32,
    pub branch_name: Option<String>,
    pub error_message: Option<String>,
}

impl WorkItem {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let title = title.into();
        let now = now_ms();
        let id = generate_id("item", &title);
        Self {
            id,
            title,
            description: description.into(),
            status: WorkItemStatus::Pending,
            previous_status: None,
            external: None,
            dependencies: Vec::new(),
            labels: Vec::new(),
            created_at: now,
            updated_at: now,
            last_worked_at: None,
            attempt_count: 0,
            branch_name: None,
            error_message: None,
        }
    }

    pub fn from_external(
        title: impl Into<String>,
        description: impl Into<String>,
        source_name: impl Into<String>,
        external_id: impl Into<String>,
        external_url: Option<String>,
    ) -> Self {
        let mut item = Self::new(title, description);
        item.external = Some(ExternalRef {
            source_name: source_name.into(),
            external_id: external_id.into(),
            external_url,
        });
        item
    }

    fn touch(&mut self) {
        self.updated_at = now_ms().max(self.created_at);
    }

    pub fn set_status(&mut self, status: WorkItemStatus) {
        debug!(id = %self.id, from = %self.status, to = %status, "WorkItem::set_status");
        self.status = status;
        self.touch();
    }

    pub fn mark_blocked(&mut self) {
        if self.status != WorkItemStatus::Blocked {
            self.previous_status = Some(self.status);
            self.status = WorkItemStatus::Blocked;
            self.touch();
        }
    }

    /// Restore the status saved before the item was blocked. A no-op if the
    /// item is not currently blocked.
    pub fn unblock(&mut self) {
        if let Some(prev) = self.previous_status.take() {
            self.status = prev;
            self.touch();
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempt_count += 1;
        self.last_worked_at = Some(now_ms());
        self.touch();
    }

    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
            self.touch();
        }
    }

    pub fn source_name(&self) -> Option<&str> {
        self.external.as_ref().map(|e| e.source_name.as_str())
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external.as_ref().map(|e| e.external_id.as_str())
    }
}

impl Record for WorkItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "work_items"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.as_str().to_string()));
        if let Some(ext) = &self.external {
            fields.insert("source_name".to_string(), IndexValue::String(ext.source_name.clone()));
            fields.insert(
                "source_external_id".to_string(),
                IndexValue::String(format!("{}::{}", ext.source_name, ext.external_id)),
            );
        }
        fields
    }
}
