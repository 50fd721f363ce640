//! Bidirectional reconciliation between a [`WorkSource`] and the local
//! store (§4.6). One sync runs at a time; a concurrent call returns
//! `Outcome::AlreadyRunning` immediately rather than erroring or queuing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use bartleby_store::now_ms;

use crate::domain::{WorkItem, WorkItemStatus};
use crate::events::{Event, EventBus};
use crate::ports::{WorkSource, WorkSourceError};
use crate::repository::{SettingsRepository, WorkItemRepository};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] bartleby_store::StoreError),

    #[error(transparent)]
    WorkSource(#[from] WorkSourceError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: u32,
    pub updated: u32,
    pub status_pushed: u32,
    pub removed: u32,
}

#[derive(Debug, Clone)]
pub enum SyncRunOutcome {
    Ran(SyncReport),
    AlreadyRunning,
}

/// Statuses SyncService is allowed to push back to the tracker (§4.6
/// step 3.b). `Pending` is excluded: it is the default remote-derived
/// status, never something Bartleby pushes.
const PUSHABLE_STATUSES: [WorkItemStatus; 5] = [
    WorkItemStatus::Ready,
    WorkItemStatus::InProgress,
    WorkItemStatus::Blocked,
    WorkItemStatus::Complete,
    WorkItemStatus::Failed,
];

pub struct SyncService {
    source: Arc<dyn WorkSource>,
    items: WorkItemRepository,
    settings: SettingsRepository,
    events: Arc<EventBus>,
    is_syncing: AtomicBool,
}

impl SyncService {
    pub fn new(source: Arc<dyn WorkSource>, items: WorkItemRepository, settings: SettingsRepository, events: Arc<EventBus>) -> Self {
        Self { source, items, settings, events, is_syncing: AtomicBool::new(false) }
    }

    pub async fn run(&self) -> Result<SyncRunOutcome, SyncError> {
        if self.is_syncing.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("SyncService::run: sync already in progress, skipping");
            return Ok(SyncRunOutcome::AlreadyRunning);
        }

        let result = self.run_locked().await;
        self.is_syncing.store(false, Ordering::SeqCst);

        match &result {
            Ok(report) => self.events.emit(Event::SyncCompleted {
                added: report.added,
                updated: report.updated,
                status_pushed: report.status_pushed,
                removed: report.removed,
            }),
            Err(err) => self.events.emit(Event::SyncFailed { message: err.to_string() }),
        }

        result.map(SyncRunOutcome::Ran)
    }

    async fn run_locked(&self) -> Result<SyncReport, SyncError> {
        self.events.emit(Event::SyncStarted);
        let mut report = SyncReport::default();

        let remote_items = self.source.sync().await?;

        for remote in &remote_items {
            let source_name = remote.source_name().unwrap_or_default().to_string();
            let external_id = remote.external_id().unwrap_or_default().to_string();

            match self.items.find_by_external(&source_name, &external_id)? {
                None => {
                    self.items.create(remote.clone())?;
                    self.events.emit(Event::ItemSynced { item_id: remote.id.clone(), action: "added".to_string() });
                    report.added += 1;
                }
                Some(local) => {
                    let merged = merge(&local, remote);
                    let status_pushed = merged.status != remote.status && PUSHABLE_STATUSES.contains(&merged.status);

                    self.items.update(merged.clone())?;
                    self.events.emit(Event::ItemSynced { item_id: merged.id.clone(), action: "updated".to_string() });
                    report.updated += 1;

                    if status_pushed {
                        if let Err(err) = self.source.update_status(&merged).await {
                            warn!(item_id = %merged.id, error = %err, "SyncService::run_locked: failed to push status");
                            return Err(err.into());
                        }
                        report.status_pushed += 1;
                    }
                }
            }
        }

        let remote_keys: Vec<(String, String)> = remote_items
            .iter()
            .filter_map(|i| Some((i.source_name()?.to_string(), i.external_id()?.to_string())))
            .collect();

        for local in self.items.list_by_source(self.source.name())? {
            let Some(external_id) = local.external_id() else { continue };
            let key = (self.source.name().to_string(), external_id.to_string());
            if !remote_keys.contains(&key) {
                self.items.delete(&local.id)?;
                self.events.emit(Event::ItemSynced { item_id: local.id.clone(), action: "removed".to_string() });
                report.removed += 1;
            }
        }

        let mut settings = self.settings.load()?;
        settings.last_sync_at = Some(now_ms());
        self.settings.save(settings)?;

        Ok(report)
    }
}

/// Merge rule (§4.6 step 3.b): remote always wins on content; local wins
/// on status unless local was still `Pending`, in which case the
/// remote's (label-derived) status wins.
fn merge(local: &WorkItem, remote: &WorkItem) -> WorkItem {
    let mut merged = remote.clone();
    merged.id = local.id.clone();
    merged.dependencies = local.dependencies.clone();
    merged.previous_status = local.previous_status;
    merged.created_at = local.created_at;
    merged.last_worked_at = local.last_worked_at;
    merged.attempt_count = local.attempt_count;
    merged.branch_name = local.branch_name.clone();
    merged.error_message = local.error_message.clone();

    merged.status = if local.status == WorkItemStatus::Pending { remote.status } else { local.status };

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubSource {
        items: Mutex<Vec<WorkItem>>,
        pushed: Mutex<Vec<WorkItem>>,
    }

    #[async_trait]
    impl WorkSource for StubSource {
        fn name(&self) -> &str {
            "github"
        }

        async fn sync(&self) -> Result<Vec<WorkItem>, WorkSourceError> {
            Ok(self.items.lock().unwrap().clone())
        }

        async fn update_status(&self, item: &WorkItem) -> Result<(), WorkSourceError> {
            self.pushed.lock().unwrap().push(item.clone());
            Ok(())
        }

        async fn add_comment(&self, _item: &WorkItem, _text: &str) -> Result<(), WorkSourceError> {
            Ok(())
        }

        async fn test_connection(&self) -> bool {
            true
        }
    }

    fn repos() -> (WorkItemRepository, SettingsRepository) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = crate::repository::open_store(dir.path()).unwrap();
        std::mem::forget(dir);
        (WorkItemRepository::new(store.clone()), SettingsRepository::new(store))
    }

    #[tokio::test]
    async fn new_remote_item_is_added() {
        let remote = WorkItem::from_external("Fix bug", "desc", "github", "42", None);
        let source = Arc::new(StubSource { items: Mutex::new(vec![remote]), pushed: Mutex::new(vec![]) });
        let (items, settings) = repos();
        let events = Arc::new(EventBus::new(16));
        let service = SyncService::new(source, items.clone(), settings.clone(), events);

        let outcome = service.run().await.unwrap();
        match outcome {
            SyncRunOutcome::Ran(report) => assert_eq!(report, SyncReport { added: 1, updated: 0, status_pushed: 0, removed: 0 }),
            SyncRunOutcome::AlreadyRunning => panic!("expected a run"),
        }
        assert!(items.find_by_external("github", "42").unwrap().is_some());
        assert!(settings.load().unwrap().last_sync_at.is_some());
    }

    #[tokio::test]
    async fn in_progress_local_status_wins_and_pushes_to_remote() {
        let mut remote = WorkItem::from_external("Fix bug", "desc", "github", "42", None);
        remote.set_status(WorkItemStatus::Pending);

        let (items, settings) = repos();
        let mut local = remote.clone();
        local.set_status(WorkItemStatus::InProgress);
        items.create(local).unwrap();

        let source = Arc::new(StubSource { items: Mutex::new(vec![remote]), pushed: Mutex::new(vec![]) });
        let events = Arc::new(EventBus::new(16));
        let service = SyncService::new(source.clone(), items.clone(), settings, events);

        let outcome = service.run().await.unwrap();
        match outcome {
            SyncRunOutcome::Ran(report) => {
                assert_eq!(report.updated, 1);
                assert_eq!(report.status_pushed, 1);
            }
            SyncRunOutcome::AlreadyRunning => panic!("expected a run"),
        }

        let reloaded = items.find_by_external("github", "42").unwrap().unwrap();
        assert_eq!(reloaded.status, WorkItemStatus::InProgress);
        assert_eq!(source.pushed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removed_remote_item_deletes_locally() {
        let (items, settings) = repos();
        let local = WorkItem::from_external("Stale", "desc", "github", "99", None);
        items.create(local).unwrap();

        let source = Arc::new(StubSource { items: Mutex::new(vec![]), pushed: Mutex::new(vec![]) });
        let events = Arc::new(EventBus::new(16));
        let service = SyncService::new(source, items.clone(), settings, events);

        let outcome = service.run().await.unwrap();
        match outcome {
            SyncRunOutcome::Ran(report) => assert_eq!(report.removed, 1),
            SyncRunOutcome::AlreadyRunning => panic!("expected a run"),
        }
        assert!(items.find_by_external("github", "99").unwrap().is_none());
    }
}
