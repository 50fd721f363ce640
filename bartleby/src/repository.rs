//! Repository layer (§6): conventional CRUD over the domain entities,
//! backed by [`bartleby_store::Store`]. Stamps `created_at`/`updated_at`
//! the way the store contract requires — callers never set those fields
//! themselves.
//!
//! Local-store CRUD completes inside a single in-process SQLite/JSONL
//! write, unlike the network-bound ports (`WorkSource`, `AiProvider`,
//! `GitService`); these methods are therefore synchronous and take no
//! [`crate::cancel::CancellationToken`] — see `DESIGN.md` for the
//! rationale.

use std::sync::{Arc, Mutex};

use bartleby_store::{Filter, FilterOp, IndexValue, Store, now_ms};
use tracing::debug;

use crate::domain::{AppSettings, BlockedQuestion, WorkItem, WorkSession, SETTINGS_ID};

pub type SharedStore = Arc<Mutex<Store>>;

/// Open a store at `path` and replay every collection this crate persists.
pub fn open_store(path: impl AsRef<std::path::Path>) -> Result<SharedStore, bartleby_store::StoreError> {
    let mut store = Store::open(path)?;
    store.rebuild_indexes::<WorkItem>()?;
    store.rebuild_indexes::<BlockedQuestion>()?;
    store.rebuild_indexes::<WorkSession>()?;
    store.rebuild_indexes::<AppSettings>()?;
    Ok(Arc::new(Mutex::new(store)))
}

#[derive(Clone)]
pub struct WorkItemRepository {
    store: SharedStore,
}

impl WorkItemRepository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> Result<Option<WorkItem>, bartleby_store::StoreError> {
        self.store.lock().unwrap().get(id)
    }

    pub fn list(&self) -> Result<Vec<WorkItem>, bartleby_store::StoreError> {
        self.store.lock().unwrap().list(&[])
    }

    pub fn list_by_status(&self, status: &str) -> Result<Vec<WorkItem>, bartleby_store::StoreError> {
        self.store.lock().unwrap().list(&[Filter { field: "status".to_string(), op: FilterOp::Eq, value: IndexValue::String(status.to_string()) }])
    }

    pub fn find_by_external(&self, source_name: &str, external_id: &str) -> Result<Option<WorkItem>, bartleby_store::StoreError> {
        let key = format!("{source_name}::{external_id}");
        let mut found = self.store.lock().unwrap().list::<WorkItem>(&[Filter {
            field: "source_external_id".to_string(),
            op: FilterOp::Eq,
            value: IndexValue::String(key),
        }])?;
        Ok(found.pop())
    }

    pub fn list_by_source(&self, source_name: &str) -> Result<Vec<WorkItem>, bartleby_store::StoreError> {
        self.store.lock().unwrap().list(&[Filter { field: "source_name".to_string(), op: FilterOp::Eq, value: IndexValue::String(source_name.to_string()) }])
    }

    pub fn create(&self, mut item: WorkItem) -> Result<WorkItem, bartleby_store::StoreError> {
        let now = now_ms();
        item.created_at = now;
        item.updated_at = now;
        debug!(id = %item.id, "WorkItemRepository::create");
        self.store.lock().unwrap().create(item.clone())?;
        Ok(item)
    }

    pub fn update(&self, item: WorkItem) -> Result<(), bartleby_store::StoreError> {
        debug!(id = %item.id, "WorkItemRepository::update");
        self.store.lock().unwrap().update(item)
    }

    pub fn delete(&self, id: &str) -> Result<(), bartleby_store::StoreError> {
        debug!(id, "WorkItemRepository::delete");
        self.store.lock().unwrap().delete::<WorkItem>(id)
    }
}

#[derive(Clone)]
pub struct BlockedQuestionRepository {
    store: SharedStore,
}

impl BlockedQuestionRepository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> Result<Option<BlockedQuestion>, bartleby_store::StoreError> {
        self.store.lock().unwrap().get(id)
    }

    pub fn list_for_item(&self, work_item_id: &str) -> Result<Vec<BlockedQuestion>, bartleby_store::StoreError> {
        self.store.lock().unwrap().list(&[Filter { field: "work_item_id".to_string(), op: FilterOp::Eq, value: IndexValue::String(work_item_id.to_string()) }])
    }

    pub fn list_unanswered_for_item(&self, work_item_id: &str) -> Result<Vec<BlockedQuestion>, bartleby_store::StoreError> {
        Ok(self.list_for_item(work_item_id)?.into_iter().filter(|q| !q.is_answered()).collect())
    }

    pub fn list_answered_for_item(&self, work_item_id: &str) -> Result<Vec<BlockedQuestion>, bartleby_store::StoreError> {
        let mut answered: Vec<BlockedQuestion> = self.list_for_item(work_item_id)?.into_iter().filter(|q| q.is_answered()).collect();
        answered.sort_by_key(|q| q.created_at);
        Ok(answered)
    }

    pub fn create(&self, question: BlockedQuestion) -> Result<BlockedQuestion, bartleby_store::StoreError> {
        debug!(id = %question.id, "BlockedQuestionRepository::create");
        self.store.lock().unwrap().create(question.clone())?;
        Ok(question)
    }

    pub fn update(&self, question: BlockedQuestion) -> Result<(), bartleby_store::StoreError> {
        self.store.lock().unwrap().update(question)
    }
}

#[derive(Clone)]
pub struct WorkSessionRepository {
    store: SharedStore,
}

impl WorkSessionRepository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> Result<Option<WorkSession>, bartleby_store::StoreError> {
        self.store.lock().unwrap().get(id)
    }

    /// Sessions for an item, totally ordered by `started_at` per §5.
    pub fn list_for_item(&self, work_item_id: &str) -> Result<Vec<WorkSession>, bartleby_store::StoreError> {
        let mut sessions: Vec<WorkSession> = self.store.lock().unwrap().list(&[Filter {
            field: "work_item_id".to_string(),
            op: FilterOp::Eq,
            value: IndexValue::String(work_item_id.to_string()),
        }])?;
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    pub fn create(&self, session: WorkSession) -> Result<WorkSession, bartleby_store::StoreError> {
        debug!(id = %session.id, "WorkSessionRepository::create");
        self.store.lock().unwrap().create(session.clone())?;
        Ok(session)
    }

    pub fn update(&self, session: WorkSession) -> Result<(), bartleby_store::StoreError> {
        self.store.lock().unwrap().update(session)
    }
}

/// Read-mostly cache over the settings repository (§9 "Global state"):
/// every read clones the singleton row, every write goes through
/// [`Self::save`], which persists and refreshes the cache in one step.
#[derive(Clone)]
pub struct SettingsRepository {
    store: SharedStore,
}

impl SettingsRepository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<AppSettings, bartleby_store::StoreError> {
        Ok(self.try_load()?.unwrap_or_default())
    }

    /// `None` distinguishes "never written" from "written with defaults",
    /// which `main.rs`'s config bootstrap needs to decide whether to seed
    /// the singleton from the config file.
    pub fn try_load(&self) -> Result<Option<AppSettings>, bartleby_store::StoreError> {
        self.store.lock().unwrap().get(SETTINGS_ID)
    }

    pub fn save(&self, mut settings: AppSettings) -> Result<AppSettings, bartleby_store::StoreError> {
        settings.updated_at = now_ms();
        self.store.lock().unwrap().update(settings.clone())?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{WorkItemStatus};
    use tempfile::TempDir;

    #[test]
    fn work_item_create_stamps_timestamps() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path()).unwrap();
        let repo = WorkItemRepository::new(store);
        let item = repo.create(WorkItem::new("t", "d")).unwrap();
        assert_eq!(item.created_at, item.updated_at);
        assert!(item.created_at > 0);
    }

    #[test]
    fn find_by_external_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path()).unwrap();
        let repo = WorkItemRepository::new(store);
        let item = repo.create(WorkItem::from_external("t", "d", "github", "42", None)).unwrap();
        let found = repo.find_by_external("github", "42").unwrap().unwrap();
        assert_eq!(found.id, item.id);
        assert!(repo.find_by_external("github", "43").unwrap().is_none());
    }

    #[test]
    fn list_by_status_filters() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path()).unwrap();
        let repo = WorkItemRepository::new(store);
        let mut ready = WorkItem::new("a", "d");
        ready.set_status(WorkItemStatus::Ready);
        repo.create(ready).unwrap();
        repo.create(WorkItem::new("b", "d")).unwrap();

        let ready_items = repo.list_by_status("ready").unwrap();
        assert_eq!(ready_items.len(), 1);
        assert_eq!(ready_items[0].title, "a");
    }

    #[test]
    fn blocked_question_answered_split() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path()).unwrap();
        let repo = BlockedQuestionRepository::new(store);
        let q1 = repo.create(BlockedQuestion::new("item-1", "Which db?", None)).unwrap();
        repo.create(BlockedQuestion::new("item-1", "Which region?", None)).unwrap();

        let mut answered = q1.clone();
        answered.answer("Postgres");
        repo.update(answered).unwrap();

        assert_eq!(repo.list_unanswered_for_item("item-1").unwrap().len(), 1);
        assert_eq!(repo.list_answered_for_item("item-1").unwrap().len(), 1);
    }

    #[test]
    fn settings_defaults_then_round_trips_a_write() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path()).unwrap();
        let repo = SettingsRepository::new(store);
        let mut settings = repo.load().unwrap();
        assert_eq!(settings.id, SETTINGS_ID);

        settings.token_budget.tokens_used_today = 500;
        repo.save(settings).unwrap();

        let reloaded = repo.load().unwrap();
        assert_eq!(reloaded.token_budget.tokens_used_today, 500);
    }
}
