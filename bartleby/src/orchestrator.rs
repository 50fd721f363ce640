//! The state machine that decides when and what to run (§4.7). Driven by
//! a single `tokio::time::interval` timer and woken early by
//! [`Orchestrator::trigger`]; enforces quiet hours and the daily token
//! budget before ever asking the Resolver for work.
//!
//! Grounded on the teacher's `LoopManager::run` (`td/src/loop/manager.rs`):
//! the same `tokio::select!` over a poll interval, a wake channel, and a
//! shutdown channel, generalized from "spawn up to N concurrent loops" to
//! "process at most one ready item per tick" per spec.md §4.7/§5.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::domain::{TransformationType, WorkItemStatus};
use crate::events::{Event, EventBus};
use crate::executor::{ExecutorError, StatusUpdate, WorkExecutor};
use crate::graph::{DependencyResolver, GraphStore};
use crate::ports::{GitService, GitServiceError, branch_name_for};
use crate::repository::{SettingsRepository, WorkItemRepository};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] bartleby_store::StoreError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Git(#[from] GitServiceError),
}

/// §4.7's named states. `Stopped` is both the initial and final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Stopped,
    Starting,
    Idle,
    Working,
    QuietHours,
    BudgetExhausted,
    Stopping,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorState::Stopped => "stopped",
            OrchestratorState::Starting => "starting",
            OrchestratorState::Idle => "idle",
            OrchestratorState::Working => "working",
            OrchestratorState::QuietHours => "quiet_hours",
            OrchestratorState::BudgetExhausted => "budget_exhausted",
            OrchestratorState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only snapshot of the Orchestrator for `daemon status`-equivalent
/// reporting (SPEC_FULL.md §6): entirely derived from state already
/// specified, no new persisted fields.
#[derive(Debug, Clone)]
pub struct OrchestratorStats {
    pub state: OrchestratorState,
    pub current_work_item_id: Option<String>,
    pub items_completed: u64,
    pub items_failed: u64,
    pub items_blocked: u64,
    pub tokens_used_today: u64,
    pub daily_token_limit: u64,
    pub next_cycle_at: Option<i64>,
}

struct SharedState {
    state: OrchestratorState,
    current_work_item_id: Option<String>,
    items_completed: u64,
    items_failed: u64,
    items_blocked: u64,
    next_cycle_at: Option<i64>,
    /// The item the Orchestrator currently holds, per §5's "in-memory
    /// lock on the currently-processed item id" — Sync consults this via
    /// [`Orchestrator::locked_item_id`] and skips it.
    locked_item_id: Option<String>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            state: OrchestratorState::Stopped,
            current_work_item_id: None,
            items_completed: 0,
            items_failed: 0,
            items_blocked: 0,
            next_cycle_at: None,
            locked_item_id: None,
        }
    }
}

/// Cooperative, single-process work loop (§4.7). Exactly one
/// `Executor.execute` call is ever in flight, enforced by `tick`'s
/// `&mut self`-equivalent guard flag (`ticking`) rather than a semaphore —
/// there is only ever one slot.
pub struct Orchestrator {
    items: WorkItemRepository,
    settings: SettingsRepository,
    graph_store: Mutex<GraphStore>,
    executor: WorkExecutor,
    git: Option<Arc<dyn GitService>>,
    events: Arc<EventBus>,
    shared: Mutex<SharedState>,
    ticking: AtomicBool,
    wake: Notify,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        items: WorkItemRepository,
        settings: SettingsRepository,
        graph_store: GraphStore,
        executor: WorkExecutor,
        git: Option<Arc<dyn GitService>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            items,
            settings,
            graph_store: Mutex::new(graph_store),
            executor,
            git,
            events,
            shared: Mutex::new(SharedState::default()),
            ticking: AtomicBool::new(false),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wake the timer early — the IPC equivalent of the teacher's
    /// `ExecutionPending` cross-process notification.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    pub async fn stats(&self) -> OrchestratorStats {
        let shared = self.shared.lock().await;
        let settings = self.settings.load().unwrap_or_default();
        OrchestratorStats {
            state: shared.state,
            current_work_item_id: shared.current_work_item_id.clone(),
            items_completed: shared.items_completed,
            items_failed: shared.items_failed,
            items_blocked: shared.items_blocked,
            tokens_used_today: settings.token_budget.tokens_used_today,
            daily_token_limit: settings.token_budget.daily_limit,
            next_cycle_at: shared.next_cycle_at,
        }
    }

    /// Whether Sync should skip `id` because the Orchestrator currently
    /// holds it (§5: "Sync skips items whose id is locked").
    pub async fn locked_item_id(&self) -> Option<String> {
        self.shared.lock().await.locked_item_id.clone()
    }

    async fn transition(&self, to: OrchestratorState) {
        let from = {
            let mut shared = self.shared.lock().await;
            let from = shared.state;
            shared.state = to;
            from
        };
        if from != to {
            debug!(%from, %to, "Orchestrator::transition");
            self.events.emit(Event::StateChanged { from: from.to_string(), to: to.to_string() });
        }
    }

    /// Stopped → Starting → Idle.
    pub async fn start(&self) {
        self.transition(OrchestratorState::Starting).await;
        if let Err(err) = self.graph_store.lock().await.load() {
            warn!(error = %err, "Orchestrator::start: failed to load graph, continuing with cached graph");
        }
        self.transition(OrchestratorState::Idle).await;
    }

    /// Run the timer loop until `Stop` is requested or cancellation
    /// fires. Mirrors the teacher's `LoopManager::run` `tokio::select!`
    /// shape: poll interval tick, explicit wake, shutdown signal.
    pub async fn run(&self, interval_minutes: u32, mut shutdown_rx: mpsc::Receiver<()>) -> Result<(), OrchestratorError> {
        self.start().await;

        let mut interval = tokio::time::interval(Duration::from_secs((interval_minutes.max(1) as u64) * 60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "Orchestrator::run: tick failed");
                    }
                }
                _ = self.wake.notified() => {
                    debug!("Orchestrator::run: woken early");
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "Orchestrator::run: tick failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Orchestrator::run: shutdown requested");
                    break;
                }
                _ = self.cancel.cancelled() => {
                    info!("Orchestrator::run: cancelled");
                    break;
                }
            }
        }

        self.transition(OrchestratorState::Stopping).await;
        self.transition(OrchestratorState::Stopped).await;
        Ok(())
    }

    /// One tick body (§4.7). Mutually exclusive with another tick via
    /// `ticking`: a `Trigger()` that arrives mid-tick is a no-op, not a
    /// queued second tick.
    pub async fn tick(&self) -> Result<(), OrchestratorError> {
        if self.ticking.swap(true, Ordering::SeqCst) {
            debug!("Orchestrator::tick: already ticking, skipping");
            return Ok(());
        }
        let result = self.tick_inner().await;
        self.ticking.store(false, Ordering::SeqCst);
        result
    }

    async fn tick_inner(&self) -> Result<(), OrchestratorError> {
        debug!("Orchestrator::tick_inner: called");

        // Step 1: reset the token budget at most once per local day,
        // regardless of tick frequency (§8 budget idempotence property).
        let mut settings = self.settings.load()?;
        let today = Local::now().format("%Y-%m-%d").to_string();
        if settings.token_budget.reset_if_new_day(&today) {
            settings = self.settings.save(settings)?;
        }

        {
            let interval_ms = (settings.orchestrator.interval_minutes.max(1) as i64) * 60_000;
            let mut shared = self.shared.lock().await;
            shared.next_cycle_at = Some(bartleby_store::now_ms() + interval_ms);
        }

        // Step 2: quiet-hours and budget gates, in that order — quiet
        // hours takes priority when both would apply, matching the
        // teacher's "state machine totality" expectation that every
        // (state, trigger) pair resolves deterministically.
        let now_time = Local::now().time();
        if settings.quiet_hours.contains(now_time) {
            self.transition(OrchestratorState::QuietHours).await;
            return Ok(());
        }
        if settings.token_budget.is_exhausted() {
            self.transition(OrchestratorState::BudgetExhausted).await;
            return Ok(());
        }

        // Gate cleared: if we were parked in a gated state, come back to
        // Idle before looking for work.
        {
            let current = self.shared.lock().await.state;
            if matches!(current, OrchestratorState::QuietHours | OrchestratorState::BudgetExhausted) {
                self.transition(OrchestratorState::Idle).await;
            }
        }

        if !settings.orchestrator.enabled {
            debug!("Orchestrator::tick_inner: disabled in settings, skipping");
            return Ok(());
        }

        // Step 3: ask the Resolver for ready items, pop the first.
        let graph = self.graph_store.lock().await.graph().clone();
        let items = self.items.list()?;
        let resolution = DependencyResolver::new(&graph, &items).resolve();

        let Some(item_id) = resolution.ready_items.into_iter().next() else {
            debug!("Orchestrator::tick_inner: no ready items");
            return Ok(());
        };

        let Some(mut item) = self.items.get(&item_id)? else {
            warn!(item_id = %item_id, "Orchestrator::tick_inner: ready item vanished before pickup");
            return Ok(());
        };

        let previous_status = item.status;
        item.set_status(WorkItemStatus::InProgress);
        self.items.update(item.clone())?;
        self.events.emit(Event::WorkItemStatusChanged {
            item_id: item.id.clone(),
            from: previous_status.to_string(),
            to: WorkItemStatus::InProgress.to_string(),
        });

        {
            let mut shared = self.shared.lock().await;
            shared.locked_item_id = Some(item.id.clone());
            shared.current_work_item_id = Some(item.id.clone());
        }
        self.transition(OrchestratorState::Working).await;

        let outcome = self.process_item(&item, &settings.git.working_directory).await;

        {
            let mut shared = self.shared.lock().await;
            shared.locked_item_id = None;
            shared.current_work_item_id = None;
        }

        match outcome {
            Ok(()) => {}
            Err(err) => warn!(item_id = %item.id, error = %err, "Orchestrator::tick_inner: item processing failed"),
        }

        self.transition(OrchestratorState::Idle).await;
        Ok(())
    }

    /// Step 4–7: choose the next transformation, build context, execute,
    /// apply the response, and optionally commit on terminal completion.
    async fn process_item(&self, item: &crate::domain::WorkItem, working_dir: &str) -> Result<(), OrchestratorError> {
        let Some(transformation) = self.executor.next_transformation(&item.id)? else {
            debug!(item_id = %item.id, "Orchestrator::process_item: Finalize already ran, nothing to do");
            return Ok(());
        };

        let Some(context) = self.executor.build_context(&item.id, transformation, working_dir, None)? else {
            warn!(item_id = %item.id, "Orchestrator::process_item: item vanished before context build");
            return Ok(());
        };

        let record = self.executor.execute(context, self.cancel.clone()).await?;

        let mut item = self.items.get(&item.id)?.ok_or_else(|| {
            ExecutorError::ItemNotFound(item.id.clone())
        })?;
        let from_status = item.status;

        item.record_attempt();
        match record.status_update {
            StatusUpdate::NoChange => {}
            StatusUpdate::Blocked => item.mark_blocked(),
            StatusUpdate::Complete => item.set_status(WorkItemStatus::Complete),
        }

        let mut shared = self.shared.lock().await;
        match record.session.outcome {
            crate::domain::SessionOutcome::Completed if transformation == TransformationType::Finalize => {
                shared.items_completed += 1;
            }
            crate::domain::SessionOutcome::Blocked => shared.items_blocked += 1,
            crate::domain::SessionOutcome::Failed => shared.items_failed += 1,
            _ => {}
        }
        drop(shared);

        if item.status != from_status {
            self.events.emit(Event::WorkItemStatusChanged {
                item_id: item.id.clone(),
                from: from_status.to_string(),
                to: item.status.to_string(),
            });
        }

        // Step 5: token accounting.
        let mut settings = self.settings.load()?;
        settings.token_budget.add_usage(record.session.tokens_used);
        self.settings.save(settings)?;

        // Step 6: on terminal completion, optionally branch + commit (+ push).
        if item.status == WorkItemStatus::Complete && settings.git.auto_commit {
            if let Some(git) = &self.git {
                if let Err(err) = self.commit_completed_item(git.as_ref(), &mut item, &record.session, &settings.git).await {
                    warn!(item_id = %item.id, error = %err, "Orchestrator::process_item: git commit failed");
                }
            }
        }

        self.items.update(item)?;
        Ok(())
    }

    async fn commit_completed_item(
        &self,
        git: &dyn GitService,
        item: &mut crate::domain::WorkItem,
        session: &crate::domain::WorkSession,
        git_settings: &crate::domain::GitSettings,
    ) -> Result<(), OrchestratorError> {
        let working_dir = &git_settings.working_directory;
        if !git.is_git_repository(working_dir).await {
            debug!(dir = %working_dir, "Orchestrator::commit_completed_item: not a git repository, skipping");
            return Ok(());
        }

        let branch = git.create_or_switch_to_branch(item, working_dir).await?;
        if !branch.success {
            warn!(item_id = %item.id, message = %branch.message, "Orchestrator::commit_completed_item: branch switch failed");
            return Ok(());
        }
        item.branch_name = branch.branch_name.clone().or_else(|| Some(branch_name_for(item)));

        let commit = git.commit_changes(item, &session.summary, &session.modified_files, working_dir).await?;
        if commit.has_conflicts {
            warn!(item_id = %item.id, files = ?commit.conflicting_files, "Orchestrator::commit_completed_item: merge conflict, leaving item Complete for manual resolution");
            return Ok(());
        }
        if !commit.success {
            item.error_message = Some(commit.message.clone());
            return Ok(());
        }

        let mut committed_session = session.clone();
        committed_session.commit_sha = commit.commit_sha;
        self.executor.record_commit(committed_session)?;

        if git_settings.auto_push {
            let push = git.push(working_dir, &git_settings.remote).await?;
            if !push.success {
                warn!(item_id = %item.id, message = %push.message, "Orchestrator::commit_completed_item: push failed");
            }
        }
        Ok(())
    }

    /// Any → Stopping → Stopped. The in-flight `Execute` call is allowed
    /// to finish; only the timer is torn down immediately.
    pub async fn stop(&self) {
        self.transition(OrchestratorState::Stopping).await;
        self.cancel.cancel();
    }
}
