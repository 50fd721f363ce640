use std::collections::HashMap;

use bartleby_store::{IndexValue, Record, now_ms};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// A local time-of-day window during which the Orchestrator refuses to
/// start new work. `start > end` is legal and means the window wraps past
/// midnight (e.g. 22:00 to 06:00).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        }
    }
}

impl QuietHours {
    /// Whether `now` falls in `[start, end]`, handling the midnight-wrapping
    /// case with a two-interval check.
    pub fn contains(&self, now: NaiveTime) -> bool {
        if !self.enabled {
            return false;
        }
        if self.start <= self.end {
            now >= self.start && now <= self.end
        } else {
            now >= self.start || now <= self.end
        }
    }
}

/// Per-day cap on cumulative AI token usage, reset at local midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    pub enabled: bool,
    pub daily_limit: u64,
    pub tokens_used_today: u64,
    /// ISO `YYYY-MM-DD` of the last reset, compared against local "today"
    /// on each Orchestrator tick.
    pub last_reset_date: String,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            enabled: false,
            daily_limit: 1_000_000,
            tokens_used_today: 0,
            last_reset_date: String::new(),
        }
    }
}

impl TokenBudget {
    pub fn is_exhausted(&self) -> bool {
        self.enabled && self.tokens_used_today >= self.daily_limit
    }

    /// Reset the counter if `today` (a `YYYY-MM-DD` string) is newer than
    /// the last reset. Idempotent within a single local day regardless of
    /// how many times it is called.
    pub fn reset_if_new_day(&mut self, today: &str) -> bool {
        if self.last_reset_date != today {
            self.tokens_used_today = 0;
            self.last_reset_date = today.to_string();
            true
        } else {
            false
        }
    }

    pub fn add_usage(&mut self, tokens: u64) {
        self.tokens_used_today += tokens;
    }
}

/// Orchestrator cadence and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub enabled: bool,
    pub interval_minutes: u32,
    /// Currently always 1; kept as a field so a future multi-item
    /// scheduler does not need a schema migration.
    pub max_concurrent_work_items: u32,
    pub max_retry_attempts: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 5,
            max_concurrent_work_items: 1,
            max_retry_attempts: 3,
        }
    }
}

/// Working-directory and auto-commit/push policy for [`crate::ports::GitService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    pub working_directory: String,
    pub auto_commit: bool,
    pub auto_push: bool,
    pub remote: String,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            working_directory: ".".to_string(),
            auto_commit: true,
            auto_push: false,
            remote: "origin".to_string(),
        }
    }
}

/// Tracker (WorkSource) credentials and AI endpoint configuration. Secret
/// values are expected to arrive via environment variables at process
/// bootstrap (see `crate::config`), not hand-typed into the settings file;
/// these fields hold whatever was resolved at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub tracker_token: Option<String>,
    pub tracker_owner: Option<String>,
    pub tracker_repo: Option<String>,
    pub ai_endpoint: Option<String>,
    pub ai_key: Option<String>,
    pub ai_deployment: Option<String>,
}

/// The single process-wide settings row. Treated as a read-mostly cache
/// over the settings repository: every reader gets a clone, every writer
/// goes through the repository so updates are serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub id: String,
    pub orchestrator: OrchestratorSettings,
    pub quiet_hours: QuietHours,
    pub token_budget: TokenBudget,
    pub git: GitSettings,
    pub credentials: Credentials,
    pub graph_file_path: String,
    /// Set after a [`crate::sync::SyncService`] run completes without error
    /// (§4.6 step 5); left untouched by a failed or skipped run.
    pub last_sync_at: Option<i64>,
    pub updated_at: i64,
}

/// Fixed id for the settings singleton: there is exactly one row in this
/// collection, ever.
pub const SETTINGS_ID: &str = "settings-singleton";

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            id: SETTINGS_ID.to_string(),
            orchestrator: OrchestratorSettings::default(),
            quiet_hours: QuietHours::default(),
            token_budget: TokenBudget::default(),
            git: GitSettings::default(),
            credentials: Credentials::default(),
            graph_file_path: "bartleby.graph.puml".to_string(),
            last_sync_at: None,
            updated_at: now_ms(),
        }
    }
}

impl Record for AppSettings {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "settings"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}
