//! Process bootstrap configuration.
//!
//! `AppSettings` (`crate::domain::settings`) is the persisted, mutable
//! singleton the Orchestrator reads every tick. `Config` is the read-once
//! file that seeds it on first run (or whenever the settings repository is
//! empty) and carries the handful of process-level knobs — where things
//! live on disk, how verbose to log — that have no business being a
//! database row.

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{Credentials, GitSettings, OrchestratorSettings, QuietHours, TokenBudget};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub orchestrator: OrchestratorSettings,
    pub quiet_hours: QuietHours,
    pub token_budget: TokenBudget,
    pub git: GitSettings,
    pub graph_file_path: String,
    pub tracker: TrackerConfig,
    pub ai: AiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            orchestrator: OrchestratorSettings::default(),
            quiet_hours: QuietHours::default(),
            token_budget: TokenBudget::default(),
            git: GitSettings::default(),
            graph_file_path: "bartleby.graph.puml".to_string(),
            tracker: TrackerConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

impl Config {
    /// Load with the same fallback chain the Orchestrator's settings
    /// bootstrap has always used: explicit path, then project-local,
    /// then user config dir, then compiled-in defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".bartleby.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %local_config.display(), error = %e, "failed to load local config"),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("bartleby").join("bartleby.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!(path = %user_config.display(), error = %e, "failed to load user config"),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!(path = %path.as_ref().display(), "loaded config");
        Ok(config)
    }

    /// Resolve the secret-bearing fields from the environment variables
    /// named in `tracker`/`ai`. Called once at startup; the result seeds
    /// `AppSettings::credentials` and is never re-read from the file.
    pub fn resolve_credentials(&self) -> Credentials {
        Credentials {
            tracker_token: std::env::var(&self.tracker.token_env).ok(),
            tracker_owner: self.tracker.owner.clone(),
            tracker_repo: self.tracker.repo.clone(),
            ai_endpoint: Some(self.ai.base_url.clone()),
            ai_key: std::env::var(&self.ai.api_key_env).ok(),
            ai_deployment: Some(self.ai.model.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the bartleby-store JSONL/SQLite files.
    #[serde(rename = "store-dir")]
    pub store_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { store_dir: ".bartleby".to_string() }
    }
}

/// Which tracker (WorkSource) to talk to and where its credentials live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub provider: String,
    pub owner: Option<String>,
    pub repo: Option<String>,
    #[serde(rename = "token-env")]
    pub token_env: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            provider: "github".to_string(),
            owner: None,
            repo: None,
            token_env: "BARTLEBY_TRACKER_TOKEN".to_string(),
        }
    }
}

/// AI provider endpoint/model and where its key lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: String,
    pub model: String,
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,
    #[serde(rename = "base-url")]
    pub base_url: String,
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8192,
            timeout_ms: 300_000,
        }
    }
}
