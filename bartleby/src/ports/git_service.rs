use async_trait::async_trait;
use thiserror::Error;

use crate::domain::WorkItem;

#[derive(Debug, Error)]
pub enum GitServiceError {
    #[error("git command failed: {0}")]
    CommandFailed(String),

    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform result shape for every [`GitService`] operation, matching §6:
/// merge conflicts are reported through `has_conflicts`/`conflicting_files`
/// rather than as an `Err` — a conflict is a documented outcome, not a
/// failure to run the command.
#[derive(Debug, Clone, Default)]
pub struct GitOperationResult {
    pub success: bool,
    pub message: String,
    pub branch_name: Option<String>,
    pub commit_sha: Option<String>,
    pub has_conflicts: bool,
    pub conflicting_files: Vec<String>,
}

impl GitOperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), ..Default::default() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), ..Default::default() }
    }
}

/// Branch + commit on completion. One implementation, shelling out to the
/// `git` binary the way the teacher's `WorktreeManager` does.
#[async_trait]
pub trait GitService: Send + Sync {
    async fn is_git_repository(&self, dir: &str) -> bool;

    async fn initialize_repository(&self, dir: &str) -> Result<GitOperationResult, GitServiceError>;

    /// Branch name convention: `bartleby/<external-id-or-id-prefix>-<sanitised-title>`.
    async fn create_or_switch_to_branch(&self, item: &WorkItem, dir: &str) -> Result<GitOperationResult, GitServiceError>;

    /// Commit message follows conventional commits; first line <=72 chars,
    /// body includes the session summary and the modified-files list.
    async fn commit_changes(
        &self,
        item: &WorkItem,
        summary: &str,
        modified_files: &[String],
        dir: &str,
    ) -> Result<GitOperationResult, GitServiceError>;

    async fn push(&self, dir: &str, remote: &str) -> Result<GitOperationResult, GitServiceError>;

    async fn get_status(&self, dir: &str) -> Result<GitOperationResult, GitServiceError>;
}

/// Derive the `bartleby/...` branch name for an item, per §6. Exposed so
/// both the concrete adapter and its tests share one definition.
pub fn branch_name_for(item: &WorkItem) -> String {
    let stem = item.external_id().map(|s| s.to_string()).unwrap_or_else(|| item.id.chars().take(8).collect());
    let slug: String = item
        .title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        format!("bartleby/{stem}")
    } else {
        format!("bartleby/{stem}-{slug}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_prefers_external_id_over_id_prefix() {
        let item = WorkItem::from_external("Add OAuth Support", "d", "github", "42", None);
        assert_eq!(branch_name_for(&item), "bartleby/42-add-oauth-support");
    }

    #[test]
    fn branch_name_falls_back_to_id_prefix_without_external_ref() {
        let mut item = WorkItem::new("Add OAuth Support", "d");
        item.id = "abcdef123456-item-add-oauth-support".to_string();
        assert_eq!(branch_name_for(&item), "bartleby/abcdef12-add-oauth-support");
    }
}
