//! [`GitService`] implemented by shelling out to the `git` binary, the way
//! the teacher's worktree manager drives every git operation through
//! `tokio::process::Command` rather than a git library crate.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::WorkItem;
use crate::ports::{branch_name_for, GitOperationResult, GitService, GitServiceError};

#[derive(Debug, Clone, Default)]
pub struct CliGitService;

impl CliGitService {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, dir: &str, args: &[&str]) -> Result<std::process::Output, GitServiceError> {
        debug!(dir, ?args, "CliGitService::run");
        Command::new("git").args(args).current_dir(dir).output().await.map_err(GitServiceError::from)
    }

    async fn conflicting_files(&self, dir: &str) -> Vec<String> {
        let Ok(output) = self.run(dir, &["status", "--porcelain"]).await else {
            return Vec::new();
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| {
                let prefix = &line.as_bytes()[..line.len().min(2)];
                matches!(prefix, b"UU" | b"AA" | b"DD" | b"AU" | b"UA" | b"DU" | b"UD")
            })
            .map(|line| line[3..].trim().to_string())
            .collect()
    }
}

#[async_trait]
impl GitService for CliGitService {
    async fn is_git_repository(&self, dir: &str) -> bool {
        match self.run(dir, &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(output) => output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true",
            Err(_) => false,
        }
    }

    async fn initialize_repository(&self, dir: &str) -> Result<GitOperationResult, GitServiceError> {
        let output = self.run(dir, &["init"]).await?;
        if output.status.success() {
            Ok(GitOperationResult::ok("initialized repository"))
        } else {
            Ok(GitOperationResult::failure(String::from_utf8_lossy(&output.stderr).to_string()))
        }
    }

    async fn create_or_switch_to_branch(&self, item: &WorkItem, dir: &str) -> Result<GitOperationResult, GitServiceError> {
        let branch = branch_name_for(item);

        let exists = self
            .run(dir, &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .await?
            .status
            .success();

        let output = if exists {
            self.run(dir, &["checkout", &branch]).await?
        } else {
            self.run(dir, &["checkout", "-b", &branch]).await?
        };

        if output.status.success() {
            let mut result = GitOperationResult::ok(format!("switched to branch {branch}"));
            result.branch_name = Some(branch);
            Ok(result)
        } else {
            Ok(GitOperationResult::failure(String::from_utf8_lossy(&output.stderr).to_string()))
        }
    }

    async fn commit_changes(
        &self,
        item: &WorkItem,
        summary: &str,
        modified_files: &[String],
        dir: &str,
    ) -> Result<GitOperationResult, GitServiceError> {
        let add_args: Vec<&str> = if modified_files.is_empty() {
            vec!["add", "-A"]
        } else {
            let mut args = vec!["add"];
            args.extend(modified_files.iter().map(String::as_str));
            args
        };
        let add_output = self.run(dir, &add_args).await?;
        if !add_output.status.success() {
            return Ok(GitOperationResult::failure(String::from_utf8_lossy(&add_output.stderr).to_string()));
        }

        let staged = self.run(dir, &["diff", "--cached", "--name-only"]).await?;
        if String::from_utf8_lossy(&staged.stdout).trim().is_empty() {
            return Ok(GitOperationResult::ok("nothing to commit"));
        }

        let subject = summary.lines().next().unwrap_or(summary).chars().take(72).collect::<String>();
        let subject = format!("feat({}): {}", item.id, subject);
        let body = if modified_files.is_empty() {
            summary.to_string()
        } else {
            format!("{summary}\n\nModified files:\n{}", modified_files.iter().map(|f| format!("- {f}")).collect::<Vec<_>>().join("\n"))
        };

        let commit_output = self.run(dir, &["commit", "-m", &subject, "-m", &body]).await?;
        if !commit_output.status.success() {
            return Ok(GitOperationResult::failure(String::from_utf8_lossy(&commit_output.stderr).to_string()));
        }

        let sha_output = self.run(dir, &["rev-parse", "HEAD"]).await?;
        let sha = String::from_utf8_lossy(&sha_output.stdout).trim().to_string();

        let mut result = GitOperationResult::ok(format!("committed {sha}"));
        result.commit_sha = Some(sha);
        Ok(result)
    }

    async fn push(&self, dir: &str, remote: &str) -> Result<GitOperationResult, GitServiceError> {
        let push_output = self.run(dir, &["push", remote, "HEAD"]).await?;
        if push_output.status.success() {
            return Ok(GitOperationResult::ok("pushed"));
        }

        let rebase_output = self.run(dir, &["pull", "--rebase", remote]).await?;
        if !rebase_output.status.success() {
            let conflicts = self.conflicting_files(dir).await;
            if !conflicts.is_empty() {
                let mut result = GitOperationResult::failure("rebase produced conflicts");
                result.has_conflicts = true;
                result.conflicting_files = conflicts;
                return Ok(result);
            }
            return Ok(GitOperationResult::failure(String::from_utf8_lossy(&rebase_output.stderr).to_string()));
        }

        let retry_output = self.run(dir, &["push", remote, "HEAD"]).await?;
        if retry_output.status.success() {
            Ok(GitOperationResult::ok("pushed after rebase"))
        } else {
            Ok(GitOperationResult::failure(String::from_utf8_lossy(&retry_output.stderr).to_string()))
        }
    }

    async fn get_status(&self, dir: &str) -> Result<GitOperationResult, GitServiceError> {
        let output = self.run(dir, &["status", "--porcelain"]).await?;
        if !output.status.success() {
            return Ok(GitOperationResult::failure(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        let conflicts = self.conflicting_files(dir).await;
        let mut result = GitOperationResult::ok(String::from_utf8_lossy(&output.stdout).to_string());
        result.has_conflicts = !conflicts.is_empty();
        result.conflicting_files = conflicts;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command as TokioCommand;

    async fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "bartleby@example.com"],
            vec!["config", "user.name", "bartleby"],
        ] {
            TokioCommand::new("git").args(&args).current_dir(path).output().await.unwrap();
        }
        std::fs::write(path.join("README.md"), "hello\n").unwrap();
        TokioCommand::new("git").args(["add", "-A"]).current_dir(path).output().await.unwrap();
        TokioCommand::new("git").args(["commit", "-m", "initial"]).current_dir(path).output().await.unwrap();
        dir
    }

    #[tokio::test]
    async fn detects_a_git_repository() {
        let dir = init_repo().await;
        let service = CliGitService::new();
        assert!(service.is_git_repository(dir.path().to_str().unwrap()).await);
    }

    #[tokio::test]
    async fn non_repository_directory_is_reported_as_such() {
        let dir = tempfile::TempDir::new().unwrap();
        let service = CliGitService::new();
        assert!(!service.is_git_repository(dir.path().to_str().unwrap()).await);
    }

    #[tokio::test]
    async fn branch_then_commit_round_trip_yields_a_sha() {
        let dir = init_repo().await;
        let service = CliGitService::new();
        let item = WorkItem::from_external("Add OAuth Support", "d", "github", "42", None);
        let path = dir.path().to_str().unwrap();

        let branch = service.create_or_switch_to_branch(&item, path).await.unwrap();
        assert!(branch.success);
        assert_eq!(branch.branch_name.as_deref(), Some("bartleby/42-add-oauth-support"));

        std::fs::write(dir.path().join("new.txt"), "content\n").unwrap();
        let commit = service.commit_changes(&item, "Added OAuth support", &["new.txt".to_string()], path).await.unwrap();
        assert!(commit.success);
        assert!(commit.commit_sha.is_some());
    }

    #[tokio::test]
    async fn committing_with_nothing_staged_is_a_success_no_op() {
        let dir = init_repo().await;
        let service = CliGitService::new();
        let item = WorkItem::new("t", "d");
        let commit = service.commit_changes(&item, "no changes", &[], dir.path().to_str().unwrap()).await.unwrap();
        assert!(commit.success);
        assert!(commit.commit_sha.is_none());
    }
}
