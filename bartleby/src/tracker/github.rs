//! GitHub-shaped [`WorkSource`]: issues as work items, labels as status.
//!
//! Hit directly with `reqwest` against `api.github.com` — there is no
//! GitHub SDK crate anywhere in this workspace's dependency stack, so
//! this follows the same plain-HTTP shape as [`crate::ai::AnthropicProvider`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::TrackerConfig;
use crate::domain::{WorkItem, WorkItemStatus};
use crate::ports::{WorkSource, WorkSourceError};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Exponential backoff with jitter, matching [`crate::ai::anthropic`]'s
/// retry policy.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
    let jitter_range = base / 4;
    let jitter = rand::random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
    Duration::from_millis((base as i64 + jitter).max(0) as u64)
}

const STATUS_LABELS: &[(WorkItemStatus, &str)] = &[
    (WorkItemStatus::InProgress, "bartleby:in-progress"),
    (WorkItemStatus::Blocked, "bartleby:blocked"),
    (WorkItemStatus::Failed, "bartleby:failed"),
    (WorkItemStatus::Ready, "bartleby:ready"),
];

/// Unprefixed synonyms accepted on read, per the same mapping.
fn status_for_label(label: &str) -> Option<WorkItemStatus> {
    let bare = label.strip_prefix("bartleby:").unwrap_or(label);
    match bare {
        "in-progress" | "in_progress" => Some(WorkItemStatus::InProgress),
        "blocked" => Some(WorkItemStatus::Blocked),
        "failed" => Some(WorkItemStatus::Failed),
        "ready" => Some(WorkItemStatus::Ready),
        _ => None,
    }
}

fn label_for_status(status: WorkItemStatus) -> Option<&'static str> {
    STATUS_LABELS.iter().find(|(s, _)| *s == status).map(|(_, label)| *label)
}

fn status_from_labels(labels: &[String]) -> WorkItemStatus {
    labels.iter().find_map(|l| status_for_label(l)).unwrap_or(WorkItemStatus::Pending)
}

pub struct GitHubTracker {
    owner: String,
    repo: String,
    token: String,
    http: Client,
    base_url: String,
}

impl GitHubTracker {
    pub fn new(config: &TrackerConfig, token: String) -> Result<Self, WorkSourceError> {
        let owner = config.owner.clone().ok_or_else(|| WorkSourceError::Configuration("github".to_string()))?;
        let repo = config.repo.clone().ok_or_else(|| WorkSourceError::Configuration("github".to_string()))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("bartleby")
            .build()?;
        Ok(Self { owner, repo, token, http, base_url: "https://api.github.com".to_string() })
    }

    fn issues_url(&self) -> String {
        format!("{}/repos/{}/{}/issues?state=all&per_page=100", self.base_url, self.owner, self.repo)
    }

    fn issue_url(&self, number: u64) -> String {
        format!("{}/repos/{}/{}/issues/{}", self.base_url, self.owner, self.repo, number)
    }

    fn comments_url(&self, number: u64) -> String {
        format!("{}/repos/{}/{}/issues/{}/comments", self.base_url, self.owner, self.repo, number)
    }

    async fn request(&self, method: reqwest::Method, url: &str, body: Option<serde_json::Value>) -> Result<reqwest::Response, WorkSourceError> {
        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = backoff_with_jitter(attempt);
                warn!(attempt, backoff_ms = backoff.as_millis(), "GitHubTracker::request: retrying after transient error");
                tokio::time::sleep(backoff).await;
            }

            let mut req = self
                .http
                .request(method.clone(), url)
                .header("Authorization", format!("Bearer {}", self.token))
                .header("Accept", "application/vnd.github+json");
            if let Some(body) = &body {
                req = req.json(body);
            }

            let response = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    debug!(attempt, error = %e, "GitHubTracker::request: network error");
                    last_error = Some(WorkSourceError::Network(e));
                    continue;
                }
            };

            let status = response.status().as_u16();

            if status == 401 || status == 403 {
                let rate_limited = response
                    .headers()
                    .get("x-ratelimit-remaining")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v == "0")
                    .unwrap_or(false);
                if rate_limited {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(60);
                    return Err(WorkSourceError::RateLimited { retry_after: Duration::from_secs(retry_after) });
                }
                let text = response.text().await.unwrap_or_default();
                return Err(WorkSourceError::Authentication(text));
            }

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(WorkSourceError::RateLimited { retry_after: Duration::from_secs(retry_after) });
            }

            if matches!(status, 500 | 502 | 503 | 504) && attempt < MAX_RETRIES {
                let text = response.text().await.unwrap_or_default();
                debug!(attempt, status, "GitHubTracker::request: retryable error");
                last_error = Some(WorkSourceError::InvalidResponse(text));
                continue;
            }

            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(WorkSourceError::InvalidResponse(format!("status {}: {}", status, text)));
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or(WorkSourceError::InvalidResponse("max retries exceeded".to_string())))
    }
}

#[async_trait]
impl WorkSource for GitHubTracker {
    fn name(&self) -> &str {
        "github"
    }

    async fn sync(&self) -> Result<Vec<WorkItem>, WorkSourceError> {
        let response = self.request(reqwest::Method::GET, &self.issues_url(), None).await?;
        let issues: Vec<GitHubIssue> = response.json().await.map_err(|e| WorkSourceError::InvalidResponse(e.to_string()))?;

        let items = issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| {
                let labels: Vec<String> = issue.labels.into_iter().map(|l| l.name).collect();
                let mut item = WorkItem::from_external(issue.title, issue.body.unwrap_or_default(), "github", issue.number.to_string(), Some(issue.html_url));
                item.status = status_from_labels(&labels);
                item.labels = labels;
                item
            })
            .collect();

        Ok(items)
    }

    async fn update_status(&self, item: &WorkItem) -> Result<(), WorkSourceError> {
        let number: u64 = item
            .external_id()
            .ok_or_else(|| WorkSourceError::InvalidResponse("work item has no external id".to_string()))?
            .parse()
            .map_err(|_| WorkSourceError::InvalidResponse("github external id is not numeric".to_string()))?;

        let mut labels: Vec<String> = item.labels.iter().filter(|l| status_for_label(l).is_none()).cloned().collect();

        let mut body = serde_json::json!({});
        if item.status == WorkItemStatus::Complete {
            body["state"] = serde_json::json!("closed");
        } else {
            if let Some(label) = label_for_status(item.status) {
                labels.push(label.to_string());
            }
            body["labels"] = serde_json::json!(labels);
        }

        self.request(reqwest::Method::PATCH, &self.issue_url(number), Some(body)).await?;
        Ok(())
    }

    async fn add_comment(&self, item: &WorkItem, text: &str) -> Result<(), WorkSourceError> {
        let number: u64 = item
            .external_id()
            .ok_or_else(|| WorkSourceError::InvalidResponse("work item has no external id".to_string()))?
            .parse()
            .map_err(|_| WorkSourceError::InvalidResponse("github external id is not numeric".to_string()))?;

        let body = serde_json::json!({ "body": text });
        self.request(reqwest::Method::POST, &self.comments_url(number), Some(body)).await?;
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/repos/{}/{}", self.base_url, self.owner, self.repo);
        self.request(reqwest::Method::GET, &url, None).await.is_ok()
    }
}

#[derive(Debug, Deserialize)]
struct GitHubIssue {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
    labels: Vec<GitHubLabel>,
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
}
