//! Selects the next transformation for an item, assembles its context,
//! invokes the [`AiProvider`] port, and interprets the structured
//! response (§4.5). Owns the write-before-call provenance guarantee:
//! every invocation leaves exactly one [`WorkSession`] row, even on
//! cancellation.

use std::sync::Arc;

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::domain::{BlockedQuestion, TransformationType, WorkItem, WorkSession};
use crate::ports::{AiExecutionResult, AiProvider, AiProviderError};
use crate::prompt::{get_next_transformation, PromptBuilder, PromptContext};
use crate::repository::{BlockedQuestionRepository, WorkItemRepository, WorkSessionRepository};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("work item {0} not found")]
    ItemNotFound(String),

    #[error(transparent)]
    Store(#[from] bartleby_store::StoreError),

    #[error(transparent)]
    AiProvider(#[from] AiProviderError),
}

/// What `BuildContext` assembles for one `Execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub item: WorkItem,
    pub transformation: TransformationType,
    pub working_dir: String,
    pub prompt: PromptContext,
}

/// How the interpreted response should move the item's status. Kept
/// distinct from a raw `WorkItemStatus` so the caller uses
/// `WorkItem::mark_blocked`/`unblock` rather than overwriting
/// `previous_status` by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    NoChange,
    Blocked,
    Complete,
}

#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub session: WorkSession,
    pub status_update: StatusUpdate,
    pub questions_created: Vec<BlockedQuestion>,
}

pub struct WorkExecutor {
    ai: Arc<dyn AiProvider>,
    items: WorkItemRepository,
    sessions: WorkSessionRepository,
    questions: BlockedQuestionRepository,
    prompts: PromptBuilder,
}

impl WorkExecutor {
    pub fn new(
        ai: Arc<dyn AiProvider>,
        items: WorkItemRepository,
        sessions: WorkSessionRepository,
        questions: BlockedQuestionRepository,
    ) -> Self {
        Self { ai, items, sessions, questions, prompts: PromptBuilder::new() }
    }

    /// `GetNextTransformation` (§4.4): `None` once Finalize has already run.
    pub fn next_transformation(&self, item_id: &str) -> Result<Option<TransformationType>, ExecutorError> {
        let prior_sessions = self.sessions.list_for_item(item_id)?;
        let unanswered = self.questions.list_unanswered_for_item(item_id)?;
        Ok(get_next_transformation(&prior_sessions, !unanswered.is_empty()))
    }

    pub fn build_context(
        &self,
        item_id: &str,
        transformation: TransformationType,
        working_dir: &str,
        additional_instructions: Option<&str>,
    ) -> Result<Option<ExecutionContext>, ExecutorError> {
        let Some(item) = self.items.get(item_id)? else {
            return Ok(None);
        };
        let prior_sessions = self.sessions.list_for_item(item_id)?;
        let answered = self.questions.list_answered_for_item(item_id)?;
        let prompt = self.prompts.build(&item, transformation, working_dir, &prior_sessions, &answered, additional_instructions);
        Ok(Some(ExecutionContext { item, transformation, working_dir: working_dir.to_string(), prompt }))
    }

    /// Writes the `InProgress` session row before calling the AI, then
    /// finalizes it with whatever happens — including cancellation.
    pub async fn execute(&self, context: ExecutionContext, token: CancellationToken) -> Result<ExecutionRecord, ExecutorError> {
        let mut session = WorkSession::start(&context.item.id, context.transformation);
        self.sessions.create(session.clone())?;

        let outcome = tokio::select! {
            res = self.ai.execute_work(&context.item, context.transformation, &context.working_dir, &context.prompt) => res,
            _ = token.cancelled() => Err(AiProviderError::Cancelled),
        };

        let (status_update, questions_created) = match outcome {
            Ok(raw) => apply_success(&mut session, context.transformation, &context.item.id, &raw),
            Err(err) => {
                warn!(item_id = %context.item.id, error = %err, "WorkExecutor::execute: AI call failed");
                session.fail(format!("AI call failed: {err}"), err.to_string(), 0);
                (StatusUpdate::NoChange, Vec::new())
            }
        };

        self.sessions.update(session.clone())?;
        for question in &questions_created {
            self.questions.create(question.clone())?;
        }

        debug!(item_id = %context.item.id, ?status_update, "WorkExecutor::execute: finished");
        Ok(ExecutionRecord { session, status_update, questions_created })
    }

    /// Persist a session row the Orchestrator amended after the fact —
    /// currently just `commit_sha` once a completed item's changes land.
    pub fn record_commit(&self, session: WorkSession) -> Result<(), ExecutorError> {
        self.sessions.update(session)?;
        Ok(())
    }
}

fn apply_success(
    session: &mut WorkSession,
    transformation: TransformationType,
    item_id: &str,
    raw: &AiExecutionResult,
) -> (StatusUpdate, Vec<BlockedQuestion>) {
    if !raw.success {
        session.fail(
            format!("unparseable AI response: {}", raw.error_message.as_deref().unwrap_or("no diagnostic")),
            raw.error_message.clone().unwrap_or_default(),
            raw.tokens_used,
        );
        return (StatusUpdate::NoChange, Vec::new());
    }

    match raw.outcome.as_str() {
        "completed" => {
            session.complete(raw.summary.clone(), raw.modified_files.clone(), raw.tokens_used);
            let status = if transformation == TransformationType::Finalize { StatusUpdate::Complete } else { StatusUpdate::NoChange };
            (status, Vec::new())
        }
        "blocked" => {
            let questions = materialize_questions(item_id, &raw.questions);
            session.block(raw.summary.clone(), raw.tokens_used);
            (StatusUpdate::Blocked, questions)
        }
        other => {
            if other != "needs_context" {
                debug!(outcome = other, "WorkExecutor::apply_success: unknown outcome, defaulting to needs_context");
            }
            let mut prompts = raw.questions.clone();
            if prompts.iter().all(|q| q.trim().is_empty()) {
                prompts = vec!["What additional context do you need to proceed?".to_string()];
            }
            let questions = materialize_questions(item_id, &prompts);
            session.block(raw.summary.clone(), raw.tokens_used);
            (StatusUpdate::Blocked, questions)
        }
    }
}

fn materialize_questions(item_id: &str, questions: &[String]) -> Vec<BlockedQuestion> {
    questions
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .map(|q| BlockedQuestion::new(item_id, q, None))
        .collect()
}

/// Progressive JSON extraction (§4.5): whole trimmed text if it is
/// already an object; else the first fenced ```json block; else the
/// substring spanning the first `{` through the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(captures) = FENCE_RE.captures(trimmed) {
        if let Some(m) = captures.get(1) {
            return Some(m.as_str());
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if start < end {
        Some(&trimmed[start..=end])
    } else {
        None
    }
}

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

#[derive(Debug, Deserialize)]
struct RawTransformationResponse {
    outcome: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    modified_files: Vec<String>,
    #[serde(default)]
    questions: Vec<String>,
}

/// Turn raw completion text into an [`AiExecutionResult`]. Shared by every
/// concrete [`AiProvider`] adapter so JSON extraction behaves identically
/// across backends; `success = false` is the signal `WorkExecutor`
/// interprets as an unparseable payload.
pub fn parse_ai_response(raw_text: &str, tokens_used: u64) -> AiExecutionResult {
    let Some(json_str) = extract_json_object(raw_text) else {
        return AiExecutionResult {
            success: false,
            outcome: String::new(),
            summary: String::new(),
            modified_files: Vec::new(),
            questions: Vec::new(),
            error_message: Some(raw_text.to_string()),
            tokens_used,
        };
    };

    match serde_json::from_str::<RawTransformationResponse>(json_str) {
        Ok(payload) => AiExecutionResult {
            success: true,
            outcome: payload.outcome,
            summary: payload.summary,
            modified_files: payload.modified_files,
            questions: payload.questions,
            error_message: None,
            tokens_used,
        },
        Err(err) => AiExecutionResult {
            success: false,
            outcome: String::new(),
            summary: String::new(),
            modified_files: Vec::new(),
            questions: Vec::new(),
            error_message: Some(format!("{err}: {raw_text}")),
            tokens_used,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(outcome: &str, questions: Vec<&str>) -> AiExecutionResult {
        AiExecutionResult {
            success: true,
            outcome: outcome.to_string(),
            summary: "did stuff".to_string(),
            modified_files: vec!["src/lib.rs".to_string()],
            questions: questions.into_iter().map(String::from).collect(),
            error_message: None,
            tokens_used: 42,
        }
    }

    #[test]
    fn completed_execute_does_not_complete_item_unless_finalize() {
        let mut session = WorkSession::start("item-1", TransformationType::Execute);
        let (status, questions) = apply_success(&mut session, TransformationType::Execute, "item-1", &sample_result("completed", vec![]));
        assert_eq!(status, StatusUpdate::NoChange);
        assert!(questions.is_empty());
    }

    #[test]
    fn completed_finalize_completes_item() {
        let mut session = WorkSession::start("item-1", TransformationType::Finalize);
        let (status, _) = apply_success(&mut session, TransformationType::Finalize, "item-1", &sample_result("completed", vec![]));
        assert_eq!(status, StatusUpdate::Complete);
    }

    #[test]
    fn blocked_creates_one_question_per_non_empty_string() {
        let mut session = WorkSession::start("item-1", TransformationType::Plan);
        let (status, questions) = apply_success(&mut session, TransformationType::Plan, "item-1", &sample_result("blocked", vec!["Which db?", "  ", "Which region?"]));
        assert_eq!(status, StatusUpdate::Blocked);
        assert_eq!(questions.len(), 2);
    }

    #[test]
    fn needs_context_with_no_questions_gets_generic_question() {
        let mut session = WorkSession::start("item-1", TransformationType::Interpret);
        let (status, questions) = apply_success(&mut session, TransformationType::Interpret, "item-1", &sample_result("needs_context", vec![]));
        assert_eq!(status, StatusUpdate::Blocked);
        assert_eq!(questions.len(), 1);
    }

    #[test]
    fn unknown_outcome_defaults_to_needs_context_behavior() {
        let mut session = WorkSession::start("item-1", TransformationType::Interpret);
        let (status, questions) = apply_success(&mut session, TransformationType::Interpret, "item-1", &sample_result("mystery", vec!["What now?"]));
        assert_eq!(status, StatusUpdate::Blocked);
        assert_eq!(questions.len(), 1);
    }

    #[test]
    fn unsuccessful_raw_result_fails_session_without_status_change() {
        let mut session = WorkSession::start("item-1", TransformationType::Interpret);
        let raw = AiExecutionResult {
            success: false,
            outcome: String::new(),
            summary: String::new(),
            modified_files: vec![],
            questions: vec![],
            error_message: Some("not json at all".to_string()),
            tokens_used: 0,
        };
        let (status, questions) = apply_success(&mut session, TransformationType::Interpret, "item-1", &raw);
        assert_eq!(status, StatusUpdate::NoChange);
        assert!(questions.is_empty());
        assert_eq!(session.outcome, crate::domain::SessionOutcome::Failed);
    }

    #[test]
    fn unsuccessful_raw_result_still_charges_tokens_that_were_spent() {
        let mut session = WorkSession::start("item-1", TransformationType::Interpret);
        let raw = AiExecutionResult {
            success: false,
            outcome: String::new(),
            summary: String::new(),
            modified_files: vec![],
            questions: vec![],
            error_message: Some("not json at all".to_string()),
            tokens_used: 512,
        };
        apply_success(&mut session, TransformationType::Interpret, "item-1", &raw);
        assert_eq!(session.outcome, crate::domain::SessionOutcome::Failed);
        assert_eq!(session.tokens_used, 512);
    }

    #[test]
    fn extract_plain_object() {
        let text = r#"{"outcome":"completed","summary":"ok"}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn extract_fenced_block() {
        let text = "Here you go:\n```json\n{\"outcome\": \"blocked\"}\n```\nthanks";
        assert_eq!(extract_json_object(text), Some(r#"{"outcome": "blocked"}"#));
    }

    #[test]
    fn extract_surrounded_by_prose() {
        let text = "Sure thing! {\"outcome\":\"completed\"} hope that helps";
        assert_eq!(extract_json_object(text), Some(r#"{"outcome":"completed"}"#));
    }

    #[test]
    fn parse_unparseable_marks_failure() {
        let result = parse_ai_response("I couldn't do this task.", 10);
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("I couldn't do this task."));
    }

    #[test]
    fn parse_well_formed_payload() {
        let result = parse_ai_response(r#"{"outcome":"completed","summary":"done","modified_files":["a.rs"],"questions":[]}"#, 7);
        assert!(result.success);
        assert_eq!(result.outcome, "completed");
        assert_eq!(result.modified_files, vec!["a.rs".to_string()]);
        assert_eq!(result.tokens_used, 7);
    }
}
