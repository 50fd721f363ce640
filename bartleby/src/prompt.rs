//! Assembles system/user prompts from item + provenance context, and
//! chooses the next [`TransformationType`] for an item (§4.4).

use crate::domain::{BlockedQuestion, TransformationType, WorkItem, WorkSession, SessionOutcome};

/// Everything the AI needs for one transformation call.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Picks the next transformation for an item from its unanswered-question
/// count and terminal session history. Returns `None` once Finalize has
/// already run — the item is expected to be Complete by then and no
/// further transformation should be issued.
pub fn get_next_transformation(sessions: &[WorkSession], has_unanswered_questions: bool) -> Option<TransformationType> {
    if has_unanswered_questions {
        return Some(TransformationType::AskClarification);
    }

    let done = |t: TransformationType| sessions.iter().any(|s| s.transformation == t && s.is_terminal());
    let last_outcome = sessions
        .iter()
        .filter(|s| s.is_terminal())
        .max_by_key(|s| s.started_at)
        .map(|s| s.outcome);

    if !done(TransformationType::Interpret) {
        return Some(TransformationType::Interpret);
    }
    if !done(TransformationType::Plan) {
        return Some(TransformationType::Plan);
    }
    if !done(TransformationType::Execute) {
        return Some(TransformationType::Execute);
    }
    if !done(TransformationType::Refine) && last_outcome != Some(SessionOutcome::Completed) {
        return Some(TransformationType::Refine);
    }
    if !done(TransformationType::Finalize) {
        return Some(TransformationType::Finalize);
    }
    None
}

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        item: &WorkItem,
        transformation: TransformationType,
        working_dir: &str,
        prior_sessions: &[WorkSession],
        answered_questions: &[BlockedQuestion],
        additional_instructions: Option<&str>,
    ) -> PromptContext {
        PromptContext {
            system_prompt: system_prompt(transformation, working_dir),
            user_prompt: user_prompt(item, prior_sessions, answered_questions, additional_instructions),
        }
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn system_prompt(transformation: TransformationType, working_dir: &str) -> String {
    let role = match transformation {
        TransformationType::Interpret => {
            "Read the work item and restate what is being asked in concrete, unambiguous terms. Identify anything that is missing or contradictory before any plan is made."
        }
        TransformationType::Plan => {
            "Produce a step-by-step implementation plan for the work item. Do not modify any files yet."
        }
        TransformationType::Execute => {
            "Carry out the plan against the working directory. Make the minimal set of changes required."
        }
        TransformationType::Refine => {
            "Review the changes already made against the work item and correct anything incomplete or incorrect."
        }
        TransformationType::AskClarification => {
            "Answers to your previous questions are now available below. Resume the work item using them."
        }
        TransformationType::Finalize => {
            "Confirm the work item is fully satisfied, clean up any stray artifacts, and summarise the result."
        }
    };

    format!(
        "You are an autonomous engineering agent working in the directory \"{working_dir}\". {role}\n\n\
         Respond with a single JSON object and nothing else, with keys:\n\
         - \"outcome\": one of \"completed\", \"blocked\", \"needs_context\"\n\
         - \"summary\": a short human-readable account of what you did or found\n\
         - \"modified_files\": a list of file paths you changed, if any\n\
         - \"questions\": a list of clarifying questions, required when outcome is \"blocked\" or \"needs_context\", otherwise empty"
    )
}

fn user_prompt(
    item: &WorkItem,
    prior_sessions: &[WorkSession],
    answered_questions: &[BlockedQuestion],
    additional_instructions: Option<&str>,
) -> String {
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n{}\n", item.title, item.description));

    if !item.labels.is_empty() {
        out.push_str(&format!("\nLabels: {}\n", item.labels.join(", ")));
    }

    if let Some(ext) = &item.external {
        if let Some(url) = &ext.external_url {
            out.push_str(&format!("\nSource: {url}\n"));
        }
    }

    if !prior_sessions.is_empty() {
        out.push_str("\n## Prior sessions\n");
        for session in prior_sessions {
            out.push_str(&format!(
                "- {} ({}): {}\n",
                session.transformation, session.outcome, session.summary
            ));
        }
    }

    if !answered_questions.is_empty() {
        out.push_str("\n## Answered questions\n");
        for q in answered_questions {
            out.push_str(&format!("Q: {}\nA: {}\n", q.question, q.answer.as_deref().unwrap_or("")));
        }
    }

    if let Some(instructions) = additional_instructions {
        out.push_str(&format!("\n## Additional instructions\n{instructions}\n"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal_session(transformation: TransformationType, outcome: SessionOutcome) -> WorkSession {
        let mut session = WorkSession::start("item-1", transformation);
        match outcome {
            SessionOutcome::Completed => session.complete("done", vec![], 10),
            SessionOutcome::Blocked => session.block("blocked", 10),
            SessionOutcome::Failed => session.fail("failed", "boom", 10),
            SessionOutcome::InProgress => unreachable!(),
        }
        session
    }

    #[test]
    fn empty_history_starts_with_interpret() {
        assert_eq!(get_next_transformation(&[], false), Some(TransformationType::Interpret));
    }

    #[test]
    fn unanswered_questions_always_win() {
        let sessions = vec![terminal_session(TransformationType::Interpret, SessionOutcome::Completed)];
        assert_eq!(get_next_transformation(&sessions, true), Some(TransformationType::AskClarification));
    }

    #[test]
    fn progresses_through_interpret_plan_execute() {
        let sessions = vec![terminal_session(TransformationType::Interpret, SessionOutcome::Completed)];
        assert_eq!(get_next_transformation(&sessions, false), Some(TransformationType::Plan));

        let sessions = vec![
            terminal_session(TransformationType::Interpret, SessionOutcome::Completed),
            terminal_session(TransformationType::Plan, SessionOutcome::Completed),
        ];
        assert_eq!(get_next_transformation(&sessions, false), Some(TransformationType::Execute));
    }

    #[test]
    fn execute_not_completed_goes_to_refine() {
        let sessions = vec![
            terminal_session(TransformationType::Interpret, SessionOutcome::Completed),
            terminal_session(TransformationType::Plan, SessionOutcome::Completed),
            terminal_session(TransformationType::Execute, SessionOutcome::Blocked),
        ];
        assert_eq!(get_next_transformation(&sessions, false), Some(TransformationType::Refine));
    }

    #[test]
    fn execute_completed_skips_refine_straight_to_finalize() {
        let sessions = vec![
            terminal_session(TransformationType::Interpret, SessionOutcome::Completed),
            terminal_session(TransformationType::Plan, SessionOutcome::Completed),
            terminal_session(TransformationType::Execute, SessionOutcome::Completed),
        ];
        assert_eq!(get_next_transformation(&sessions, false), Some(TransformationType::Finalize));
    }

    #[test]
    fn finalize_is_terminal() {
        let sessions = vec![
            terminal_session(TransformationType::Interpret, SessionOutcome::Completed),
            terminal_session(TransformationType::Plan, SessionOutcome::Completed),
            terminal_session(TransformationType::Execute, SessionOutcome::Completed),
            terminal_session(TransformationType::Finalize, SessionOutcome::Completed),
        ];
        assert_eq!(get_next_transformation(&sessions, false), None);
    }

    #[test]
    fn user_prompt_includes_qa_pairs_and_instructions() {
        let item = WorkItem::new("Add OAuth", "Support login via OAuth");
        let mut q = BlockedQuestion::new(&item.id, "Which provider?", None);
        q.answer("GitHub");
        let prompt = user_prompt(&item, &[], &[q], Some("Keep it minimal"));
        assert!(prompt.contains("Q: Which provider?"));
        assert!(prompt.contains("A: GitHub"));
        assert!(prompt.contains("Keep it minimal"));
    }
}
