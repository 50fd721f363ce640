use std::collections::HashMap;

use bartleby_store::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// A clarification the AI raised while working an item. Resolved by a
/// human supplying an `answer`; `is_answered()` tracks that directly rather
/// than through a separate status field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedQuestion {
    pub id: String,
    pub work_item_id: String,
    pub question: String,
    pub context: Option<String>,
    pub answer: Option<String>,
    pub created_at: i64,
    pub answered_at: Option<i64>,
}

impl BlockedQuestion {
    pub fn new(work_item_id: impl Into<String>, question: impl Into<String>, context: Option<String>) -> Self {
        let question = question.into();
        Self {
            id: generate_id("question", &question),
            work_item_id: work_item_id.into(),
            question,
            context,
            answer: None,
            created_at: now_ms(),
            answered_at: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.answer.is_some()
    }

    pub fn answer(&mut self, answer: impl Into<String>) {
        self.answer = Some(answer.into());
        self.answered_at = Some(now_ms());
    }
}

impl Record for BlockedQuestion {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.answered_at.unwrap_or(self.created_at)
    }

    fn collection_name() -> &'static str {
        "blocked_questions"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("work_item_id".to_string(), IndexValue::String(self.work_item_id.clone()));
        fields.insert("answered".to_string(), IndexValue::Bool(self.is_answered()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_question_is_unanswered() {
        let q = BlockedQuestion::new("item-1", "Which database?", None);
        assert!(!q.is_answered());
        assert!(q.answered_at.is_none());
    }

    #[test]
    fn answering_sets_timestamp() {
        let mut q = BlockedQuestion::new("item-1", "Which database?", None);
        q.answer("Postgres");
        assert!(q.is_answered());
        assert_eq!(q.answer.as_deref(), Some("Postgres"));
        assert!(q.answered_at.is_some());
    }
}
