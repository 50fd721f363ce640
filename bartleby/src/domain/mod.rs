mod blocked_question;
mod id;
mod settings;
mod work_item;
mod work_session;

pub use blocked_question::BlockedQuestion;
pub use id::generate_id;
pub use settings::{AppSettings, Credentials, GitSettings, OrchestratorSettings, QuietHours, TokenBudget, SETTINGS_ID};
pub use work_item::{ExternalRef, WorkItem, WorkItemStatus};
pub use work_session::{SessionOutcome, TransformationType, WorkSession};
