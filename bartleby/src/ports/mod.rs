mod ai_provider;
mod git_service;
mod work_source;

pub use ai_provider::{AiExecutionResult, AiProvider, AiProviderError};
pub use git_service::{branch_name_for, GitOperationResult, GitService, GitServiceError};
pub use work_source::{WorkSource, WorkSourceError};
