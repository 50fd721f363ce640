mod cli;

pub use cli::CliGitService;
