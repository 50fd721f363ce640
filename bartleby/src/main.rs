//! CLI entry point: load configuration, wire the ports and services
//! together, and dispatch one [`bartleby::cli::Command`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result, eyre};
use tracing::{info, warn};

use bartleby::ai::AnthropicProvider;
use bartleby::cli::{Cli, Command, GraphCommand, ItemsCommand, OutputFormat, QuestionsCommand};
use bartleby::config::Config;
use bartleby::domain::{AppSettings, WorkItemStatus};
use bartleby::events::{EventLogger, create_event_bus};
use bartleby::executor::WorkExecutor;
use bartleby::git::CliGitService;
use bartleby::graph::{DependencyResolver, GraphStore};
use bartleby::orchestrator::Orchestrator;
use bartleby::ports::{AiProvider, GitService, WorkSource};
use bartleby::repository::{BlockedQuestionRepository, SettingsRepository, WorkItemRepository, WorkSessionRepository, open_store};
use bartleby::sync::{SyncRunOutcome, SyncService};
use bartleby::tracker::GitHubTracker;

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    let level = cli_log_level.map(str::to_string).or_else(|| std::env::var("BARTLEBY_LOG").ok()).unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .init();
    Ok(())
}

/// Seed the settings singleton from `config` on first run only; on
/// subsequent runs, only credentials (env-sourced, never persisted
/// stable) and the graph file path are refreshed from the config file.
fn bootstrap_settings(settings_repo: &SettingsRepository, config: &Config) -> Result<AppSettings> {
    let credentials = config.resolve_credentials();
    let settings = match settings_repo.try_load()? {
        None => {
            info!("bootstrap_settings: no settings row found, seeding from config");
            AppSettings {
                orchestrator: config.orchestrator.clone(),
                quiet_hours: config.quiet_hours.clone(),
                token_budget: config.token_budget.clone(),
                git: config.git.clone(),
                graph_file_path: config.graph_file_path.clone(),
                credentials,
                ..AppSettings::default()
            }
        }
        Some(mut existing) => {
            existing.credentials = credentials;
            existing.graph_file_path = config.graph_file_path.clone();
            existing
        }
    };
    Ok(settings_repo.save(settings)?)
}

fn build_tracker(config: &Config, settings: &AppSettings) -> Result<Arc<dyn WorkSource>> {
    match config.tracker.provider.as_str() {
        "github" => {
            let token = settings.credentials.tracker_token.clone().ok_or_else(|| eyre!("tracker token not set (env var {})", config.tracker.token_env))?;
            Ok(Arc::new(GitHubTracker::new(&config.tracker, token)?))
        }
        other => Err(eyre!("unsupported tracker provider: {other}")),
    }
}

fn build_ai_provider(config: &Config, settings: &AppSettings) -> Result<Arc<dyn AiProvider>> {
    match config.ai.provider.as_str() {
        "anthropic" => {
            let key = settings.credentials.ai_key.clone().ok_or_else(|| eyre!("AI api key not set (env var {})", config.ai.api_key_env))?;
            Ok(Arc::new(AnthropicProvider::new(&config.ai, key)?))
        }
        other => Err(eyre!("unsupported AI provider: {other}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref())?;

    let config = Config::load(cli.config.as_ref()).context("loading config")?;

    if let Command::Init = cli.command {
        return run_init(&config);
    }

    let store = open_store(&config.storage.store_dir).context("opening store")?;
    let items = WorkItemRepository::new(store.clone());
    let questions = BlockedQuestionRepository::new(store.clone());
    let sessions = WorkSessionRepository::new(store.clone());
    let settings_repo = SettingsRepository::new(store);

    let settings = bootstrap_settings(&settings_repo, &config)?;

    let events = create_event_bus();
    let log_path = PathBuf::from(&config.storage.store_dir).join("events.jsonl");
    let logger = EventLogger::open(&log_path).context("opening event log")?;
    tokio::spawn(logger.run(events.clone(), log_path));

    match cli.command {
        Command::Init => unreachable!("handled above"),
        Command::Run => run_orchestrator(&config, &settings, items, sessions, questions, settings_repo, events).await,
        Command::Tick => {
            let orch = build_orchestrator(&config, &settings, items, sessions, questions, settings_repo, events)?;
            orch.start().await;
            orch.tick().await?;
            println!("{}", orch.stats().await.state);
            Ok(())
        }
        Command::Sync => run_sync(&config, &settings, items, settings_repo, events).await,
        Command::Status { format } => run_status(&config, &settings, items, sessions, questions, settings_repo, events, format).await,
        Command::Graph { command } => run_graph_command(&config, &items, command),
        Command::Items { command } => run_items_command(&items, &sessions, command),
        Command::Questions { command } => run_questions_command(&items, &questions, command),
    }
}

fn run_init(config: &Config) -> Result<()> {
    let config_path = PathBuf::from(".bartleby.yml");
    if config_path.exists() {
        println!("{} already exists, leaving it untouched", config_path.display());
    } else {
        std::fs::write(&config_path, serde_yaml::to_string(config)?)?;
        println!("wrote {}", config_path.display());
    }

    let graph_path = PathBuf::from(&config.graph_file_path);
    if graph_path.exists() {
        println!("{} already exists, leaving it untouched", graph_path.display());
    } else {
        std::fs::write(&graph_path, "@startuml\n@enduml\n")?;
        println!("wrote {}", graph_path.display());
    }

    std::fs::create_dir_all(&config.storage.store_dir)?;
    println!("store directory ready at {}", config.storage.store_dir);
    Ok(())
}

fn build_orchestrator(
    config: &Config,
    settings: &AppSettings,
    items: WorkItemRepository,
    sessions: WorkSessionRepository,
    questions: BlockedQuestionRepository,
    settings_repo: SettingsRepository,
    events: Arc<bartleby::events::EventBus>,
) -> Result<Orchestrator> {
    let ai = build_ai_provider(config, settings)?;
    let executor = WorkExecutor::new(ai, items.clone(), sessions, questions);
    let graph_store = GraphStore::new(&config.graph_file_path);
    let git: Option<Arc<dyn GitService>> = Some(Arc::new(CliGitService::new()));
    Ok(Orchestrator::new(items, settings_repo, graph_store, executor, git, events))
}

async fn run_orchestrator(
    config: &Config,
    settings: &AppSettings,
    items: WorkItemRepository,
    sessions: WorkSessionRepository,
    questions: BlockedQuestionRepository,
    settings_repo: SettingsRepository,
    events: Arc<bartleby::events::EventBus>,
) -> Result<()> {
    let orch = Arc::new(build_orchestrator(config, settings, items, sessions, questions, settings_repo, events)?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let interval_minutes = settings.orchestrator.interval_minutes;

    let run_orch = orch.clone();
    let run_handle = tokio::spawn(async move { run_orch.run(interval_minutes, shutdown_rx).await });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("main: shutdown requested, stopping orchestrator");
    orch.stop().await;
    let _ = shutdown_tx.send(()).await;

    run_handle.await.context("joining orchestrator task")??;
    Ok(())
}

async fn run_sync(
    config: &Config,
    settings: &AppSettings,
    items: WorkItemRepository,
    settings_repo: SettingsRepository,
    events: Arc<bartleby::events::EventBus>,
) -> Result<()> {
    let source = build_tracker(config, settings)?;
    let service = SyncService::new(source, items, settings_repo, events);
    match service.run().await? {
        SyncRunOutcome::Ran(report) => {
            println!(
                "added={} updated={} status_pushed={} removed={}",
                report.added, report.updated, report.status_pushed, report.removed
            );
        }
        SyncRunOutcome::AlreadyRunning => println!("a sync is already in progress"),
    }
    Ok(())
}

async fn run_status(
    config: &Config,
    settings: &AppSettings,
    items: WorkItemRepository,
    sessions: WorkSessionRepository,
    questions: BlockedQuestionRepository,
    settings_repo: SettingsRepository,
    events: Arc<bartleby::events::EventBus>,
    format: OutputFormat,
) -> Result<()> {
    let orch = build_orchestrator(config, settings, items, sessions, questions, settings_repo, events)?;
    orch.start().await;
    let stats = orch.stats().await;

    match format {
        OutputFormat::Text => {
            println!("state:              {}", stats.state);
            println!("current item:       {}", stats.current_work_item_id.as_deref().unwrap_or("-"));
            println!("items completed:    {}", stats.items_completed);
            println!("items failed:       {}", stats.items_failed);
            println!("items blocked:      {}", stats.items_blocked);
            println!("tokens used today:  {}/{}", stats.tokens_used_today, stats.daily_token_limit);
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "state": stats.state.to_string(),
                "current_work_item_id": stats.current_work_item_id,
                "items_completed": stats.items_completed,
                "items_failed": stats.items_failed,
                "items_blocked": stats.items_blocked,
                "tokens_used_today": stats.tokens_used_today,
                "daily_token_limit": stats.daily_token_limit,
                "next_cycle_at": stats.next_cycle_at,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}

fn run_graph_command(config: &Config, items: &WorkItemRepository, command: GraphCommand) -> Result<()> {
    let mut store = GraphStore::new(&config.graph_file_path);
    match command {
        GraphCommand::Validate => {
            store.load()?;
            let errors = &store.last_parse().errors;
            if errors.is_empty() {
                println!("no errors");
            } else {
                for error in errors {
                    println!("line {}: {:?}", error.line, error.kind);
                }
            }
        }
        GraphCommand::Show => {
            store.load()?;
            let graph = store.graph().clone();
            let all_items = items.list()?;
            let resolution = DependencyResolver::new(&graph, &all_items).resolve();

            println!("ready:");
            for id in &resolution.ready_items {
                println!("  {id}");
            }
            println!("blocked:");
            for id in &resolution.blocked_items {
                println!("  {id}");
            }
            if !resolution.cycles.is_empty() {
                println!("cycles:");
                for cycle in &resolution.cycles {
                    println!("  {}", cycle.join(" -> "));
                }
            }
        }
        GraphCommand::Resave => {
            store.load()?;
            store.save()?;
            println!("resaved {}", config.graph_file_path);
        }
    }
    Ok(())
}

fn run_items_command(items: &WorkItemRepository, sessions: &WorkSessionRepository, command: ItemsCommand) -> Result<()> {
    match command {
        ItemsCommand::List { status } => {
            let list = match &status {
                Some(s) => items.list_by_status(s)?,
                None => items.list()?,
            };
            for item in list {
                println!("{}\t{}\t{}", item.id, item.status, item.title);
            }
        }
        ItemsCommand::Show { id } => {
            let Some(item) = items.get(&id)? else {
                return Err(eyre!("no such item: {id}"));
            };
            println!("{}: {}", item.id, item.title);
            println!("status: {}", item.status);
            println!("{}", item.description);
            for session in sessions.list_for_item(&item.id)? {
                println!("  [{}] {} -> {}", session.started_at, session.transformation, session.outcome);
            }
        }
        ItemsCommand::Retry { id } => {
            let Some(mut item) = items.get(&id)? else {
                return Err(eyre!("no such item: {id}"));
            };
            if item.status != WorkItemStatus::Failed {
                warn!(id = %id, status = %item.status, "items retry: item is not Failed, retrying anyway");
            }
            item.set_status(WorkItemStatus::Pending);
            items.update(item)?;
            println!("{id} reset to pending");
        }
    }
    Ok(())
}

fn run_questions_command(items: &WorkItemRepository, questions: &BlockedQuestionRepository, command: QuestionsCommand) -> Result<()> {
    match command {
        QuestionsCommand::List { item } => {
            let rows = match &item {
                Some(id) => questions.list_unanswered_for_item(id)?,
                None => {
                    let mut all = Vec::new();
                    for work_item in items.list()? {
                        all.extend(questions.list_unanswered_for_item(&work_item.id)?);
                    }
                    all
                }
            };
            for q in rows {
                println!("{}\t{}\t{}", q.id, q.work_item_id, q.question);
            }
        }
        QuestionsCommand::Answer { id, answer } => {
            let Some(mut question) = questions.get(&id)? else {
                return Err(eyre!("no such question: {id}"));
            };
            question.answer(answer);
            let item_id = question.work_item_id.clone();
            questions.update(question)?;

            if questions.list_unanswered_for_item(&item_id)?.is_empty() {
                if let Some(mut item) = items.get(&item_id)? {
                    item.unblock();
                    items.update(item)?;
                }
            }
            println!("answered {id}");
        }
    }
    Ok(())
}
