//! Bartleby - autonomous scrivener.
//!
//! Bartleby ingests tickets from an external issue tracker, classifies
//! them against a declarative dependency graph, and drives each ready
//! ticket through a sequence of AI-mediated transformations (interpret
//! -> plan -> execute -> refine -> finalize), pausing whenever the AI
//! reports itself blocked until a human supplies the missing context.
//! Completed work lands on a branch in a local git working tree.
//!
//! # Modules
//!
//! - [`domain`] - the persisted entity types (`WorkItem`, `BlockedQuestion`,
//!   `WorkSession`, `AppSettings`) and their invariants.
//! - [`graph`] - the component-diagram DSL parser, the alias<->id store,
//!   the in-memory `DependencyGraph`, and the `DependencyResolver`.
//! - [`ports`] - the external-collaborator traits (`WorkSource`,
//!   `AiProvider`, `GitService`) Bartleby drives but does not own.
//! - [`ai`] / [`git`] / [`tracker`] - concrete port implementations.
//! - [`prompt`] - system/user prompt assembly and next-transformation choice.
//! - [`executor`] - `WorkExecutor`: context assembly, AI invocation,
//!   response interpretation.
//! - [`sync`] - `SyncService`: bidirectional tracker reconciliation.
//! - [`orchestrator`] - `Orchestrator`: the timer-driven state machine.
//! - [`repository`] - CRUD over `bartleby_store::Store`.
//! - [`events`] - the event vocabulary, bus, and JSONL logger.
//! - [`config`] - process bootstrap configuration.
//! - [`cancel`] - cooperative cancellation tokens.
//! - [`cli`] - command-line argument definitions.

pub mod ai;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod executor;
pub mod git;
pub mod graph;
pub mod orchestrator;
pub mod ports;
pub mod prompt;
pub mod repository;
pub mod sync;
pub mod tracker;

pub use config::Config;
pub use orchestrator::{Orchestrator, OrchestratorStats};
pub use sync::SyncService;
