//! Generic persistent state management for Bartleby.
//!
//! Each record type owns one append-only JSONL file (the durable,
//! git-friendly log of everything that ever happened to that
//! collection) plus a SQLite-backed secondary index used to answer
//! filtered queries without replaying the whole log. `Store::open`
//! replays the log once at startup to populate an in-memory cache;
//! `rebuild_indexes` replays it again on demand (e.g. after the JSONL
//! file was hand-edited or restored from a git checkout).

mod error;
mod filter;
mod record;
mod store;

pub use error::StoreError;
pub use filter::{Filter, FilterOp};
pub use record::{IndexValue, Record, now_ms};
pub use store::Store;
