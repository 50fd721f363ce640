use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::StoreError;
use crate::filter::Filter;
use crate::record::Record;

/// Append-only JSONL log per collection, backed by a SQLite index for
/// filtered reads. Open once per process; cheap to clone the path and
/// reopen in tests.
pub struct Store {
    base_path: PathBuf,
    conn: Connection,
    cache: HashMap<&'static str, HashMap<String, Value>>,
}

impl Store {
    /// Open (creating if absent) a store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        let conn = Connection::open(base_path.join("index.sqlite3"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS record_index (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (collection, id, field)
            )",
        )?;
        debug!(?base_path, "Store::open: opened");
        Ok(Self {
            base_path,
            conn,
            cache: HashMap::new(),
        })
    }

    fn jsonl_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{collection}.jsonl"))
    }

    fn append_line(&self, collection: &str, line: &Value) -> Result<(), StoreError> {
        let mut f = OpenOptions::new().create(true).append(true).open(self.jsonl_path(collection))?;
        writeln!(f, "{}", serde_json::to_string(line)?)?;
        Ok(())
    }

    /// Replay a collection's append-only log from disk, rebuilding both
    /// the in-memory cache and the SQLite index for `T`. Call once per
    /// type after `open`, or any time the log may have changed out from
    /// under this process (e.g. after a `git pull`).
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize, StoreError> {
        let collection = T::collection_name();
        let path = self.jsonl_path(collection);
        let mut live: HashMap<String, Value> = HashMap::new();

        if path.exists() {
            let reader = BufReader::new(fs::File::open(&path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: Value = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                    collection,
                    line: lineno + 1,
                    message: e.to_string(),
                })?;
                match entry.get("op").and_then(Value::as_str) {
                    Some("put") => {
                        let data = entry.get("data").cloned().unwrap_or(Value::Null);
                        let rec: T = serde_json::from_value(data.clone()).map_err(|e| StoreError::Corrupt {
                            collection,
                            line: lineno + 1,
                            message: e.to_string(),
                        })?;
                        live.insert(rec.id().to_string(), data);
                    }
                    Some("delete") => {
                        if let Some(id) = entry.get("id").and_then(Value::as_str) {
                            live.remove(id);
                        }
                    }
                    other => debug!(?other, collection, lineno, "rebuild_indexes: ignoring unknown op"),
                }
            }
        }

        self.conn.execute("DELETE FROM record_index WHERE collection = ?1", params![collection])?;
        for value in live.values() {
            let rec: T = serde_json::from_value(value.clone())?;
            self.index_one(collection, &rec)?;
        }

        let count = live.len();
        self.cache.insert(collection, live);
        debug!(collection, count, "rebuild_indexes: done");
        Ok(count)
    }

    fn index_one<T: Record>(&self, collection: &'static str, rec: &T) -> Result<(), StoreError> {
        let id = rec.id();
        self.conn
            .execute("DELETE FROM record_index WHERE collection = ?1 AND id = ?2", params![collection, id])?;
        for (field, value) in rec.indexed_fields() {
            self.conn.execute(
                "INSERT OR REPLACE INTO record_index (collection, id, field, value) VALUES (?1, ?2, ?3, ?4)",
                params![collection, id, field, value.to_sql_text()],
            )?;
        }
        Ok(())
    }

    fn put<T: Record>(&mut self, record: &T) -> Result<(), StoreError> {
        let collection = T::collection_name();
        let data = serde_json::to_value(record)?;
        self.append_line(collection, &json!({"op": "put", "data": data}))?;
        self.cache.entry(collection).or_default().insert(record.id().to_string(), data);
        self.index_one(collection, record)?;
        Ok(())
    }

    /// Insert a new record, returning its id.
    pub fn create<T: Record>(&mut self, record: T) -> Result<String, StoreError> {
        let id = record.id().to_string();
        self.put(&record)?;
        debug!(collection = T::collection_name(), %id, "Store::create");
        Ok(id)
    }

    /// Overwrite an existing record (or insert it, if absent).
    pub fn update<T: Record>(&mut self, record: T) -> Result<(), StoreError> {
        debug!(collection = T::collection_name(), id = %record.id(), "Store::update");
        self.put(&record)
    }

    /// Fetch a single record by id.
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let Some(map) = self.cache.get(T::collection_name()) else {
            return Ok(None);
        };
        match map.get(id) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    /// List every record of `T` matching every filter (AND semantics).
    /// An empty filter slice returns the whole collection, ordered by
    /// `updated_at` ascending.
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>, StoreError> {
        let collection = T::collection_name();
        let Some(map) = self.cache.get(collection) else {
            return Ok(Vec::new());
        };

        let ids: Vec<String> = if filters.is_empty() {
            map.keys().cloned().collect()
        } else {
            let mut candidate: Option<HashSet<String>> = None;
            for f in filters {
                let sql = format!(
                    "SELECT id FROM record_index WHERE collection = ?1 AND field = ?2 AND value {} ?3",
                    f.op.as_sql()
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let matched: HashSet<String> = stmt
                    .query_map(params![collection, f.field, f.value.to_sql_text()], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                candidate = Some(match candidate {
                    Some(existing) => existing.intersection(&matched).cloned().collect(),
                    None => matched,
                });
            }
            candidate.unwrap_or_default().into_iter().collect()
        };

        let mut out: Vec<T> = ids
            .into_iter()
            .filter_map(|id| map.get(&id).cloned())
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect::<Result<_, _>>()?;
        out.sort_by_key(|r: &T| r.updated_at());
        Ok(out)
    }

    /// Delete a single record by id.
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<(), StoreError> {
        let collection = T::collection_name();
        self.append_line(collection, &json!({"op": "delete", "id": id}))?;
        if let Some(map) = self.cache.get_mut(collection) {
            map.remove(id);
        }
        self.conn.execute("DELETE FROM record_index WHERE collection = ?1 AND id = ?2", params![collection, id])?;
        debug!(collection, id, "Store::delete");
        Ok(())
    }

    /// Delete every record of `T` whose indexed `field` equals `value`.
    /// Returns the number of records removed.
    pub fn delete_by_index<T: Record>(&mut self, field: &str, value: crate::IndexValue) -> Result<usize, StoreError> {
        let matches = self.list::<T>(&[Filter {
            field: field.to_string(),
            op: crate::FilterOp::Eq,
            value,
        }])?;
        let count = matches.len();
        for rec in matches {
            self.delete::<T>(rec.id())?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Filter, FilterOp, IndexValue};
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        status: String,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
        fn indexed_fields(&self) -> HashMap<String, crate::IndexValue> {
            let mut m = HashMap::new();
            m.insert("status".to_string(), crate::IndexValue::String(self.status.clone()));
            m
        }
    }

    fn widget(id: &str, status: &str, t: i64) -> Widget {
        Widget {
            id: id.to_string(),
            status: status.to_string(),
            updated_at: t,
        }
    }

    #[test]
    fn create_and_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store.rebuild_indexes::<Widget>().unwrap();

        store.create(widget("w1", "pending", 1)).unwrap();
        let fetched: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(fetched.status, "pending");
    }

    #[test]
    fn update_overwrites_and_reindexes() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store.rebuild_indexes::<Widget>().unwrap();
        store.create(widget("w1", "pending", 1)).unwrap();
        store.update(widget("w1", "ready", 2)).unwrap();

        let found = store
            .list::<Widget>(&[Filter {
                field: "status".to_string(),
                op: FilterOp::Eq,
                value: IndexValue::String("ready".to_string()),
            }])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "w1");

        let gone = store
            .list::<Widget>(&[Filter {
                field: "status".to_string(),
                op: FilterOp::Eq,
                value: IndexValue::String("pending".to_string()),
            }])
            .unwrap();
        assert!(gone.is_empty());
    }

    #[test]
    fn delete_by_index_removes_matches() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store.rebuild_indexes::<Widget>().unwrap();
        store.create(widget("w1", "blocked", 1)).unwrap();
        store.create(widget("w2", "blocked", 2)).unwrap();
        store.create(widget("w3", "ready", 3)).unwrap();

        let removed = store.delete_by_index::<Widget>("status", IndexValue::String("blocked".to_string())).unwrap();
        assert_eq!(removed, 2);
        assert!(store.get::<Widget>("w1").unwrap().is_none());
        assert!(store.get::<Widget>("w3").unwrap().is_some());
    }

    #[test]
    fn rebuild_indexes_replays_log_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = Store::open(dir.path()).unwrap();
            store.rebuild_indexes::<Widget>().unwrap();
            store.create(widget("w1", "pending", 1)).unwrap();
            store.update(widget("w1", "ready", 2)).unwrap();
            store.create(widget("w2", "pending", 3)).unwrap();
            store.delete::<Widget>("w2").unwrap();
        }

        // Fresh process: reopen and replay.
        let mut store = Store::open(dir.path()).unwrap();
        let count = store.rebuild_indexes::<Widget>().unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.get::<Widget>("w1").unwrap().unwrap().status, "ready");
        assert!(store.get::<Widget>("w2").unwrap().is_none());
    }

    #[test]
    fn list_empty_filters_returns_all_sorted_by_updated_at() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store.rebuild_indexes::<Widget>().unwrap();
        store.create(widget("b", "x", 5)).unwrap();
        store.create(widget("a", "x", 1)).unwrap();

        let all = store.list::<Widget>(&[]).unwrap();
        assert_eq!(all.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
