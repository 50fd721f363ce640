use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::generate_id;

use super::dsl::{GraphDslParser, ParseResult};
use super::model::DependencyGraph;

/// Durable alias↔id bindings, persisted alongside the graph file so a
/// custom alias survives process restarts instead of being re-minted.
/// Conceptually a cache over the graph file's identity — see
/// `crate::graph::store` module docs.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Bindings {
    alias_to_id: HashMap<String, String>,
}

/// Persists graph text to a file path and rebuilds the typed
/// [`DependencyGraph`] on every [`GraphStore::load`]. Owns the only
/// writable handle to the graph; the Resolver only ever sees
/// [`GraphStore::graph`].
pub struct GraphStore {
    path: PathBuf,
    bindings_path: PathBuf,
    alias_to_id: HashMap<String, String>,
    id_to_alias: HashMap<String, String>,
    graph: DependencyGraph,
    last_parse: ParseResult,
}

impl GraphStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let bindings_path = bindings_sidecar_path(&path);
        Self {
            path,
            bindings_path,
            alias_to_id: HashMap::new(),
            id_to_alias: HashMap::new(),
            graph: DependencyGraph::new(),
            last_parse: ParseResult::default(),
        }
    }

    /// Load and parse the graph file, rebuilding the typed graph. Never
    /// fails on a missing or malformed graph file — on any read/parse
    /// trouble the previously cached graph is kept and the trouble is
    /// recorded in `last_parse().errors` for diagnostics instead.
    pub fn load(&mut self) -> Result<()> {
        self.load_bindings();

        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "graph file does not exist yet, treating as empty");
                String::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read graph file, keeping cached graph");
                return Ok(());
            }
        };

        let parsed = GraphDslParser::parse(&text);
        let mut graph = DependencyGraph::new();
        let mut bindings_changed = false;

        for (alias, node) in &parsed.nodes {
            let id = self.alias_to_id.get(alias).cloned().unwrap_or_else(|| {
                let id = generate_id("item", &node.title);
                bindings_changed = true;
                id
            });
            self.alias_to_id.insert(alias.clone(), id.clone());
            self.id_to_alias.insert(id.clone(), alias.clone());
            graph.insert(id, node.title.clone(), Vec::new());
        }

        for edge in &parsed.edges {
            let (Some(dependent_id), Some(dep_id)) =
                (self.alias_to_id.get(&edge.dependent_alias), self.alias_to_id.get(&edge.dep_alias))
            else {
                continue;
            };
            if let Some(node) = graph.node(dependent_id).cloned() {
                let mut depends_on = node.depends_on;
                if !depends_on.contains(dep_id) {
                    depends_on.push(dep_id.clone());
                }
                graph.insert(dependent_id.clone(), node.title, depends_on);
            }
        }

        self.graph = graph;
        self.last_parse = parsed;
        if bindings_changed {
            self.save_bindings()?;
        }
        Ok(())
    }

    /// Serialize the current graph back to DSL text and write both the
    /// graph file and its alias binding sidecar.
    pub fn save(&mut self) -> Result<()> {
        let mut out = String::from("@startuml\n");
        let mut ids = self.graph.ids_sorted();
        ids.sort();

        for id in &ids {
            let node = self.graph.node(id).expect("id came from ids_sorted()");
            let alias = self.alias_for(id);
            out.push_str(&format!("rectangle \"{}\" as {}\n", node.title, alias));
        }
        for id in &ids {
            let node = self.graph.node(id).expect("id came from ids_sorted()");
            let dependent_alias = self.alias_for(id);
            for dep_id in &node.depends_on {
                let dep_alias = self.alias_for(dep_id);
                out.push_str(&format!("{dep_alias} --> {dependent_alias}\n"));
            }
        }
        out.push_str("@enduml\n");

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, out)?;
        self.save_bindings()?;
        debug!(path = %self.path.display(), nodes = ids.len(), "GraphStore::save");
        Ok(())
    }

    /// Alias for `id`: its bound alias if one exists, else the first 8
    /// characters of the id's textual form (and the binding is recorded
    /// for next time).
    fn alias_for(&mut self, id: &str) -> String {
        if let Some(alias) = self.id_to_alias.get(id) {
            return alias.clone();
        }
        let alias: String = id.chars().take(8).collect();
        self.alias_to_id.insert(alias.clone(), id.to_string());
        self.id_to_alias.insert(id.to_string(), alias.clone());
        alias
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn last_parse(&self) -> &ParseResult {
        &self.last_parse
    }

    /// Insert or replace a node keyed by a caller-chosen id (e.g. a newly
    /// ingested `WorkItem`), minting a fresh alias if this id has none yet.
    pub fn upsert_node(&mut self, id: impl Into<String>, title: impl Into<String>, depends_on: Vec<String>) {
        let id = id.into();
        self.graph.insert(id.clone(), title, depends_on);
        self.alias_for(&id);
    }

    fn load_bindings(&mut self) {
        let Ok(text) = fs::read_to_string(&self.bindings_path) else {
            return;
        };
        match serde_json::from_str::<Bindings>(&text) {
            Ok(bindings) => {
                for (alias, id) in bindings.alias_to_id {
                    self.id_to_alias.insert(id.clone(), alias.clone());
                    self.alias_to_id.insert(alias, id);
                }
            }
            Err(e) => warn!(path = %self.bindings_path.display(), error = %e, "failed to read alias bindings, starting fresh"),
        }
    }

    fn save_bindings(&self) -> Result<()> {
        let bindings = Bindings { alias_to_id: self.alias_to_id.clone() };
        let json = serde_json::to_string_pretty(&bindings)?;
        fs::write(&self.bindings_path, json)?;
        Ok(())
    }
}

fn bindings_sidecar_path(graph_path: &Path) -> PathBuf {
    let mut name = graph_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bindings.json");
    graph_path.with_file_name(name)
}
