use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A node in the in-memory [`DependencyGraph`]: a title and the stable ids
/// it depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub title: String,
    pub depends_on: Vec<String>,
}

/// Pure value: a map from stable work-item id to its node. Rebuilt from the
/// DSL on every [`crate::graph::GraphStore::load`], never mutated except
/// through the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    nodes: HashMap<String, GraphNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, title: impl Into<String>, depends_on: Vec<String>) {
        self.nodes.insert(id.into(), GraphNode { title: title.into(), depends_on });
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// Dependencies of `id` present in the graph. An id absent from the
    /// graph is treated as having zero dependencies — missing-graph
    /// entries are not a failure mode.
    pub fn depends_on(&self, id: &str) -> &[String] {
        self.nodes.get(id).map(|n| n.depends_on.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Ids in ascending order, for deterministic traversal (cycle
    /// detection, serialization).
    pub fn ids_sorted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GraphNode)> {
        self.nodes.iter()
    }
}
