use std::collections::{HashMap, HashSet};

use crate::domain::{WorkItem, WorkItemStatus};

use super::model::DependencyGraph;

/// A simple cycle, as the ordered list of ids forming the loop.
pub type Cycle = Vec<String>;

/// Aggregate result of a single resolver pass.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub ready_items: Vec<String>,
    pub blocked_items: Vec<String>,
    pub cycles: Vec<Cycle>,
    pub cyclic_items: Vec<String>,
}

/// Classifies work items into ready/blocked/cyclic against a graph
/// snapshot. Holds no state of its own and performs no I/O — every method
/// is a pure function of the `(graph, items)` pair it was built with.
pub struct DependencyResolver<'a> {
    graph: &'a DependencyGraph,
    items: &'a [WorkItem],
}

impl<'a> DependencyResolver<'a> {
    pub fn new(graph: &'a DependencyGraph, items: &'a [WorkItem]) -> Self {
        Self { graph, items }
    }

    fn by_id(&self) -> HashMap<&str, &WorkItem> {
        self.items.iter().map(|i| (i.id.as_str(), i)).collect()
    }

    fn all_dependencies_complete(&self, id: &str, by_id: &HashMap<&str, &WorkItem>) -> bool {
        self.graph.depends_on(id).iter().all(|dep_id| by_id.get(dep_id.as_str()).map(|d| d.status == WorkItemStatus::Complete).unwrap_or(true))
    }

    /// Items whose status is `Pending` or `Ready` and whose every
    /// dependency resolves to `Complete`, ordered by ascending
    /// `created_at` with id as a stable tie-break. Items in any cycle are
    /// excluded even if otherwise eligible — use [`Self::resolve`] when
    /// cycle exclusion matters; this method alone does not subtract them.
    pub fn get_ready_items(&self) -> Vec<String> {
        let by_id = self.by_id();
        let mut ready: Vec<&WorkItem> = self
            .items
            .iter()
            .filter(|item| matches!(item.status, WorkItemStatus::Pending | WorkItemStatus::Ready))
            .filter(|item| self.all_dependencies_complete(&item.id, &by_id))
            .collect();
        ready.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        ready.into_iter().map(|i| i.id.clone()).collect()
    }

    pub fn is_ready(&self, id: &str) -> bool {
        self.get_ready_items().iter().any(|r| r == id)
    }

    /// Transitive dependency ids, deepest first, deduplicated.
    pub fn get_dependency_chain(&self, id: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut chain = Vec::new();
        self.collect_chain(id, &mut visited, &mut chain);
        chain
    }

    fn collect_chain(&self, id: &str, visited: &mut HashSet<String>, chain: &mut Vec<String>) {
        for dep in self.graph.depends_on(id) {
            if visited.insert(dep.clone()) {
                self.collect_chain(dep, visited, chain);
                chain.push(dep.clone());
            }
        }
    }

    /// Every simple cycle, via three-colour DFS with a recursion stack.
    /// Traversal order is deterministic: ids visited in ascending order.
    pub fn detect_cycles(&self) -> Vec<Cycle> {
        #[derive(PartialEq, Eq, Clone, Copy)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let ids = self.graph.ids_sorted();
        let mut stack: Vec<String> = Vec::new();
        let mut cycles = Vec::new();

        fn dfs(
            id: &str,
            graph: &DependencyGraph,
            color: &mut HashMap<String, Color>,
            stack: &mut Vec<String>,
            cycles: &mut Vec<Cycle>,
        ) {
            color.insert(id.to_string(), Color::Gray);
            stack.push(id.to_string());

            for dep in graph.depends_on(id) {
                match color.get(dep.as_str()).copied().unwrap_or(Color::White) {
                    Color::White => dfs(dep, graph, color, stack, cycles),
                    Color::Gray => {
                        let start = stack.iter().position(|n| n == dep).unwrap_or(0);
                        cycles.push(stack[start..].to_vec());
                    }
                    Color::Black => {}
                }
            }

            stack.pop();
            color.insert(id.to_string(), Color::Black);
        }

        let mut color: HashMap<String, Color> = ids.iter().map(|id| (id.clone(), Color::White)).collect();
        for id in &ids {
            if color.get(id.as_str()).copied().unwrap_or(Color::White) == Color::White {
                dfs(id, self.graph, &mut color, &mut stack, &mut cycles);
            }
        }

        cycles
    }

    /// A single pass returning ready / blocked / cyclic classification.
    /// Items present in any cycle are excluded from `ready_items` even if
    /// their dependencies all show `Complete`.
    pub fn resolve(&self) -> Resolution {
        let cycles = self.detect_cycles();
        let cyclic: HashSet<String> = cycles.iter().flatten().cloned().collect();

        let ready: Vec<String> = self.get_ready_items().into_iter().filter(|id| !cyclic.contains(id)).collect();

        let ready_set: HashSet<&str> = ready.iter().map(|s| s.as_str()).collect();
        let blocked: Vec<String> = self
            .items
            .iter()
            .filter(|item| matches!(item.status, WorkItemStatus::Pending | WorkItemStatus::Ready))
            .filter(|item| !ready_set.contains(item.id.as_str()))
            .map(|item| item.id.clone())
            .collect();

        Resolution { ready_items: ready, blocked_items: blocked, cycles, cyclic_items: cyclic.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, status: WorkItemStatus, created_at: i64) -> WorkItem {
        let mut i = WorkItem::new(id, "d");
        i.id = id.to_string();
        i.status = status;
        i.created_at = created_at;
        i.updated_at = created_at;
        i
    }

    #[test]
    fn ready_chain_a_to_b_to_c() {
        let mut graph = DependencyGraph::new();
        graph.insert("a", "A", vec![]);
        graph.insert("b", "B", vec!["a".to_string()]);
        graph.insert("c", "C", vec!["b".to_string()]);

        let items = vec![
            item("a", WorkItemStatus::Complete, 1),
            item("b", WorkItemStatus::Pending, 2),
            item("c", WorkItemStatus::Pending, 3),
        ];

        let resolver = DependencyResolver::new(&graph, &items);
        let resolution = resolver.resolve();
        assert_eq!(resolution.ready_items, vec!["b".to_string()]);
        assert_eq!(resolution.blocked_items, vec!["c".to_string()]);
    }

    #[test]
    fn two_node_cycle_excludes_both_from_ready() {
        let mut graph = DependencyGraph::new();
        graph.insert("a", "A", vec!["b".to_string()]);
        graph.insert("b", "B", vec!["a".to_string()]);

        let items = vec![item("a", WorkItemStatus::Pending, 1), item("b", WorkItemStatus::Pending, 2)];

        let resolver = DependencyResolver::new(&graph, &items);
        let resolution = resolver.resolve();
        assert!(resolution.ready_items.is_empty());
        assert_eq!(resolution.cycles.len(), 1);
        let mut cyclic = resolution.cyclic_items.clone();
        cyclic.sort();
        assert_eq!(cyclic, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.insert("a", "A", vec!["a".to_string()]);
        let items = vec![item("a", WorkItemStatus::Pending, 1)];
        let resolver = DependencyResolver::new(&graph, &items);
        let cycles = resolver.detect_cycles();
        assert_eq!(cycles, vec![vec!["a".to_string()]]);
    }

    #[test]
    fn is_ready_agrees_with_get_ready_items() {
        let mut graph = DependencyGraph::new();
        graph.insert("a", "A", vec![]);
        let items = vec![item("a", WorkItemStatus::Pending, 1)];
        let resolver = DependencyResolver::new(&graph, &items);
        assert!(resolver.is_ready("a"));
        assert_eq!(resolver.get_ready_items(), vec!["a".to_string()]);
    }

    #[test]
    fn in_progress_and_terminal_items_are_never_ready() {
        let graph = DependencyGraph::new();
        let items = vec![
            item("a", WorkItemStatus::InProgress, 1),
            item("b", WorkItemStatus::Blocked, 2),
            item("c", WorkItemStatus::Complete, 3),
            item("d", WorkItemStatus::Failed, 4),
        ];
        let resolver = DependencyResolver::new(&graph, &items);
        assert!(resolver.get_ready_items().is_empty());
    }

    #[test]
    fn missing_graph_entry_means_zero_dependencies() {
        let graph = DependencyGraph::new();
        let items = vec![item("a", WorkItemStatus::Pending, 1)];
        let resolver = DependencyResolver::new(&graph, &items);
        assert!(resolver.is_ready("a"));
    }

    #[test]
    fn dependency_chain_is_deepest_first_and_deduplicated() {
        let mut graph = DependencyGraph::new();
        graph.insert("a", "A", vec![]);
        graph.insert("b", "B", vec!["a".to_string()]);
        graph.insert("c", "C", vec!["a".to_string(), "b".to_string()]);
        let items = vec![];
        let resolver = DependencyResolver::new(&graph, &items);
        assert_eq!(resolver.get_dependency_chain("c"), vec!["a".to_string(), "b".to_string()]);
    }
}
