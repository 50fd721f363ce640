//! Parser for the minimal component-diagram DSL used for the dependency
//! graph file. Parsing never throws: malformed input becomes entries in
//! [`ParseResult::errors`], never a `Result::Err`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static NODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^(component|object|rectangle|node|package)\s+(?:"([^"]*)"\s+as\s+([A-Za-z0-9_]+)|([A-Za-z0-9_]+))\s*$"#)
        .expect("static node regex is valid")
});

static EDGE_FWD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^([A-Za-z0-9_]+)\s*(-->|\.\.>|==>)\s*([A-Za-z0-9_]+)(?:\s*:\s*(.*))?$"#).expect("static edge regex is valid"));

static EDGE_REV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^([A-Za-z0-9_]+)\s*(<--|<\.\.|<==)\s*([A-Za-z0-9_]+)(?:\s*:\s*(.*))?$"#).expect("static edge regex is valid"));

/// A parsed node declaration, keyed by alias in [`ParseResult::nodes`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
    pub node_type: String,
    pub title: String,
    pub line: usize,
}

/// A parsed dependency edge, always normalised to `(dep_alias, dependent_alias)`
/// regardless of which arrow direction it was written with — i.e. the
/// dependent depends on the dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEdge {
    pub dep_alias: String,
    pub dependent_alias: String,
    pub label: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DslErrorKind {
    DuplicateAlias,
    UnknownAlias,
    StrayStartUml,
    StrayEndUml,
    UnclosedBlock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DslError {
    pub kind: DslErrorKind,
    pub line: usize,
    pub message: String,
}

/// Everything a parse produces: the node table, the edge list, and any
/// errors encountered. A non-empty `errors` does not mean `nodes`/`edges`
/// are empty — parsing is best-effort and recovers line by line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    pub nodes: HashMap<String, ParsedNode>,
    pub edges: Vec<ParsedEdge>,
    pub errors: Vec<DslError>,
}

pub struct GraphDslParser;

impl GraphDslParser {
    /// Parse DSL text. Pure function of `text`; never panics on malformed
    /// input.
    pub fn parse(text: &str) -> ParseResult {
        let mut result = ParseResult::default();
        let mut in_block = false;
        let mut saw_start = false;
        let mut open_line: Option<usize> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('\'') {
                continue;
            }

            let lower = line.to_ascii_lowercase();
            if lower.starts_with("@startuml") {
                if in_block {
                    result.errors.push(DslError {
                        kind: DslErrorKind::StrayStartUml,
                        line: line_no,
                        message: "@startuml nested inside an already-open block".to_string(),
                    });
                } else {
                    in_block = true;
                    saw_start = true;
                    open_line = Some(line_no);
                }
                continue;
            }
            if lower == "@enduml" {
                if in_block {
                    in_block = false;
                    open_line = None;
                } else {
                    result.errors.push(DslError {
                        kind: DslErrorKind::StrayEndUml,
                        line: line_no,
                        message: "@enduml with no matching @startuml".to_string(),
                    });
                }
                continue;
            }

            // Once any @startuml has been seen, only content inside a block counts.
            if saw_start && !in_block {
                continue;
            }

            if let Some(caps) = NODE_RE.captures(line) {
                let node_type = caps[1].to_ascii_lowercase();
                let (title, alias) = match (caps.get(2), caps.get(3), caps.get(4)) {
                    (Some(title), Some(alias), _) => (title.as_str().to_string(), alias.as_str().to_string()),
                    (_, _, Some(alias)) => (alias.as_str().to_string(), alias.as_str().to_string()),
                    _ => continue,
                };
                if let Some(existing) = result.nodes.get(&alias) {
                    result.errors.push(DslError {
                        kind: DslErrorKind::DuplicateAlias,
                        line: line_no,
                        message: format!("alias '{alias}' already declared at line {}", existing.line),
                    });
                    continue;
                }
                result.nodes.insert(alias, ParsedNode { node_type, title, line: line_no });
                continue;
            }

            if let Some(caps) = EDGE_FWD_RE.captures(line) {
                result.edges.push(ParsedEdge {
                    dep_alias: caps[1].to_string(),
                    dependent_alias: caps[3].to_string(),
                    label: caps.get(4).map(|m| m.as_str().trim().to_string()).filter(|s| !s.is_empty()),
                    line: line_no,
                });
                continue;
            }

            if let Some(caps) = EDGE_REV_RE.captures(line) {
                // `A <-- B` reads as B depends on A's target; reversed yields (B, A).
                result.edges.push(ParsedEdge {
                    dep_alias: caps[3].to_string(),
                    dependent_alias: caps[1].to_string(),
                    label: caps.get(4).map(|m| m.as_str().trim().to_string()).filter(|s| !s.is_empty()),
                    line: line_no,
                });
                continue;
            }

            // Unmatched lines are ignored — forward-compatible with richer syntax.
        }

        if in_block {
            result.errors.push(DslError {
                kind: DslErrorKind::UnclosedBlock,
                line: open_line.unwrap_or(0),
                message: "@startuml block was never closed with @enduml".to_string(),
            });
        }

        for edge in &result.edges {
            if !result.nodes.contains_key(&edge.dep_alias) {
                result.errors.push(DslError {
                    kind: DslErrorKind::UnknownAlias,
                    line: edge.line,
                    message: format!("edge references unknown alias '{}'", edge.dep_alias),
                });
            }
            if !result.nodes.contains_key(&edge.dependent_alias) {
                result.errors.push(DslError {
                    kind: DslErrorKind::UnknownAlias,
                    line: edge.line,
                    message: format!("edge references unknown alias '{}'", edge.dependent_alias),
                });
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_node_with_alias() {
        let result = GraphDslParser::parse(r#"rectangle "Add OAuth" as A"#);
        let node = result.nodes.get("A").unwrap();
        assert_eq!(node.title, "Add OAuth");
        assert_eq!(node.node_type, "rectangle");
        assert!(result.errors.is_empty());
    }

    #[test]
    fn bare_alias_node_defaults_title_to_alias() {
        let result = GraphDslParser::parse("component B");
        let node = result.nodes.get("B").unwrap();
        assert_eq!(node.title, "B");
    }

    #[test]
    fn forward_edge_dep_then_dependent() {
        let result = GraphDslParser::parse("component A\ncomponent B\nA --> B");
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].dep_alias, "A");
        assert_eq!(result.edges[0].dependent_alias, "B");
    }

    #[test]
    fn reverse_edge_is_normalised_to_dep_dependent_order() {
        let result = GraphDslParser::parse("component A\ncomponent B\nA <-- B");
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].dep_alias, "B");
        assert_eq!(result.edges[0].dependent_alias, "A");
    }

    #[test]
    fn dashed_and_bold_edges_parse_like_forward() {
        let result = GraphDslParser::parse("component A\ncomponent B\ncomponent C\nA ..> B\nB ==> C");
        assert_eq!(result.edges.len(), 2);
    }

    #[test]
    fn edge_with_label_is_captured_and_trimmed() {
        let result = GraphDslParser::parse("component A\ncomponent B\nA --> B : blocks");
        assert_eq!(result.edges[0].label.as_deref(), Some("blocks"));
    }

    #[test]
    fn duplicate_alias_is_an_error_and_keeps_first_definition() {
        let result = GraphDslParser::parse(r#"rectangle "First" as A
rectangle "Second" as A"#);
        assert_eq!(result.nodes.get("A").unwrap().title, "First");
        assert!(result.errors.iter().any(|e| e.kind == DslErrorKind::DuplicateAlias));
    }

    #[test]
    fn edge_to_unknown_alias_is_an_error() {
        let result = GraphDslParser::parse("component A\nA --> Ghost");
        assert!(result.errors.iter().any(|e| e.kind == DslErrorKind::UnknownAlias));
    }

    #[test]
    fn comments_are_ignored() {
        let result = GraphDslParser::parse("' this is a comment\ncomponent A");
        assert_eq!(result.nodes.len(), 1);
    }

    #[test]
    fn only_content_inside_blocks_counts_once_any_startuml_appears() {
        let text = "component Outside\n@startuml\ncomponent Inside\n@enduml";
        let result = GraphDslParser::parse(text);
        assert!(result.nodes.contains_key("Inside"));
        assert!(!result.nodes.contains_key("Outside"));
    }

    #[test]
    fn unclosed_block_is_an_error() {
        let result = GraphDslParser::parse("@startuml\ncomponent A");
        assert!(result.errors.iter().any(|e| e.kind == DslErrorKind::UnclosedBlock));
    }

    #[test]
    fn stray_enduml_is_an_error() {
        let result = GraphDslParser::parse("@enduml");
        assert!(result.errors.iter().any(|e| e.kind == DslErrorKind::StrayEndUml));
    }

    #[test]
    fn nested_startuml_is_an_error() {
        let result = GraphDslParser::parse("@startuml\n@startuml\n@enduml");
        assert!(result.errors.iter().any(|e| e.kind == DslErrorKind::StrayStartUml));
    }

    #[test]
    fn empty_graph_parses_with_no_nodes_and_no_errors() {
        let result = GraphDslParser::parse("");
        assert!(result.nodes.is_empty());
        assert!(result.errors.is_empty());
    }

    use std::collections::HashSet;

    use proptest::collection::vec;
    use proptest::prelude::*;

    fn alias_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_]{0,6}"
    }

    fn title_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z0-9 _]{0,16}"
    }

    /// Renders a node/edge set as DSL text the same way [`super::super::store::GraphStore::save`] does.
    fn render(nodes: &[(String, String)], edges: &[(usize, usize)]) -> String {
        let mut out = String::from("@startuml\n");
        for (alias, title) in nodes {
            out.push_str(&format!("rectangle \"{title}\" as {alias}\n"));
        }
        for &(dep, dependent) in edges {
            out.push_str(&format!("{} --> {}\n", nodes[dep].0, nodes[dependent].0));
        }
        out.push_str("@enduml\n");
        out
    }

    proptest! {
        /// parse(render(G)) always recovers exactly the node titles and
        /// dependency edges `render` was given, and round-tripping the
        /// parsed result through `render` again is a no-op.
        #[test]
        fn parse_of_rendered_graph_recovers_nodes_and_edges(
            aliases in vec(alias_strategy(), 1..6).prop_map(|v| {
                let mut seen = HashSet::new();
                v.into_iter().filter(|a| seen.insert(a.clone())).collect::<Vec<_>>()
            }),
            titles in vec(title_strategy(), 6),
            edge_pairs in vec((0usize..6, 0usize..6), 0..6),
        ) {
            let n = aliases.len();
            prop_assume!(n > 0);
            let nodes: Vec<(String, String)> = aliases.iter().cloned().zip(titles.into_iter().take(n)).collect();
            let edges: Vec<(usize, usize)> = edge_pairs
                .into_iter()
                .filter(|&(a, b)| a < n && b < n && a != b)
                .collect();

            let text = render(&nodes, &edges);
            let parsed = GraphDslParser::parse(&text);

            prop_assert!(parsed.errors.is_empty());
            prop_assert_eq!(parsed.nodes.len(), n);
            for (alias, title) in &nodes {
                prop_assert_eq!(parsed.nodes.get(alias).map(|node| node.title.clone()), Some(title.clone()));
            }

            let got_edges: HashSet<(String, String)> =
                parsed.edges.iter().map(|e| (e.dep_alias.clone(), e.dependent_alias.clone())).collect();
            let want_edges: HashSet<(String, String)> =
                edges.iter().map(|&(dep, dependent)| (nodes[dep].0.clone(), nodes[dependent].0.clone())).collect();
            prop_assert_eq!(got_edges, want_edges);

            // Re-parsing the re-rendered text is stable (idempotent round trip).
            let reparsed = GraphDslParser::parse(&render(&nodes, &edges));
            prop_assert_eq!(reparsed.nodes.len(), parsed.nodes.len());
            prop_assert_eq!(reparsed.edges.len(), parsed.edges.len());
        }
    }
}
