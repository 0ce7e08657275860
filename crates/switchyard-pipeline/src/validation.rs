//! Workflow validation: lint rules and diagnostics.
//!
//! Structural rules that make a graph unexecutable are `Error` severity and
//! fail [`validate_or_raise`] before any traversal; advisory rules are
//! `Warning` severity and never block a run.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::{WorkflowGraph, BUILD_TYPE, END_TYPE};

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub edge: Option<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &WorkflowGraph) -> Vec<Diagnostic>;
}

fn error(rule: &str, message: String) -> Diagnostic {
    Diagnostic {
        rule: rule.into(),
        severity: Severity::Error,
        message,
        node_id: None,
        edge: None,
    }
}

fn warning(rule: &str, message: String, node_id: Option<String>) -> Diagnostic {
    Diagnostic {
        rule: rule.into(),
        severity: Severity::Warning,
        message,
        node_id,
        edge: None,
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct NonEmptyNodesRule;
impl LintRule for NonEmptyNodesRule {
    fn name(&self) -> &str {
        "non_empty_nodes"
    }
    fn apply(&self, graph: &WorkflowGraph) -> Vec<Diagnostic> {
        if graph.all_nodes().is_empty() {
            vec![error(self.name(), "workflow has no nodes".into())]
        } else {
            vec![]
        }
    }
}

struct UniqueNodeIdRule;
impl LintRule for UniqueNodeIdRule {
    fn name(&self) -> &str {
        "unique_node_id"
    }
    fn apply(&self, graph: &WorkflowGraph) -> Vec<Diagnostic> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for node in graph.all_nodes() {
            *counts.entry(node.id.as_str()).or_default() += 1;
        }
        let mut dups: Vec<_> = counts
            .into_iter()
            .filter(|&(_, count)| count > 1)
            .collect();
        dups.sort();
        dups.into_iter()
            .map(|(id, count)| {
                error(
                    self.name(),
                    format!("duplicate node id '{id}' declared {count} times"),
                )
            })
            .collect()
    }
}

struct EdgeEndpointsRule;
impl LintRule for EdgeEndpointsRule {
    fn name(&self) -> &str {
        "edge_endpoints_exist"
    }
    fn apply(&self, graph: &WorkflowGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for edge in graph.all_edges() {
            for endpoint in [&edge.from, &edge.to] {
                if graph.node(endpoint).is_none() {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Error,
                        message: format!(
                            "edge {} -> {} references unknown node '{endpoint}'",
                            edge.from, edge.to
                        ),
                        node_id: None,
                        edge: Some((edge.from.clone(), edge.to.clone())),
                    });
                }
            }
        }
        diags
    }
}

struct EntryPointExistsRule;
impl LintRule for EntryPointExistsRule {
    fn name(&self) -> &str {
        "entry_point_exists"
    }
    fn apply(&self, graph: &WorkflowGraph) -> Vec<Diagnostic> {
        match graph.declared_entry {
            Some(ref entry) if graph.node(entry).is_none() => vec![warning(
                self.name(),
                format!("entry_point '{entry}' does not name a node"),
                None,
            )],
            _ => vec![],
        }
    }
}

struct TerminalNodeRule;
impl LintRule for TerminalNodeRule {
    fn name(&self) -> &str {
        "terminal_node"
    }
    fn apply(&self, graph: &WorkflowGraph) -> Vec<Diagnostic> {
        if graph.all_nodes().is_empty() {
            return vec![]; // NonEmptyNodesRule covers this
        }
        if graph.all_nodes().iter().any(|n| n.node_type == END_TYPE) {
            vec![]
        } else {
            vec![warning(
                self.name(),
                "workflow has no 'end' node; runs terminate only on dead ends or the step ceiling"
                    .into(),
                None,
            )]
        }
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str {
        "reachability"
    }
    fn apply(&self, graph: &WorkflowGraph) -> Vec<Diagnostic> {
        let entry = graph.entry_point();
        if graph.node(&entry).is_none() {
            return vec![]; // nothing to walk from
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(entry.clone());
        queue.push_back(entry);
        while let Some(current) = queue.pop_front() {
            for edge in graph.outgoing_edges(&current) {
                if visited.insert(edge.to.clone()) {
                    queue.push_back(edge.to.clone());
                }
            }
        }

        graph
            .all_nodes()
            .iter()
            .filter(|n| !visited.contains(&n.id))
            .map(|n| {
                warning(
                    self.name(),
                    format!("node '{}' is not reachable from the entry point", n.id),
                    Some(n.id.clone()),
                )
            })
            .collect()
    }
}

struct BuildMacrosRule;
impl LintRule for BuildMacrosRule {
    fn name(&self) -> &str {
        "build_macros"
    }
    fn apply(&self, graph: &WorkflowGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .iter()
            .filter(|n| n.node_type == BUILD_TYPE)
            .filter(|n| matches!(n.macros(), Some(ref m) if m.is_empty()))
            .map(|n| {
                warning(
                    self.name(),
                    format!(
                        "build node '{}' declares 'macros' but lists no usable candidates",
                        n.id
                    ),
                    Some(n.id.clone()),
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(graph: &WorkflowGraph) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(NonEmptyNodesRule),
        Box::new(UniqueNodeIdRule),
        Box::new(EdgeEndpointsRule),
        Box::new(EntryPointExistsRule),
        Box::new(TerminalNodeRule),
        Box::new(ReachabilityRule),
        Box::new(BuildMacrosRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(graph));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(graph: &WorkflowGraph) -> switchyard_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(graph);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(switchyard_types::SwitchyardError::Validation(
            messages.join("; "),
        ));
    }
    Ok(diagnostics)
}
