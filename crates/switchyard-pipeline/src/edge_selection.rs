//! Edge selection after a node completes.
//!
//! Priority cascade over the current node's outgoing edges: an edge whose
//! condition exactly equals the produced condition, then an edge labeled the
//! literal `"default"`, then an edge with no condition at all. Within a tier
//! the first declared edge wins. No match means execution terminates here.

use crate::graph::{WorkflowEdge, WorkflowGraph};

/// Select the edge to follow out of `current` given the produced `condition`.
/// Returns `None` when no edge applies (terminal node).
pub fn next_node<'a>(
    graph: &'a WorkflowGraph,
    current: &str,
    condition: &str,
) -> Option<&'a WorkflowEdge> {
    let edges = graph.outgoing_edges(current);

    edges
        .iter()
        .find(|e| e.condition.as_deref() == Some(condition))
        .or_else(|| {
            edges
                .iter()
                .find(|e| e.condition.as_deref() == Some("default"))
        })
        .or_else(|| edges.iter().find(|e| e.condition.is_none()))
}
