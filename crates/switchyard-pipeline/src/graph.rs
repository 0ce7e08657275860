use std::collections::HashMap;

use switchyard_types::{Result, SwitchyardError};

/// Fallback entry id used when a graph declares no nodes at all.
pub const FALLBACK_ENTRY: &str = "intake";

/// Node type whose completion terminates a run.
pub const END_TYPE: &str = "end";

/// Node type whose outcome is evaluated and whose macro choice is learned.
pub const BUILD_TYPE: &str = "build";

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    pub name: Option<String>,
    /// Declared entry node id, when the document carries one.
    pub declared_entry: Option<String>,
    nodes: Vec<WorkflowNode>,
    edges: Vec<WorkflowEdge>,
    /// Maps node id to its first declaration index in `nodes`.
    index: HashMap<String, usize>,
    /// Maps node id to a (start, count) range into the sorted `edges` vec.
    /// Edges are sorted by `from` so each node's outgoing edges are contiguous.
    adjacency: HashMap<String, (usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct WorkflowNode {
    pub id: String,
    pub node_type: String,
    /// Free-form action/config payload: everything except `id` and `type`.
    pub attrs: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
    pub condition: Option<String>,
}

impl WorkflowNode {
    pub fn is_build(&self) -> bool {
        self.node_type == BUILD_TYPE
    }

    pub fn is_end(&self) -> bool {
        self.node_type == END_TYPE
    }

    /// String payload attribute, if present and a string.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(|v| v.as_str())
    }

    /// Macro candidates declared on this node (`"macros": ["a", "b"]`).
    /// Non-string entries are dropped.
    pub fn macros(&self) -> Option<Vec<String>> {
        let list = self.attrs.get("macros")?.as_array()?;
        Some(
            list.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
        )
    }
}

impl WorkflowGraph {
    /// Build a graph from a parsed JSON document.
    ///
    /// Rejects documents that cannot be represented at all: a non-object
    /// document, missing `nodes`/`edges` keys, or nodes without `id`/`type`.
    /// Everything else (duplicates, dangling edges, ...) is left to the lint
    /// rules in [`crate::validation`], which see the full declaration list.
    pub fn from_value(doc: &serde_json::Value) -> Result<Self> {
        let obj = doc
            .as_object()
            .ok_or_else(|| SwitchyardError::Validation("graph document must be a JSON object".into()))?;

        let raw_nodes = obj
            .get("nodes")
            .ok_or_else(|| SwitchyardError::Validation("graph document is missing the 'nodes' key".into()))?
            .as_array()
            .ok_or_else(|| SwitchyardError::Validation("'nodes' must be an array".into()))?;

        let raw_edges = obj
            .get("edges")
            .ok_or_else(|| SwitchyardError::Validation("graph document is missing the 'edges' key".into()))?
            .as_array()
            .ok_or_else(|| SwitchyardError::Validation("'edges' must be an array".into()))?;

        let mut nodes = Vec::with_capacity(raw_nodes.len());
        for (i, raw) in raw_nodes.iter().enumerate() {
            let node_obj = raw.as_object().ok_or_else(|| {
                SwitchyardError::Validation(format!("node at index {i} must be an object"))
            })?;
            let id = node_obj
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    SwitchyardError::Validation(format!("node at index {i} is missing 'id'"))
                })?
                .to_string();
            let node_type = node_obj
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    SwitchyardError::Validation(format!("node '{id}' is missing 'type'"))
                })?
                .to_string();
            let attrs = node_obj
                .iter()
                .filter(|(k, _)| k.as_str() != "id" && k.as_str() != "type")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            nodes.push(WorkflowNode {
                id,
                node_type,
                attrs,
            });
        }

        let mut edges = Vec::with_capacity(raw_edges.len());
        for (i, raw) in raw_edges.iter().enumerate() {
            let edge_obj = raw.as_object().ok_or_else(|| {
                SwitchyardError::Validation(format!("edge at index {i} must be an object"))
            })?;
            let from = edge_obj
                .get("from")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    SwitchyardError::Validation(format!("edge at index {i} is missing 'from'"))
                })?
                .to_string();
            let to = edge_obj
                .get("to")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    SwitchyardError::Validation(format!("edge at index {i} is missing 'to'"))
                })?
                .to_string();
            let condition = edge_obj
                .get("condition")
                .and_then(|v| v.as_str())
                .map(String::from);
            edges.push(WorkflowEdge {
                from,
                to,
                condition,
            });
        }

        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            index.entry(node.id.clone()).or_insert(i);
        }

        // Stable sort by `from` keeps declaration order within each node's
        // outgoing edges, which is what the selection cascade relies on.
        edges.sort_by(|a, b| a.from.cmp(&b.from));
        let mut adjacency: HashMap<String, (usize, usize)> = HashMap::new();
        let mut i = 0;
        while i < edges.len() {
            let start = i;
            let from = &edges[i].from;
            while i < edges.len() && edges[i].from == *from {
                i += 1;
            }
            adjacency.insert(from.clone(), (start, i - start));
        }

        Ok(WorkflowGraph {
            name: obj.get("name").and_then(|v| v.as_str()).map(String::from),
            declared_entry: obj
                .get("entry_point")
                .and_then(|v| v.as_str())
                .map(String::from),
            nodes,
            edges,
            index,
            adjacency,
        })
    }

    /// Parse a JSON document text into a graph.
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(&doc)
    }

    /// Resolve the entry node id in priority order: explicit `entry_point`
    /// field, a node of type `start`, the first listed node, and finally the
    /// fixed [`FALLBACK_ENTRY`] when the node list is empty.
    pub fn entry_point(&self) -> String {
        if let Some(ref declared) = self.declared_entry {
            return declared.clone();
        }
        if let Some(start) = self.nodes.iter().find(|n| n.node_type == "start") {
            return start.id.clone();
        }
        match self.nodes.first() {
            Some(first) => first.id.clone(),
            None => FALLBACK_ENTRY.to_string(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn all_nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    pub fn all_edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }

    pub fn outgoing_edges(&self, node_id: &str) -> &[WorkflowEdge] {
        match self.adjacency.get(node_id) {
            Some(&(start, count)) => &self.edges[start..start + count],
            None => &[],
        }
    }
}
