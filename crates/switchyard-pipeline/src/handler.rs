//! Node handler trait, dynamic dispatch wrapper, and handler registry.
//!
//! Handlers are the seam to external collaborators: LLM adapters, tool
//! clients, and domain agents all sit behind [`NodeHandler`]. The registry is
//! keyed by node `type` with an explicit unknown-type error path.

use std::collections::HashMap;

use async_trait::async_trait;

use switchyard_types::{Context, Outcome, Result, SwitchyardError};

use crate::graph::{WorkflowGraph, WorkflowNode};

#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The node type this handler serves (e.g. "start", "build", "mcp_tool").
    fn handler_type(&self) -> &str;

    /// Execute this handler for a given node.
    ///
    /// `macro_name` is `Some` only at build nodes: the macro the selector
    /// chose for this execution.
    async fn execute(
        &self,
        node: &WorkflowNode,
        macro_name: Option<&str>,
        context: &Context,
        graph: &WorkflowGraph,
    ) -> Result<Outcome>;
}

pub struct DynHandler(Box<dyn NodeHandler>);

impl std::fmt::Debug for DynHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynHandler")
            .field(&self.0.handler_type())
            .finish()
    }
}

impl DynHandler {
    pub fn new(handler: impl NodeHandler + 'static) -> Self {
        Self(Box::new(handler))
    }

    pub fn handler_type(&self) -> &str {
        self.0.handler_type()
    }

    pub async fn execute(
        &self,
        node: &WorkflowNode,
        macro_name: Option<&str>,
        context: &Context,
        graph: &WorkflowGraph,
    ) -> Result<Outcome> {
        self.0.execute(node, macro_name, context, graph).await
    }
}

pub struct HandlerRegistry {
    handlers: HashMap<String, DynHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: impl NodeHandler + 'static) {
        let t = handler.handler_type().to_string();
        self.handlers.insert(t, DynHandler::new(handler));
    }

    /// Resolve a node to its handler, or fail with the unknown-type error.
    pub fn resolve(&self, node: &WorkflowNode) -> Result<&DynHandler> {
        self.handlers
            .get(&node.node_type)
            .ok_or_else(|| SwitchyardError::UnknownNodeType {
                node: node.id.clone(),
                node_type: node.node_type.clone(),
            })
    }

    pub fn get(&self, handler_type: &str) -> Option<&DynHandler> {
        self.handlers.get(handler_type)
    }

    pub fn has(&self, handler_type: &str) -> bool {
        self.handlers.contains_key(handler_type)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn handler_type(&self) -> &str {
        "start"
    }

    async fn execute(
        &self,
        _node: &WorkflowNode,
        _macro_name: Option<&str>,
        _ctx: &Context,
        _graph: &WorkflowGraph,
    ) -> Result<Outcome> {
        Ok(Outcome::success("run started"))
    }
}

pub struct EndHandler;

#[async_trait]
impl NodeHandler for EndHandler {
    fn handler_type(&self) -> &str {
        "end"
    }

    async fn execute(
        &self,
        _node: &WorkflowNode,
        _macro_name: Option<&str>,
        _ctx: &Context,
        _graph: &WorkflowGraph,
    ) -> Result<Outcome> {
        Ok(Outcome::success("run completed"))
    }
}

/// Pass-through for plain process nodes: succeeds and surfaces the node's
/// `action` payload as output so downstream steps can read it.
pub struct PassthroughHandler;

#[async_trait]
impl NodeHandler for PassthroughHandler {
    fn handler_type(&self) -> &str {
        "process"
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        _macro_name: Option<&str>,
        _ctx: &Context,
        _graph: &WorkflowGraph,
    ) -> Result<Outcome> {
        let action = node.attr_str("action").unwrap_or_default();
        Ok(Outcome::success(action))
    }
}

/// Registry with the built-in structural handlers. Build, review, and tool
/// handlers come from the embedding application.
pub fn default_registry() -> HandlerRegistry {
    let mut reg = HandlerRegistry::new();
    reg.register(StartHandler);
    reg.register(EndHandler);
    reg.register(PassthroughHandler);
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node(id: &str, node_type: &str) -> WorkflowNode {
        WorkflowNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            attrs: HashMap::new(),
        }
    }

    fn empty_graph() -> WorkflowGraph {
        WorkflowGraph::from_json(r#"{"nodes": [{"id": "a", "type": "start"}], "edges": []}"#)
            .unwrap()
    }

    #[test]
    fn resolve_known_type() {
        let reg = default_registry();
        let node = make_node("s", "start");
        assert_eq!(reg.resolve(&node).unwrap().handler_type(), "start");
    }

    #[test]
    fn resolve_unknown_type_errors() {
        let reg = default_registry();
        let node = make_node("x", "teleport");
        let err = reg.resolve(&node).unwrap_err();
        match err {
            SwitchyardError::UnknownNodeType { node, node_type } => {
                assert_eq!(node, "x");
                assert_eq!(node_type, "teleport");
            }
            other => panic!("expected UnknownNodeType, got: {other:?}"),
        }
    }

    #[test]
    fn register_and_query() {
        let mut reg = HandlerRegistry::new();
        assert!(!reg.has("start"));
        reg.register(StartHandler);
        assert!(reg.has("start"));
        assert!(reg.get("start").is_some());
        assert!(reg.get("nonexistent").is_none());
    }

    #[test]
    fn default_registry_has_structural_handlers() {
        let reg = default_registry();
        assert!(reg.has("start"));
        assert!(reg.has("end"));
        assert!(reg.has("process"));
        assert!(!reg.has("build"));
    }

    #[tokio::test]
    async fn start_and_end_handlers_succeed() {
        let ctx = Context::default();
        let graph = empty_graph();

        let start = StartHandler
            .execute(&make_node("s", "start"), None, &ctx, &graph)
            .await
            .unwrap();
        assert_eq!(start.status, switchyard_types::NodeStatus::Success);

        let end = EndHandler
            .execute(&make_node("e", "end"), None, &ctx, &graph)
            .await
            .unwrap();
        assert_eq!(end.output, "run completed");
    }

    #[tokio::test]
    async fn passthrough_surfaces_the_action_payload() {
        let ctx = Context::default();
        let graph = empty_graph();
        let mut node = make_node("p", "process");
        node.attrs
            .insert("action".to_string(), serde_json::json!("collect inputs"));

        let outcome = PassthroughHandler
            .execute(&node, None, &ctx, &graph)
            .await
            .unwrap();
        assert_eq!(outcome.output, "collect inputs");
    }
}
