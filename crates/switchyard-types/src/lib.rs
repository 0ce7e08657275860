//! Shared types, errors, run context, and configuration for the Switchyard engine.
//!
//! This crate provides the foundational types used across all other Switchyard crates:
//! - `SwitchyardError` — unified error taxonomy
//! - `Context` — thread-safe key-value store plus the append-only run history
//! - `Outcome` — result of executing a node handler
//! - `RunConfig` — recognized configuration knobs with serde defaults

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unified error type for all Switchyard subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SwitchyardError {
    // === Graph errors ===
    #[error("Workflow validation failed: {0}")]
    Validation(String),

    #[error("Node '{0}' not found in graph")]
    NodeNotFound(String),

    #[error("No handler registered for node '{node}' of type '{node_type}'")]
    UnknownNodeType { node: String, node_type: String },

    // === Execution errors ===
    #[error("Handler '{handler}' failed on node '{node}': {message}")]
    Handler {
        handler: String,
        node: String,
        message: String,
    },

    // === Selection errors ===
    #[error("Macro selection requires at least one candidate")]
    EmptyCandidates,

    #[error("Invalid macro statistics for '{macro_name}': alpha={alpha}, beta={beta}")]
    InvalidStats {
        macro_name: String,
        alpha: f64,
        beta: f64,
    },

    // === Persistence errors ===
    #[error("Store error: {0}")]
    Store(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SwitchyardError {
    /// Returns `true` if the error means the graph itself is unusable and no
    /// traversal should be attempted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SwitchyardError::Validation(_)
                | SwitchyardError::NodeNotFound(_)
                | SwitchyardError::UnknownNodeType { .. }
        )
    }
}

/// A convenience alias for `Result<T, SwitchyardError>`.
pub type Result<T> = std::result::Result<T, SwitchyardError>;

// ---------------------------------------------------------------------------
// NodeStatus — outcome status of a workflow node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Retry,
    Fail,
    Skipped,
}

impl NodeStatus {
    /// The lowercase string used when matching edge conditions.
    pub fn as_condition(&self) -> &'static str {
        match self {
            NodeStatus::Success => "success",
            NodeStatus::Retry => "retry",
            NodeStatus::Fail => "fail",
            NodeStatus::Skipped => "skipped",
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome — result of executing a node handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: NodeStatus,
    /// Raw handler output. At build nodes this is what the evaluator scores.
    pub output: String,
    /// Optional explicit edge condition. When absent, the engine derives one
    /// from the status (or, at build nodes, from the evaluation result).
    pub condition: Option<String>,
    pub context_updates: HashMap<String, serde_json::Value>,
    pub notes: String,
    pub failure_reason: Option<String>,
}

impl Outcome {
    /// Create a successful outcome carrying the given output text.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Success,
            output: output.into(),
            condition: None,
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: None,
        }
    }

    /// Create a failed outcome with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status: NodeStatus::Fail,
            output: String::new(),
            condition: None,
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: Some(reason),
        }
    }

    /// Create an outcome that steers edge selection with an explicit condition.
    pub fn with_condition(status: NodeStatus, condition: impl Into<String>) -> Self {
        Self {
            status,
            output: String::new(),
            condition: Some(condition.into()),
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryEntry — one executed node in append order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub node: String,
    /// Present only for build executions; the macro the selector chose.
    #[serde(rename = "macro", skip_serializing_if = "Option::is_none")]
    pub macro_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl HistoryEntry {
    /// Entry for a non-build node execution.
    pub fn node(id: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            node: id.into(),
            macro_name: None,
            score: None,
            passed: None,
            status: Some(status),
            extra: HashMap::new(),
        }
    }

    /// Entry for a gated build execution.
    pub fn build(
        id: impl Into<String>,
        macro_name: impl Into<String>,
        score: f64,
        passed: bool,
    ) -> Self {
        Self {
            node: id.into(),
            macro_name: Some(macro_name.into()),
            score: Some(score),
            passed: Some(passed),
            status: Some(if passed {
                NodeStatus::Success
            } else {
                NodeStatus::Retry
            }),
            extra: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Context — thread-safe run state plus append-only history
// ---------------------------------------------------------------------------

/// Thread-safe key-value store shared across node executions in one run.
///
/// Cloning a `Context` yields another handle to the **same** inner state.
/// The context also owns the run history: an append-only sequence of
/// [`HistoryEntry`] values whose order is the execution order.
#[derive(Clone)]
pub struct Context {
    inner: Arc<tokio::sync::RwLock<ContextInner>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextInner {
    values: HashMap<String, serde_json::Value>,
    history: Vec<HistoryEntry>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(ContextInner {
                values: HashMap::new(),
                history: Vec::new(),
            })),
        }
    }

    /// Insert or overwrite a key.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.write().await.values.insert(key.into(), value);
    }

    /// Read a value by key (cloned).
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.values.get(key).cloned()
    }

    /// Convenience accessor that returns a `String`. Falls back to `default`
    /// when the key is absent or not a JSON string.
    pub async fn get_string(&self, key: &str, default: &str) -> String {
        self.inner
            .read()
            .await
            .values
            .get(key)
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| default.to_owned())
    }

    /// Merge `updates` into the context. Existing keys not present in
    /// `updates` are preserved.
    pub async fn apply_updates(&self, updates: HashMap<String, serde_json::Value>) {
        let mut guard = self.inner.write().await;
        guard.values.extend(updates);
    }

    /// Shallow copy of the current values map.
    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().await.values.clone()
    }

    /// Append an entry to the run history.
    pub async fn push_history(&self, entry: HistoryEntry) {
        self.inner.write().await.history.push(entry);
    }

    /// Clone of the history in append order.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.read().await.history.clone()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RunConfig — recognized configuration with serde defaults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub ci: CiConfig,
    #[serde(default)]
    pub loop_guard: LoopGuardConfig,
    /// Hard step ceiling per run. Bounds back-edge cycles independently of
    /// the advisory loop guard.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiConfig {
    /// Minimum evaluator score for a build outcome to count as passed.
    #[serde(default = "default_minimum_score")]
    pub minimum_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopGuardConfig {
    /// Window size: how many consecutive same-macro builds count as a loop.
    #[serde(rename = "N", default = "default_window")]
    pub window: usize,
    /// Minimum score improvement that counts as progress.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_minimum_score() -> f64 {
    0.75
}

fn default_window() -> usize {
    3
}

fn default_epsilon() -> f64 {
    0.02
}

fn default_max_steps() -> usize {
    50
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ci: CiConfig::default(),
            loop_guard: LoopGuardConfig::default(),
            max_steps: default_max_steps(),
        }
    }
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            minimum_score: default_minimum_score(),
        }
    }
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            epsilon: default_epsilon(),
        }
    }
}
