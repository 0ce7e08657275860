//! Workflow execution engine — the core traversal loop.
//!
//! Validates the graph, resolves the entry node, then executes one node at a
//! time: dispatch by node type, macro selection and evaluation gating at
//! build nodes, advisory stagnation checks, durable run records, and edge
//! selection until a terminal node or the step ceiling.

use std::collections::HashMap;

use switchyard_bandit::BanditSelector;
use switchyard_eval::{EvaluationContext, Evaluator};
use switchyard_memory::MemoryStore;
use switchyard_types::{
    Context, HistoryEntry, Outcome, Result, RunConfig, SwitchyardError,
};

use crate::edge_selection::next_node;
use crate::events::{EventEmitter, RunEvent};
use crate::graph::{WorkflowGraph, WorkflowNode};
use crate::handler::HandlerRegistry;
use crate::loop_guard::detect_loop;
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Reached an end node or a node with no applicable outgoing edge.
    Completed,
    /// Hit the step ceiling before reaching a terminal node.
    Stalled,
}

/// The result of a finished run.
#[derive(Debug)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub completed_nodes: Vec<String>,
    pub node_outcomes: HashMap<String, Outcome>,
    pub history: Vec<HistoryEntry>,
    pub final_context: HashMap<String, serde_json::Value>,
    /// Advisory: the loop guard flagged stagnation at least once. Policy
    /// (fallback macro, abort, or ignore) belongs to the caller.
    pub loop_detected: bool,
    pub steps: usize,
}

/// The core workflow executor. Owns the handler registry and the seams to
/// the selector, evaluator, and store.
pub struct WorkflowExecutor {
    registry: HandlerRegistry,
    selector: BanditSelector,
    evaluator: Evaluator,
    store: MemoryStore,
    config: RunConfig,
    /// Macro candidates for build nodes that declare none of their own.
    default_macros: Vec<String>,
    emitter: EventEmitter,
}

impl WorkflowExecutor {
    /// Create an executor. The store handle is shared with the selector, so
    /// concurrent executors over one store learn from each other's runs.
    pub fn new(registry: HandlerRegistry, store: MemoryStore, config: RunConfig) -> Self {
        let selector = BanditSelector::new(store.clone());
        let evaluator = Evaluator::from_config(&config);
        Self {
            registry,
            selector,
            evaluator,
            store,
            config,
            default_macros: Vec::new(),
            emitter: EventEmitter::default(),
        }
    }

    /// Fallback macro candidates for build nodes without a `macros` payload.
    pub fn with_default_macros(mut self, macros: Vec<String>) -> Self {
        self.default_macros = macros;
        self
    }

    pub fn selector(&self) -> &BanditSelector {
        &self.selector
    }

    pub fn events(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Execute the workflow to completion (or until the step ceiling).
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        initial_state: HashMap<String, serde_json::Value>,
    ) -> Result<RunResult> {
        validate_or_raise(graph)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let context = Context::new();
        context.apply_updates(initial_state).await;

        let entry = graph.entry_point();
        let mut current = graph
            .node(&entry)
            .ok_or_else(|| SwitchyardError::NodeNotFound(entry.clone()))?;

        let mut completed_nodes: Vec<String> = Vec::new();
        let mut node_outcomes: HashMap<String, Outcome> = HashMap::new();
        let mut steps = 0usize;
        let mut loop_detected = false;

        self.emitter.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
            node_count: graph.all_nodes().len(),
        });

        let status = loop {
            if steps >= self.config.max_steps {
                tracing::warn!(
                    run_id = %run_id,
                    steps,
                    node = %current.id,
                    "Step ceiling reached before a terminal node; run is stalled"
                );
                self.emitter.emit(RunEvent::RunStalled {
                    run_id: run_id.clone(),
                    steps,
                });
                break RunStatus::Stalled;
            }
            steps += 1;

            let handler = self.registry.resolve(current)?;
            self.emitter.emit(RunEvent::NodeStarted {
                node_id: current.id.clone(),
                node_type: current.node_type.clone(),
            });

            let macro_name = if current.is_build() {
                let candidates = current
                    .macros()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| self.default_macros.clone());
                let chosen = self.selector.choose(&candidates).await?;
                self.emitter.emit(RunEvent::MacroSelected {
                    node_id: current.id.clone(),
                    macro_name: chosen.clone(),
                });
                Some(chosen)
            } else {
                None
            };

            let outcome = handler
                .execute(current, macro_name.as_deref(), &context, graph)
                .await?;
            context.apply_updates(outcome.context_updates.clone()).await;
            completed_nodes.push(current.id.clone());
            node_outcomes.insert(current.id.clone(), outcome.clone());

            let condition = match macro_name {
                Some(ref chosen) => {
                    self.gate_build(current, chosen, &outcome, &context).await?
                }
                None => {
                    context
                        .push_history(HistoryEntry::node(&current.id, outcome.status))
                        .await;
                    outcome
                        .condition
                        .clone()
                        .unwrap_or_else(|| outcome.status.as_condition().to_string())
                }
            };

            if macro_name.is_some() {
                let history = context.history().await;
                if detect_loop(
                    &history,
                    self.config.loop_guard.window,
                    self.config.loop_guard.epsilon,
                ) {
                    loop_detected = true;
                    tracing::warn!(
                        run_id = %run_id,
                        node = %current.id,
                        window = self.config.loop_guard.window,
                        "Stagnation detected: same macro repeating without improvement"
                    );
                    self.emitter.emit(RunEvent::LoopDetected {
                        macro_name: macro_name.clone(),
                        window: self.config.loop_guard.window,
                    });
                    context.set("loop_detected", serde_json::json!(true)).await;
                }
            }

            context
                .set("outcome", serde_json::Value::String(condition.clone()))
                .await;
            self.emitter.emit(RunEvent::NodeCompleted {
                node_id: current.id.clone(),
                condition: condition.clone(),
            });
            self.persist_run_record(&run_id, "running", steps, &context)
                .await?;

            if current.is_end() {
                break RunStatus::Completed;
            }

            match next_node(graph, &current.id, &condition) {
                Some(edge) => {
                    self.emitter.emit(RunEvent::EdgeSelected {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        condition: edge.condition.clone(),
                    });
                    current = graph
                        .node(&edge.to)
                        .ok_or_else(|| SwitchyardError::NodeNotFound(edge.to.clone()))?;
                }
                None => break RunStatus::Completed,
            }
        };

        let status_str = match status {
            RunStatus::Completed => "completed",
            RunStatus::Stalled => "stalled",
        };
        self.persist_run_record(&run_id, status_str, steps, &context)
            .await?;
        if status == RunStatus::Completed {
            self.emitter.emit(RunEvent::RunCompleted {
                run_id: run_id.clone(),
                steps,
            });
        }

        Ok(RunResult {
            run_id,
            status,
            completed_nodes,
            node_outcomes,
            history: context.history().await,
            final_context: context.snapshot().await,
            loop_detected,
            steps,
        })
    }

    /// Score a build outcome, feed the reward back into the selector, and
    /// return the traversal condition derived from the gate.
    async fn gate_build(
        &self,
        node: &WorkflowNode,
        macro_name: &str,
        outcome: &Outcome,
        context: &Context,
    ) -> Result<String> {
        let eval_ctx = EvaluationContext::from_attrs(&node.attrs);
        let eval = self.evaluator.evaluate(&outcome.output, &eval_ctx);

        self.selector.record_reward(macro_name, eval.passed).await?;
        self.emitter.emit(RunEvent::BuildEvaluated {
            node_id: node.id.clone(),
            macro_name: macro_name.to_string(),
            score: eval.score,
            passed: eval.passed,
        });

        context
            .push_history(HistoryEntry::build(
                &node.id,
                macro_name,
                eval.score,
                eval.passed,
            ))
            .await;
        context
            .set(
                format!("{}.score", node.id),
                serde_json::json!(eval.score),
            )
            .await;
        context
            .set(
                format!("{}.feedback", node.id),
                serde_json::Value::String(eval.feedback.clone()),
            )
            .await;

        Ok(if eval.passed {
            "success".to_string()
        } else {
            "retry".to_string()
        })
    }

    /// Durable run record: the history snapshot plus status and timestamp.
    async fn persist_run_record(
        &self,
        run_id: &str,
        status: &str,
        steps: usize,
        context: &Context,
    ) -> Result<()> {
        let history = context.history().await;
        let record = serde_json::json!({
            "status": status,
            "steps": steps,
            "history": history,
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });
        self.store.set(format!("runs.{run_id}"), record).await
    }
}
