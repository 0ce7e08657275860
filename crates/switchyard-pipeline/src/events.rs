//! Run event system for observability.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so external
//! observers (loggers, metrics collectors, UIs) can follow execution progress
//! without coupling to the engine internals.

use serde::{Deserialize, Serialize};

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        node_count: usize,
    },
    NodeStarted {
        node_id: String,
        node_type: String,
    },
    NodeCompleted {
        node_id: String,
        condition: String,
    },
    MacroSelected {
        node_id: String,
        macro_name: String,
    },
    BuildEvaluated {
        node_id: String,
        macro_name: String,
        score: f64,
        passed: bool,
    },
    LoopDetected {
        macro_name: Option<String>,
        window: usize,
    },
    EdgeSelected {
        from: String,
        to: String,
        condition: Option<String>,
    },
    RunCompleted {
        run_id: String,
        steps: usize,
    },
    RunStalled {
        run_id: String,
        steps: usize,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(RunEvent::MacroSelected {
            node_id: "build".into(),
            macro_name: "careful".into(),
        });

        match rx.recv().await.unwrap() {
            RunEvent::MacroSelected {
                node_id,
                macro_name,
            } => {
                assert_eq!(node_id, "build");
                assert_eq!(macro_name, "careful");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_silent() {
        let emitter = EventEmitter::new(4);
        // No receiver — should not panic or error.
        emitter.emit(RunEvent::RunStarted {
            run_id: "r1".into(),
            node_count: 2,
        });
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_the_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(RunEvent::RunCompleted {
            run_id: "r1".into(),
            steps: 4,
        });

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                RunEvent::RunCompleted { steps, .. } => assert_eq!(steps, 4),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
