//! Run event system for observability.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, progress displays, API streams) can follow a
//! run without coupling to the engine internals. Events carry no data any
//! component depends on; dropping them never changes a result.

use serde::{Deserialize, Serialize};

/// Events emitted while executing a plan or the legacy pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        project_type: String,
        mode: String,
        order: Vec<String>,
        started_at: String,
    },
    UnitStarted {
        run_id: String,
        unit: String,
        position: usize,
    },
    UnitCompleted {
        run_id: String,
        unit: String,
        duration_ms: u64,
    },
    UnitFailed {
        run_id: String,
        unit: String,
        error: String,
    },
    UnitPlaceholder {
        run_id: String,
        unit: String,
    },
    RunCompleted {
        run_id: String,
        completed: usize,
        failed: Vec<String>,
        duration_ms: u64,
    },
    LegacyStepStarted {
        step: String,
    },
    LegacyStepCompleted {
        step: String,
        duration_ms: u64,
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
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
