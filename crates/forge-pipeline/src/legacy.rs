//! Fixed two-step pipeline kept for backward compatibility.
//!
//! The architecture unit runs on the raw request and the build unit runs on
//! its output. There is no wiring table and no failure isolation: an error in
//! either step is returned to the caller as-is.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use forge_types::{LegacyResult, Result};

use crate::events::{EventEmitter, RunEvent};
use crate::registry::{UnitHandler, UnitRegistry};
use crate::wiring::{CODER, PLANNER};

pub struct LegacyRunner {
    architect: Arc<dyn UnitHandler>,
    builder: Arc<dyn UnitHandler>,
    events: EventEmitter,
}

impl LegacyRunner {
    pub fn new(architect: Arc<dyn UnitHandler>, builder: Arc<dyn UnitHandler>) -> Self {
        Self {
            architect,
            builder,
            events: EventEmitter::default(),
        }
    }

    /// Take the `planner` and `coder` implementations out of a registry.
    pub fn from_registry(registry: &UnitRegistry) -> Result<Self> {
        Ok(Self::new(registry.resolve(PLANNER)?, registry.resolve(CODER)?))
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub async fn run(&self, request: &str) -> Result<LegacyResult> {
        tracing::warn!("Using legacy two-step flow (planner -> coder)");

        let architecture = self
            .step(&self.architect, Value::String(request.to_string()))
            .await?;
        let project_structure = self.step(&self.builder, architecture.clone()).await?;

        Ok(LegacyResult {
            input_request: request.to_string(),
            architecture,
            project_structure,
        })
    }

    async fn step(&self, unit: &Arc<dyn UnitHandler>, input: Value) -> Result<Value> {
        let step = unit.name().to_string();
        let started = Instant::now();
        tracing::info!(step = %step, "Legacy step started");
        self.events.emit(RunEvent::LegacyStepStarted { step: step.clone() });

        let output = unit.invoke(input).await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(step = %step, duration_ms, "Legacy step completed");
        self.events
            .emit(RunEvent::LegacyStepCompleted { step, duration_ms });
        Ok(output)
    }
}
