//! Entry point: pick the legacy runner or plan generator + plan executor.

use std::sync::Arc;

use forge_types::{ForgeError, Mode, Result, RunOutcome};

use crate::engine::PlanExecutor;
use crate::legacy::LegacyRunner;
use crate::planner::PlanGenerator;

pub struct Orchestrator {
    planner: Arc<dyn PlanGenerator>,
    executor: PlanExecutor,
    legacy: Option<LegacyRunner>,
}

impl Orchestrator {
    pub fn new(planner: Arc<dyn PlanGenerator>, executor: PlanExecutor) -> Self {
        Self {
            planner,
            executor,
            legacy: None,
        }
    }

    pub fn with_legacy(mut self, legacy: LegacyRunner) -> Self {
        self.legacy = Some(legacy);
        self
    }

    /// Run one request. Plan-generation and legacy failures are returned as
    /// errors; per-unit failures on the plan path live in the document.
    pub async fn run(&self, request: &str, mode: Mode, use_plan_engine: bool) -> Result<RunOutcome> {
        if !use_plan_engine {
            let legacy = self.legacy.as_ref().ok_or_else(|| {
                ForgeError::Config("legacy runner is not configured".into())
            })?;
            return Ok(RunOutcome::Legacy(legacy.run(request).await?));
        }

        tracing::info!(mode = %mode, "Generating execution plan");
        let plan = self.planner.generate(request, mode)?;
        tracing::info!(
            project_type = %plan.project_type,
            complexity = %plan.complexity,
            units = plan.order.len(),
            "Execution plan ready"
        );
        let doc = self.executor.execute(request, &plan).await?;
        Ok(RunOutcome::Plan(doc))
    }
}
