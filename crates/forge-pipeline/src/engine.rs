//! Plan execution engine: the resolve, wire, invoke, record loop.
//!
//! One unit's failure never aborts a run. Resolution errors, unit errors and
//! unit panics all become failure records in the [`ResultDocument`], and the
//! loop moves on to the next name in the plan's order.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::{JoinError, JoinHandle};

use forge_types::{ExecutionPlan, ForgeError, Result, ResultDocument, UnitResult};

use crate::events::{EventEmitter, RunEvent};
use crate::registry::{UnitHandler, UnitRegistry};
use crate::wiring::{Dependencies, RequestContext, WiringRule, WiringTable};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// How units are scheduled within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One unit at a time, in plan order.
    #[default]
    Sequential,
    /// Units with no wiring dependency between them run concurrently.
    Layered,
}

impl FromStr for ExecutionStrategy {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ExecutionStrategy::Sequential),
            "layered" => Ok(ExecutionStrategy::Layered),
            other => Err(ForgeError::Config(format!(
                "unknown execution strategy '{other}', expected sequential or layered"
            ))),
        }
    }
}

/// The plan executor. Owns a unit registry and a wiring table.
pub struct PlanExecutor {
    registry: UnitRegistry,
    wiring: WiringTable,
    events: EventEmitter,
    strategy: ExecutionStrategy,
}

/// What to do with one unit after resolution and wiring.
enum Dispatch {
    Done(UnitResult),
    Invoke {
        handler: Arc<dyn UnitHandler>,
        input: Value,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn spawn_unit(handler: Arc<dyn UnitHandler>, input: Value) -> JoinHandle<Result<Value>> {
    tokio::spawn(async move { handler.invoke(input).await })
}

fn join_error(unit: &str, err: JoinError) -> ForgeError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        ForgeError::UnitPanicked {
            unit: unit.to_string(),
            message,
        }
    } else {
        ForgeError::UnitFailed {
            unit: unit.to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// PlanExecutor
// ---------------------------------------------------------------------------

impl PlanExecutor {
    /// Create an executor with the standard wiring table.
    pub fn new(registry: UnitRegistry) -> Self {
        Self {
            registry,
            wiring: WiringTable::standard(),
            events: EventEmitter::default(),
            strategy: ExecutionStrategy::default(),
        }
    }

    pub fn with_wiring(mut self, wiring: WiringTable) -> Self {
        self.wiring = wiring;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Run every unit in `plan.order` and return the result document.
    ///
    /// Only an invalid plan is an error here; unit-level problems are
    /// recorded in the document.
    pub async fn execute(&self, request: &str, plan: &ExecutionPlan) -> Result<ResultDocument> {
        plan.validate()?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        tracing::info!(
            run_id = %run_id,
            project_type = %plan.project_type,
            complexity = %plan.complexity,
            mode = %plan.mode,
            order = ?plan.order,
            strategy = ?self.strategy,
            "Executing plan"
        );
        self.events.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
            project_type: plan.project_type.clone(),
            mode: plan.mode.to_string(),
            order: plan.order.clone(),
            started_at: chrono::Utc::now().to_rfc3339(),
        });

        let ctx = RequestContext::new(request, plan.mode);
        let mut doc = ResultDocument::new(request, plan);
        match self.strategy {
            ExecutionStrategy::Sequential => {
                self.run_sequential(&run_id, plan, &ctx, &mut doc).await
            }
            ExecutionStrategy::Layered => self.run_layered(&run_id, plan, &ctx, &mut doc).await,
        }

        let failed: Vec<String> = doc.failed_units().into_iter().map(String::from).collect();
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            completed = doc.len(),
            failed = failed.len(),
            duration_ms,
            "Plan execution complete"
        );
        self.events.emit(RunEvent::RunCompleted {
            run_id,
            completed: doc.len(),
            failed,
            duration_ms,
        });
        Ok(doc)
    }

    async fn run_sequential(
        &self,
        run_id: &str,
        plan: &ExecutionPlan,
        ctx: &RequestContext<'_>,
        doc: &mut ResultDocument,
    ) {
        for (position, unit) in plan.order.iter().enumerate() {
            let result = match self.dispatch(run_id, unit, position, doc, ctx) {
                Dispatch::Done(result) => result,
                Dispatch::Invoke { handler, input } => {
                    let started = Instant::now();
                    let joined = spawn_unit(handler, input).await;
                    self.settle(run_id, unit, started, joined)
                }
            };
            doc.record(unit.clone(), result);
        }
    }

    async fn run_layered(
        &self,
        run_id: &str,
        plan: &ExecutionPlan,
        ctx: &RequestContext<'_>,
        doc: &mut ResultDocument,
    ) {
        // Results land here in completion order; `doc` is filled in plan order.
        let mut finished = doc.clone();

        for layer in self.layers(&plan.order) {
            tracing::debug!(run_id = %run_id, units = ?layer, "Starting layer");
            let mut pending = Vec::new();
            for position in layer {
                let unit = &plan.order[position];
                let upstream = finished.restricted_to(&plan.order[..position]);
                match self.dispatch(run_id, unit, position, &upstream, ctx) {
                    Dispatch::Done(result) => finished.record(unit.clone(), result),
                    Dispatch::Invoke { handler, input } => {
                        pending.push((position, Instant::now(), spawn_unit(handler, input)));
                    }
                }
            }
            for (position, started, task) in pending {
                let unit = &plan.order[position];
                let joined = task.await;
                let result = self.settle(run_id, unit, started, joined);
                finished.record(unit.clone(), result);
            }
        }

        for unit in &plan.order {
            let result = finished
                .get(unit)
                .cloned()
                .unwrap_or_else(|| UnitResult::failure(format!("{unit} was never scheduled")));
            doc.record(unit.clone(), result);
        }
    }

    /// Group positions of `order` into layers. A unit's layer is one past the
    /// deepest upstream unit it is wired to; only units earlier in `order`
    /// count as upstream.
    fn layers(&self, order: &[String]) -> Vec<Vec<usize>> {
        let mut depth = vec![0usize; order.len()];
        for (position, unit) in order.iter().enumerate() {
            let deps: Vec<usize> = match self.wiring.rule(unit).map(WiringRule::dependencies) {
                None => Vec::new(),
                Some(Dependencies::AllUpstream) => (0..position).collect(),
                Some(Dependencies::Named(names)) => order[..position]
                    .iter()
                    .enumerate()
                    .filter(|(_, u)| names.iter().any(|n| n == *u))
                    .map(|(i, _)| i)
                    .collect(),
            };
            let level = deps.iter().map(|&d| depth[d] + 1).max().unwrap_or(0);
            depth[position] = level;
        }

        let count = depth.iter().max().map_or(0, |m| m + 1);
        let mut layers = vec![Vec::new(); count];
        for (position, level) in depth.into_iter().enumerate() {
            layers[level].push(position);
        }
        layers
    }

    /// Resolve and wire one unit against the results recorded so far.
    fn dispatch(
        &self,
        run_id: &str,
        unit: &str,
        position: usize,
        results: &ResultDocument,
        ctx: &RequestContext<'_>,
    ) -> Dispatch {
        let Some(rule) = self.wiring.rule(unit) else {
            tracing::info!(run_id = %run_id, unit = %unit, "No wiring rule, recording placeholder");
            self.events.emit(RunEvent::UnitPlaceholder {
                run_id: run_id.to_string(),
                unit: unit.to_string(),
            });
            return Dispatch::Done(UnitResult::placeholder(unit));
        };

        tracing::info!(run_id = %run_id, unit = %unit, position, "Running unit");
        self.events.emit(RunEvent::UnitStarted {
            run_id: run_id.to_string(),
            unit: unit.to_string(),
            position,
        });

        match self.registry.resolve(unit) {
            Ok(handler) => Dispatch::Invoke {
                handler,
                input: rule.wire(results, ctx),
            },
            Err(e) => Dispatch::Done(self.fail(run_id, unit, e)),
        }
    }

    /// Turn a finished unit task into its recorded result.
    fn settle(
        &self,
        run_id: &str,
        unit: &str,
        started: Instant,
        joined: std::result::Result<Result<Value>, JoinError>,
    ) -> UnitResult {
        let outcome = match joined {
            Ok(result) => result,
            Err(e) => Err(join_error(unit, e)),
        };
        match outcome {
            Ok(output) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(run_id = %run_id, unit = %unit, duration_ms, "Unit completed");
                self.events.emit(RunEvent::UnitCompleted {
                    run_id: run_id.to_string(),
                    unit: unit.to_string(),
                    duration_ms,
                });
                UnitResult::Output(output)
            }
            Err(e) => self.fail(run_id, unit, e),
        }
    }

    fn fail(&self, run_id: &str, unit: &str, error: ForgeError) -> UnitResult {
        let message = error.to_string();
        tracing::warn!(run_id = %run_id, unit = %unit, error = %message, "Unit failed");
        self.events.emit(RunEvent::UnitFailed {
            run_id: run_id.to_string(),
            unit: unit.to_string(),
            error: message.clone(),
        });
        UnitResult::failure(message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FnUnit;
    use crate::wiring::{AUTH, CODER, DB_SCHEMA, DEPLOYER, PLANNER, TESTER};
    use forge_types::Mode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn plan(order: &[&str]) -> ExecutionPlan {
        ExecutionPlan::from_order(order.iter().copied())
    }

    /// Registry where every standard unit echoes `{unit, input}`.
    fn echo_registry() -> UnitRegistry {
        let mut reg = UnitRegistry::new();
        for name in [PLANNER, DB_SCHEMA, AUTH, CODER, TESTER, DEPLOYER] {
            reg.register(FnUnit::new(name, move |input| {
                Ok(json!({ "unit": name, "input": input }))
            }));
        }
        reg
    }

    // Scenario A: build receives the architecture output verbatim.
    #[tokio::test]
    async fn coder_receives_planner_output() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in = seen.clone();
        let mut reg = UnitRegistry::new();
        reg.register(FnUnit::new(PLANNER, |_| Ok(json!({"layout": "x"}))));
        reg.register(FnUnit::new(CODER, move |input| {
            *seen_in.lock().unwrap() = Some(input.clone());
            Ok(json!({"files": 1}))
        }));

        let doc = PlanExecutor::new(reg)
            .execute("todo app", &plan(&[PLANNER, CODER]))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(json!({"layout": "x"})));
        assert_eq!(doc.get(CODER), Some(&UnitResult::Output(json!({"files": 1}))));
    }

    // Scenario B: a failing unit is recorded and the run continues.
    #[tokio::test]
    async fn failed_unit_is_isolated() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in = seen.clone();
        let mut reg = UnitRegistry::new();
        reg.register(FnUnit::new(PLANNER, |_| {
            Err(ForgeError::Other("bad idea".into()))
        }));
        reg.register(FnUnit::new(DB_SCHEMA, move |input| {
            *seen_in.lock().unwrap() = Some(input.clone());
            Ok(json!({"tables": []}))
        }));

        let doc = PlanExecutor::new(reg)
            .execute("todo app", &plan(&[PLANNER, DB_SCHEMA]))
            .await
            .unwrap();

        assert_eq!(doc.get(PLANNER), Some(&UnitResult::failure("bad idea")));
        assert_eq!(*seen.lock().unwrap(), Some(json!({})));
        assert_eq!(doc.get(DB_SCHEMA), Some(&UnitResult::Output(json!({"tables": []}))));
        assert_eq!(doc.failed_units(), vec![PLANNER]);
    }

    // Scenario C: unknown names get a placeholder and no lookup.
    #[tokio::test]
    async fn unrecognized_unit_gets_placeholder() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();
        let mut reg = UnitRegistry::new();
        reg.register(FnUnit::new("mystery-unit", move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            Ok(json!("should not run"))
        }));

        let doc = PlanExecutor::new(reg)
            .execute("x", &plan(&["mystery-unit"]))
            .await
            .unwrap();

        assert_eq!(
            doc.get("mystery-unit").unwrap().to_value(),
            json!({"status": "pending", "message": "mystery-unit not yet implemented"})
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // Scenario E: an empty order yields an empty document.
    #[tokio::test]
    async fn empty_order_yields_empty_outputs() {
        let doc = PlanExecutor::new(UnitRegistry::new())
            .execute("x", &plan(&[]))
            .await
            .unwrap();
        assert!(doc.is_empty());
        assert_eq!(doc.to_value()["unit_outputs"], json!({}));
    }

    #[tokio::test]
    async fn unregistered_known_unit_fails_without_aborting() {
        let mut reg = UnitRegistry::new();
        reg.register(FnUnit::new(CODER, |_| Ok(json!("code"))));

        let doc = PlanExecutor::new(reg)
            .execute("x", &plan(&[AUTH, CODER]))
            .await
            .unwrap();

        assert_eq!(
            doc.get(AUTH).and_then(UnitResult::error),
            Some("No implementation registered for unit 'auth'")
        );
        assert_eq!(doc.get(CODER), Some(&UnitResult::Output(json!("code"))));
    }

    #[tokio::test]
    async fn panicking_unit_becomes_failure_record() {
        let mut reg = UnitRegistry::new();
        reg.register(FnUnit::new(PLANNER, |_| panic!("planner exploded")));
        reg.register(FnUnit::new(CODER, |_| Ok(json!("code"))));

        let doc = PlanExecutor::new(reg)
            .execute("x", &plan(&[PLANNER, CODER]))
            .await
            .unwrap();

        let error = doc.get(PLANNER).and_then(UnitResult::error).unwrap();
        assert!(error.contains("planner exploded"), "got: {error}");
        assert_eq!(doc.get(CODER), Some(&UnitResult::Output(json!("code"))));
    }

    #[tokio::test]
    async fn outputs_match_order_cardinality_and_sequence() {
        let order = [TESTER, "docs", PLANNER, AUTH, "lint", DEPLOYER, CODER, DB_SCHEMA];
        let doc = PlanExecutor::new(echo_registry())
            .execute("x", &plan(&order))
            .await
            .unwrap();

        let names: Vec<&str> = doc.unit_outputs().keys().map(String::as_str).collect();
        assert_eq!(names, order.to_vec());
    }

    #[tokio::test]
    async fn unit_never_sees_downstream_outputs() {
        let doc = PlanExecutor::new(echo_registry())
            .execute("x", &plan(&[CODER, PLANNER]))
            .await
            .unwrap();
        assert_eq!(doc.get(CODER).unwrap().to_value()["input"], json!({}));
    }

    #[tokio::test]
    async fn deployer_sees_running_document_and_mode() {
        let p = plan(&[PLANNER, DEPLOYER]).with_mode(Mode::Production);
        let doc = PlanExecutor::new(echo_registry())
            .execute("shop", &p)
            .await
            .unwrap();

        let input = &doc.get(DEPLOYER).unwrap().to_value()["input"];
        assert_eq!(input["mode"], "production");
        assert_eq!(input["results"]["input_request"], "shop");
        let upstream = input["results"]["unit_outputs"].as_object().unwrap();
        assert_eq!(upstream.len(), 1);
        assert!(upstream.contains_key(PLANNER));
    }

    #[tokio::test]
    async fn invalid_plan_is_rejected() {
        let mut p = plan(&[PLANNER]);
        p.order.push(PLANNER.into());
        let result = PlanExecutor::new(echo_registry()).execute("x", &p).await;
        assert!(matches!(result, Err(ForgeError::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn events_follow_the_run() {
        let events = EventEmitter::new(64);
        let mut rx = events.subscribe();
        let mut reg = UnitRegistry::new();
        reg.register(FnUnit::new(PLANNER, |_| Ok(json!({}))));

        PlanExecutor::new(reg)
            .with_events(events)
            .execute("x", &plan(&[PLANNER, AUTH, "docs"]))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["event"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec![
                "run_started",
                "unit_started",
                "unit_completed",
                "unit_started",
                "unit_failed",
                "unit_placeholder",
                "run_completed",
            ]
        );
    }

    // --- Layered strategy ---

    #[test]
    fn layers_follow_wiring_dependencies() {
        let executor = PlanExecutor::new(UnitRegistry::new());
        let order: Vec<String> = [PLANNER, DB_SCHEMA, CODER, AUTH, TESTER, DEPLOYER]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            executor.layers(&order),
            vec![vec![0], vec![1, 2], vec![3], vec![4], vec![5]]
        );
    }

    #[test]
    fn layers_ignore_dependencies_scheduled_later() {
        let executor = PlanExecutor::new(UnitRegistry::new());
        let order: Vec<String> = [CODER, PLANNER, "docs"].iter().map(|s| s.to_string()).collect();
        assert_eq!(executor.layers(&order), vec![vec![0, 1, 2]]);
    }

    #[tokio::test]
    async fn layered_matches_sequential() {
        let p = plan(&[PLANNER, DB_SCHEMA, "docs", CODER, AUTH, TESTER, DEPLOYER])
            .with_mode(Mode::Production);

        let sequential = PlanExecutor::new(echo_registry())
            .execute("shop", &p)
            .await
            .unwrap();
        let layered = PlanExecutor::new(echo_registry())
            .with_strategy(ExecutionStrategy::Layered)
            .execute("shop", &p)
            .await
            .unwrap();

        let seq_names: Vec<&String> = sequential.unit_outputs().keys().collect();
        let lay_names: Vec<&String> = layered.unit_outputs().keys().collect();
        assert_eq!(seq_names, lay_names);
        assert_eq!(sequential.to_value(), layered.to_value());
    }

    fn output_keys(v: &Value) -> Vec<String> {
        v["unit_outputs"].as_object().unwrap().keys().cloned().collect()
    }

    #[tokio::test]
    async fn deployer_sees_outputs_in_plan_order() {
        let p = plan(&[TESTER, PLANNER, CODER, DEPLOYER]);
        for strategy in [ExecutionStrategy::Sequential, ExecutionStrategy::Layered] {
            let doc = PlanExecutor::new(echo_registry())
                .with_strategy(strategy)
                .execute("x", &p)
                .await
                .unwrap();

            let input = &doc.get(DEPLOYER).unwrap().to_value()["input"];
            assert_eq!(
                output_keys(&input["results"]),
                vec![TESTER, PLANNER, CODER],
                "strategy {strategy:?}"
            );
            assert_eq!(
                output_keys(&doc.to_value()),
                vec![TESTER, PLANNER, CODER, DEPLOYER],
                "strategy {strategy:?}"
            );
        }
    }

    #[tokio::test]
    async fn layered_document_value_keeps_plan_order() {
        let order = ["docs", PLANNER, AUTH, CODER, DEPLOYER];
        let doc = PlanExecutor::new(echo_registry())
            .with_strategy(ExecutionStrategy::Layered)
            .execute("x", &plan(&order))
            .await
            .unwrap();
        assert_eq!(output_keys(&doc.to_value()), order.to_vec());
        assert_eq!(
            output_keys(&serde_json::to_value(&doc).unwrap()),
            order.to_vec()
        );
    }

    #[tokio::test]
    async fn layered_isolates_failures() {
        let mut reg = echo_registry();
        reg.register(FnUnit::new(DB_SCHEMA, |_| Err(ForgeError::Other("schema down".into()))));

        let doc = PlanExecutor::new(reg)
            .with_strategy(ExecutionStrategy::Layered)
            .execute("x", &plan(&[PLANNER, DB_SCHEMA, CODER, AUTH]))
            .await
            .unwrap();

        assert_eq!(doc.len(), 4);
        assert_eq!(doc.failed_units(), vec![DB_SCHEMA]);
        assert_eq!(
            doc.get(AUTH).unwrap().to_value()["input"],
            json!({"schema": {}, "mode": "full"})
        );
    }

    #[test]
    fn strategy_parses() {
        assert_eq!(
            "Layered".parse::<ExecutionStrategy>().unwrap(),
            ExecutionStrategy::Layered
        );
        assert!("parallel".parse::<ExecutionStrategy>().is_err());
    }
}
