//! Plan execution engine, unit registry, input wiring, and legacy runner.
//!
//! This crate implements the Forge runner: unit registry lookup, table-driven
//! input wiring, failure-isolated plan execution, the legacy two-step flow,
//! and the entry point that chooses between them.

pub mod config;
pub mod engine;
pub mod events;
pub mod legacy;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod units;
pub mod wiring;

pub use config::{stub_registry, EngineConfig, ForgeConfig, UnitConfig};
pub use engine::{ExecutionStrategy, PlanExecutor};
pub use events::{EventEmitter, RunEvent};
pub use legacy::LegacyRunner;
pub use orchestrator::Orchestrator;
pub use planner::{PlanGenerator, RuleBasedPlanner, StaticPlanner};
pub use registry::{FnUnit, UnitHandler, UnitRegistry};
pub use units::{CommandUnit, StubUnit};
pub use wiring::{
    Dependencies, RequestContext, Source, WiringRule, WiringTable, AUTH, CODER, DB_SCHEMA,
    DEPLOYER, PLANNER, TESTER,
};
