//! Shared types, errors, plans, and result documents for the Forge engine.
//!
//! This crate provides the foundational types used across all other Forge crates:
//! - `ForgeError`: unified error taxonomy
//! - `Mode`: plan-wide execution mode (simple / full / production)
//! - `ExecutionPlan`: ordered, validated list of units for one request
//! - `UnitResult` / `FailureRecord`: a unit's output or the data standing in for it
//! - `ResultDocument`: the ordered record of every unit's result for one run

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Unified error type for all Forge subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    // === Planning Errors ===
    #[error("Plan generation failed: {0}")]
    PlanGeneration(String),

    #[error("Invalid execution plan: {0}")]
    InvalidPlan(String),

    #[error("Unknown mode '{0}', expected one of: simple, full, production")]
    InvalidMode(String),

    // === Unit Errors ===
    #[error("No implementation registered for unit '{unit}'")]
    UnitNotFound { unit: String },

    #[error("Unit '{unit}' failed: {message}")]
    UnitFailed { unit: String, message: String },

    #[error("Unit '{unit}' panicked: {message}")]
    UnitPanicked { unit: String, message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    // === Configuration ===
    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A convenience alias for `Result<T, ForgeError>`.
pub type Result<T> = std::result::Result<T, ForgeError>;

// ---------------------------------------------------------------------------
// Mode: plan-wide execution mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Simple,
    #[default]
    Full,
    Production,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Simple => "simple",
            Mode::Full => "full",
            Mode::Production => "production",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Mode::Simple),
            "full" => Ok(Mode::Full),
            "production" => Ok(Mode::Production),
            other => Err(ForgeError::InvalidMode(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionPlan: ordered units for one request
// ---------------------------------------------------------------------------

/// The plan produced by a plan generator and consumed by one engine run.
///
/// `units` is the set of units the plan intends to run and must agree with
/// `order`, which fixes the execution sequence. `configuration` is free-form
/// and carried through to the result document untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub project_type: String,
    pub complexity: String,
    #[serde(default)]
    pub mode: Mode,
    pub units: Vec<String>,
    pub order: Vec<String>,
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

impl ExecutionPlan {
    /// Build a plan whose unit set is exactly `order`.
    pub fn from_order<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let order: Vec<String> = order.into_iter().map(Into::into).collect();
        Self {
            project_type: "unspecified".into(),
            complexity: "unspecified".into(),
            mode: Mode::default(),
            units: order.clone(),
            order,
            configuration: Map::new(),
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Check structural consistency. An empty order is valid.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in &self.order {
            if name.trim().is_empty() {
                return Err(ForgeError::InvalidPlan(
                    "execution order contains a blank unit name".into(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(ForgeError::InvalidPlan(format!(
                    "unit '{name}' appears more than once in the execution order"
                )));
            }
        }

        let declared: HashSet<&str> = self.units.iter().map(String::as_str).collect();
        if let Some(missing) = self.order.iter().find(|n| !declared.contains(n.as_str())) {
            return Err(ForgeError::InvalidPlan(format!(
                "unit '{missing}' is ordered but not declared in units"
            )));
        }
        if let Some(extra) = self.units.iter().find(|n| !seen.contains(n.as_str())) {
            return Err(ForgeError::InvalidPlan(format!(
                "unit '{extra}' is declared but never ordered"
            )));
        }
        Ok(())
    }

    fn to_value(&self) -> Value {
        json!({
            "project_type": self.project_type,
            "complexity": self.complexity,
            "mode": self.mode.as_str(),
            "units": self.units,
            "order": self.order,
            "configuration": Value::Object(self.configuration.clone()),
        })
    }
}

// ---------------------------------------------------------------------------
// UnitResult: output or failure record
// ---------------------------------------------------------------------------

/// Stand-in for a unit's output when the unit could not produce one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailureRecord {
    pub error: String,
}

/// A unit's entry in the result document.
///
/// Serialized untagged: a failure is `{"error": ...}` and an output is the
/// value itself. Deserializing picks `Failed` for any object with exactly one
/// string `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnitResult {
    Failed(FailureRecord),
    Output(Value),
}

impl UnitResult {
    pub fn failure(error: impl Into<String>) -> Self {
        UnitResult::Failed(FailureRecord {
            error: error.into(),
        })
    }

    /// Output synthesized for a unit the wiring table does not know.
    pub fn placeholder(unit: &str) -> Self {
        UnitResult::Output(json!({
            "status": "pending",
            "message": format!("{unit} not yet implemented"),
        }))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, UnitResult::Failed(_))
    }

    /// The genuine output, or `None` for a failure record.
    pub fn output(&self) -> Option<&Value> {
        match self {
            UnitResult::Output(v) => Some(v),
            UnitResult::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            UnitResult::Failed(f) => Some(&f.error),
            UnitResult::Output(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            UnitResult::Output(v) => v.clone(),
            UnitResult::Failed(f) => json!({ "error": f.error }),
        }
    }
}

// ---------------------------------------------------------------------------
// ResultDocument: aggregated record of one plan run
// ---------------------------------------------------------------------------

/// Ordered record of every unit's result for one run.
///
/// Entries are only ever appended, one per unit in the plan's order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub input_request: String,
    pub plan_snapshot: ExecutionPlan,
    unit_outputs: IndexMap<String, UnitResult>,
}

impl ResultDocument {
    pub fn new(input_request: impl Into<String>, plan: &ExecutionPlan) -> Self {
        Self {
            input_request: input_request.into(),
            plan_snapshot: plan.clone(),
            unit_outputs: IndexMap::new(),
        }
    }

    /// Append a unit's result.
    pub fn record(&mut self, unit: impl Into<String>, result: UnitResult) {
        self.unit_outputs.insert(unit.into(), result);
    }

    pub fn unit_outputs(&self) -> &IndexMap<String, UnitResult> {
        &self.unit_outputs
    }

    pub fn get(&self, unit: &str) -> Option<&UnitResult> {
        self.unit_outputs.get(unit)
    }

    pub fn len(&self) -> usize {
        self.unit_outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unit_outputs.is_empty()
    }

    /// Names of units whose entry is a failure record, in order.
    pub fn failed_units(&self) -> Vec<&str> {
        self.unit_outputs
            .iter()
            .filter(|(_, r)| r.is_failure())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.unit_outputs.values().any(UnitResult::is_failure)
    }

    /// Copy of this document keeping only the entries named in `upstream`,
    /// in that sequence. Names without an entry are skipped.
    pub fn restricted_to(&self, upstream: &[String]) -> ResultDocument {
        let mut view = ResultDocument {
            input_request: self.input_request.clone(),
            plan_snapshot: self.plan_snapshot.clone(),
            unit_outputs: IndexMap::new(),
        };
        for name in upstream {
            if let Some(result) = self.unit_outputs.get(name) {
                view.record(name.clone(), result.clone());
            }
        }
        view
    }

    /// JSON form of the document, as handed to full-context units.
    pub fn to_value(&self) -> Value {
        let outputs: Map<String, Value> = self
            .unit_outputs
            .iter()
            .map(|(name, r)| (name.clone(), r.to_value()))
            .collect();
        json!({
            "input_request": self.input_request,
            "plan_snapshot": self.plan_snapshot.to_value(),
            "unit_outputs": Value::Object(outputs),
        })
    }
}

// ---------------------------------------------------------------------------
// LegacyResult / RunOutcome
// ---------------------------------------------------------------------------

/// Result shape of the fixed architect -> builder pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyResult {
    pub input_request: String,
    pub architecture: Value,
    pub project_structure: Value,
}

/// What the entry point hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Plan(ResultDocument),
    Legacy(LegacyResult),
}

impl RunOutcome {
    pub fn as_plan(&self) -> Option<&ResultDocument> {
        match self {
            RunOutcome::Plan(doc) => Some(doc),
            RunOutcome::Legacy(_) => None,
        }
    }

    pub fn as_legacy(&self) -> Option<&LegacyResult> {
        match self {
            RunOutcome::Legacy(res) => Some(res),
            RunOutcome::Plan(_) => None,
        }
    }

    /// Serialize this outcome to pretty JSON and write it to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read an outcome from a JSON file at `path`.
    ///
    /// The persisted form is untagged, so a unit output that is exactly
    /// `{"error": <string>}` loads back as a failure record.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let outcome: Self = serde_json::from_str(&data)?;
        Ok(outcome)
    }
}
