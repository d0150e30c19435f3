//! Input wiring table: which prior outputs each unit receives, and in what shape.
//!
//! Every recognised unit has exactly one [`WiringRule`]. Rules name their
//! upstream dependencies explicitly; only [`WiringRule::FullContext`] sees the
//! whole running document. Units missing from the table are not invoked at
//! all; the engine records [`UnitResult::placeholder`] for them.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use forge_types::{Mode, ResultDocument, UnitResult};

pub const PLANNER: &str = "planner";
pub const DB_SCHEMA: &str = "db_schema";
pub const AUTH: &str = "auth";
pub const CODER: &str = "coder";
pub const TESTER: &str = "tester";
pub const DEPLOYER: &str = "deployer";

/// Request-scoped values available to wiring besides prior outputs.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub request: &'a str,
    pub mode: Mode,
}

impl<'a> RequestContext<'a> {
    pub fn new(request: &'a str, mode: Mode) -> Self {
        Self { request, mode }
    }
}

/// One field of a bundled input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Output of the named upstream unit, `{}` when absent or failed.
    Output(String),
    /// The plan-wide mode string.
    Mode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WiringRule {
    /// The original request string.
    Request,
    /// A single upstream output passed through as-is.
    Output(String),
    /// A mapping built field-by-field.
    Bundle(Vec<(String, Source)>),
    /// `{ "mode": ..., "results": <running document> }`.
    FullContext,
}

/// What a unit depends on, as far as scheduling is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependencies {
    Named(Vec<String>),
    AllUpstream,
}

impl WiringRule {
    pub fn bundle<K: Into<String>>(fields: impl IntoIterator<Item = (K, Source)>) -> Self {
        WiringRule::Bundle(fields.into_iter().map(|(k, s)| (k.into(), s)).collect())
    }

    /// Build the unit input from the running document.
    pub fn wire(&self, results: &ResultDocument, ctx: &RequestContext<'_>) -> Value {
        match self {
            WiringRule::Request => Value::String(ctx.request.to_string()),
            WiringRule::Output(dep) => upstream_output(results, dep),
            WiringRule::Bundle(fields) => {
                let map: Map<String, Value> = fields
                    .iter()
                    .map(|(key, source)| {
                        let value = match source {
                            Source::Output(dep) => upstream_output(results, dep),
                            Source::Mode => Value::String(ctx.mode.as_str().to_string()),
                        };
                        (key.clone(), value)
                    })
                    .collect();
                Value::Object(map)
            }
            WiringRule::FullContext => json!({
                "mode": ctx.mode.as_str(),
                "results": results.to_value(),
            }),
        }
    }

    pub fn dependencies(&self) -> Dependencies {
        match self {
            WiringRule::Request => Dependencies::Named(Vec::new()),
            WiringRule::Output(dep) => Dependencies::Named(vec![dep.clone()]),
            WiringRule::Bundle(fields) => Dependencies::Named(
                fields
                    .iter()
                    .filter_map(|(_, s)| match s {
                        Source::Output(dep) => Some(dep.clone()),
                        Source::Mode => None,
                    })
                    .collect(),
            ),
            WiringRule::FullContext => Dependencies::AllUpstream,
        }
    }

    /// Short human-readable description, used by `forge units`.
    pub fn describe(&self) -> String {
        match self {
            WiringRule::Request => "request".to_string(),
            WiringRule::Output(dep) => format!("output of {dep}"),
            WiringRule::Bundle(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(key, source)| match source {
                        Source::Output(dep) => format!("{key}: output of {dep}"),
                        Source::Mode => format!("{key}: mode"),
                    })
                    .collect();
                format!("{{ {} }}", parts.join(", "))
            }
            WiringRule::FullContext => "{ mode, results: full document }".to_string(),
        }
    }
}

/// Upstream output, or `{}` when the unit has not run or left a failure record.
fn upstream_output(results: &ResultDocument, unit: &str) -> Value {
    match results.get(unit) {
        Some(UnitResult::Output(v)) => v.clone(),
        _ => Value::Object(Map::new()),
    }
}

// ---------------------------------------------------------------------------
// WiringTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WiringTable {
    rules: HashMap<String, WiringRule>,
}

impl WiringTable {
    /// An empty table: every unit is unrecognised.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// The standard six-unit table.
    pub fn standard() -> Self {
        Self::empty()
            .with_rule(PLANNER, WiringRule::Request)
            .with_rule(DB_SCHEMA, WiringRule::Output(PLANNER.into()))
            .with_rule(
                AUTH,
                WiringRule::bundle([
                    ("schema", Source::Output(DB_SCHEMA.into())),
                    ("mode", Source::Mode),
                ]),
            )
            .with_rule(CODER, WiringRule::Output(PLANNER.into()))
            .with_rule(
                TESTER,
                WiringRule::bundle([
                    ("auth", Source::Output(AUTH.into())),
                    ("schema", Source::Output(DB_SCHEMA.into())),
                ]),
            )
            .with_rule(DEPLOYER, WiringRule::FullContext)
    }

    pub fn with_rule(mut self, unit: impl Into<String>, rule: WiringRule) -> Self {
        self.rules.insert(unit.into(), rule);
        self
    }

    pub fn rule(&self, unit: &str) -> Option<&WiringRule> {
        self.rules.get(unit)
    }

    pub fn is_recognized(&self, unit: &str) -> bool {
        self.rules.contains_key(unit)
    }

    /// Input for `unit`, or `None` when the table has no rule for it.
    pub fn wire(
        &self,
        unit: &str,
        results: &ResultDocument,
        ctx: &RequestContext<'_>,
    ) -> Option<Value> {
        self.rule(unit).map(|rule| rule.wire(results, ctx))
    }

    /// Sorted `(unit, rule)` pairs.
    pub fn entries(&self) -> Vec<(&str, &WiringRule)> {
        let mut entries: Vec<(&str, &WiringRule)> =
            self.rules.iter().map(|(k, v)| (k.as_str(), v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl Default for WiringTable {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
