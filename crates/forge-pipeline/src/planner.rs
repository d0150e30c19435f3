//! Plan generation seam and the built-in rule-based generator.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use forge_types::{ExecutionPlan, ForgeError, Mode, Result};

use crate::wiring::{AUTH, CODER, DB_SCHEMA, DEPLOYER, PLANNER, TESTER};

/// Turns a free-text request into an execution plan.
pub trait PlanGenerator: Send + Sync {
    fn generate(&self, request: &str, mode: Mode) -> Result<ExecutionPlan>;
}

// ---------------------------------------------------------------------------
// StaticPlanner
// ---------------------------------------------------------------------------

/// Always returns the same plan, with the requested mode applied.
pub struct StaticPlanner {
    plan: ExecutionPlan,
}

impl StaticPlanner {
    pub fn new(plan: ExecutionPlan) -> Self {
        Self { plan }
    }
}

impl PlanGenerator for StaticPlanner {
    fn generate(&self, _request: &str, mode: Mode) -> Result<ExecutionPlan> {
        Ok(self.plan.clone().with_mode(mode))
    }
}

// ---------------------------------------------------------------------------
// RuleBasedPlanner
// ---------------------------------------------------------------------------

/// Keyword classifier plus a fixed unit order per mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedPlanner;

fn project_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"(?i)\b(rest|graphql|api|endpoint|backend)s?\b", "api"),
            (r"(?i)\b(cli|command[- ]line|terminal)\b", "cli"),
            (r"(?i)\b(mobile|ios|android)\b", "mobile_app"),
        ]
        .into_iter()
        .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
        .collect()
    })
}

impl RuleBasedPlanner {
    pub fn classify(request: &str) -> &'static str {
        project_rules()
            .iter()
            .find(|(re, _)| re.is_match(request))
            .map_or("web_app", |(_, kind)| *kind)
    }

    pub fn order_for(mode: Mode) -> Vec<&'static str> {
        match mode {
            Mode::Simple => vec![PLANNER, CODER],
            Mode::Full => vec![PLANNER, DB_SCHEMA, AUTH, CODER, TESTER],
            Mode::Production => vec![PLANNER, DB_SCHEMA, AUTH, CODER, TESTER, DEPLOYER],
        }
    }
}

impl PlanGenerator for RuleBasedPlanner {
    fn generate(&self, request: &str, mode: Mode) -> Result<ExecutionPlan> {
        if request.trim().is_empty() {
            return Err(ForgeError::PlanGeneration("request is empty".into()));
        }

        let order: Vec<String> = Self::order_for(mode).into_iter().map(String::from).collect();
        let complexity = match mode {
            Mode::Simple => "low",
            Mode::Full => "medium",
            Mode::Production => "high",
        };
        let mut configuration = Map::new();
        configuration.insert("mode".into(), json!(mode.as_str()));
        configuration.insert("include_tests".into(), Value::Bool(mode != Mode::Simple));
        configuration.insert(
            "include_deployment".into(),
            Value::Bool(mode == Mode::Production),
        );

        let plan = ExecutionPlan {
            project_type: Self::classify(request).to_string(),
            complexity: complexity.to_string(),
            mode,
            units: order.clone(),
            order,
            configuration,
        };
        plan.validate()?;
        tracing::debug!(project_type = %plan.project_type, order = ?plan.order, "Generated plan");
        Ok(plan)
    }
}
