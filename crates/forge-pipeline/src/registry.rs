//! Unit handler trait, closure adapter, and unit registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use forge_types::{ForgeError, Result};

// ---------------------------------------------------------------------------
// UnitHandler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait UnitHandler: Send + Sync {
    /// The unit name this handler implements (e.g. "planner", "coder").
    fn name(&self) -> &str;

    /// Run the unit on its wired input and return its structured output.
    async fn invoke(&self, input: Value) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// FnUnit: closure-backed handler
// ---------------------------------------------------------------------------

type UnitFn = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// Wraps a plain closure as a unit. Handy for embedding and tests.
pub struct FnUnit {
    name: String,
    f: Box<UnitFn>,
}

impl FnUnit {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl UnitHandler for FnUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: Value) -> Result<Value> {
        (self.f)(input)
    }
}

// ---------------------------------------------------------------------------
// UnitRegistry
// ---------------------------------------------------------------------------

/// Maps unit names to implementations. Read-only once handed to an executor.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    units: HashMap<String, Arc<dyn UnitHandler>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name, replacing any previous one.
    pub fn register(&mut self, handler: impl UnitHandler + 'static) {
        let name = handler.name().to_string();
        self.units.insert(name, Arc::new(handler));
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn UnitHandler>> {
        self.units
            .get(name)
            .cloned()
            .ok_or_else(|| ForgeError::UnitNotFound {
                unit: name.to_string(),
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    /// Registered unit names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.units.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
