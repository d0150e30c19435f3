//! Workspace configuration loaded from `forge.toml`.
//!
//! ```toml
//! [engine]
//! strategy = "layered"
//! event_capacity = 256
//!
//! [units.planner]
//! command = "python3"
//! args = ["agents/planner.py"]
//! timeout_secs = 120
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use forge_types::{ForgeError, Result};

use crate::engine::ExecutionStrategy;
use crate::registry::UnitRegistry;
use crate::units::{CommandUnit, StubUnit};
use crate::wiring::WiringTable;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub engine: EngineConfig,
    pub units: BTreeMap<String, UnitConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub strategy: ExecutionStrategy,
    /// Capacity of the run event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::Sequential,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub workdir: Option<PathBuf>,
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine.event_capacity == 0 {
            return Err(ForgeError::Config("engine.event_capacity must be > 0".into()));
        }
        for (name, unit) in &self.units {
            if unit.command.trim().is_empty() {
                return Err(ForgeError::Config(format!(
                    "units.{name}.command must not be empty"
                )));
            }
            if unit.timeout_secs == Some(0) {
                return Err(ForgeError::Config(format!(
                    "units.{name}.timeout_secs must be > 0"
                )));
            }
        }
        Ok(())
    }

    pub fn parse(source: &str) -> Result<Self> {
        let cfg: ForgeConfig =
            toml::from_str(source).map_err(|e| ForgeError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load config from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let source = std::fs::read_to_string(path)?;
        Self::parse(&source).map_err(|e| match e {
            ForgeError::Config(msg) => ForgeError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Registry of command units, one per `[units.<name>]` table.
    pub fn command_registry(&self) -> UnitRegistry {
        let mut registry = UnitRegistry::new();
        for (name, unit) in &self.units {
            let mut handler = CommandUnit::new(name.clone(), unit.command.clone())
                .args(unit.args.iter().cloned());
            if let Some(secs) = unit.timeout_secs {
                handler = handler.timeout(Duration::from_secs(secs));
            }
            if let Some(ref dir) = unit.workdir {
                handler = handler.workdir(dir.clone());
            }
            registry.register(handler);
        }
        registry
    }
}

/// Registry with a dry-run stub for every unit in the wiring table.
pub fn stub_registry(wiring: &WiringTable) -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    for (name, _) in wiring.entries() {
        registry.register(StubUnit::new(name));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().unwrap();
        let cfg = ForgeConfig::load(&temp.path().join("missing.toml")).unwrap();
        assert_eq!(cfg, ForgeConfig::default());
        assert_eq!(cfg.engine.strategy, ExecutionStrategy::Sequential);
    }

    #[test]
    fn parses_units_and_engine() {
        let cfg = ForgeConfig::parse(
            r#"
            [engine]
            strategy = "layered"

            [units.planner]
            command = "python3"
            args = ["agents/planner.py"]
            timeout_secs = 120

            [units.coder]
            command = "./coder"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.engine.strategy, ExecutionStrategy::Layered);
        assert_eq!(cfg.engine.event_capacity, 256);
        assert_eq!(cfg.units["planner"].args, vec!["agents/planner.py"]);
        assert_eq!(cfg.units["planner"].timeout_secs, Some(120));
        assert!(cfg.units["coder"].args.is_empty());

        let registry = cfg.command_registry();
        assert_eq!(registry.names(), vec!["coder", "planner"]);
    }

    #[test]
    fn rejects_empty_command() {
        let err = ForgeConfig::parse("[units.auth]\ncommand = \"  \"\n").unwrap_err();
        assert!(err.to_string().contains("units.auth.command"), "got: {err}");
    }

    #[test]
    fn rejects_zero_timeout() {
        let err =
            ForgeConfig::parse("[units.auth]\ncommand = \"x\"\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeout_secs"), "got: {err}");
    }

    #[test]
    fn rejects_unknown_strategy() {
        let err = ForgeConfig::parse("[engine]\nstrategy = \"turbo\"\n").unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }

    #[test]
    fn load_reports_path_on_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("forge.toml");
        std::fs::write(&path, "[engine]\nevent_capacity = 0\n").unwrap();
        let err = ForgeConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("forge.toml"), "got: {err}");
    }

    #[test]
    fn stub_registry_covers_wiring_table() {
        let registry = stub_registry(&WiringTable::standard());
        assert_eq!(
            registry.names(),
            vec!["auth", "coder", "db_schema", "deployer", "planner", "tester"]
        );
    }
}
