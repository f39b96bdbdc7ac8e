//! Agent context: the read-only configuration every process loads once
//! before it starts talking.
//!
//! The context is read from a TOML file:
//!
//! ```toml
//! [agent]
//! name = "agent-1"
//! required_subsystems = ["ACS", "IDN"]
//! cycle_timeout_ms = 5000
//!
//! [simulation]
//! host = "127.0.0.1"
//! port = 9100
//!
//! [[dimensions]]
//! name = "color"
//! kind = "node"
//! values = ["red", "green", "blue"]
//!
//! [parameters]
//! learning_rate = 0.1
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CYCLE_TIMEOUT_MS, DEFAULT_LISTEN_HOST};
use crate::dimension::DimensionCatalogue;
use crate::ConfigError;

fn default_listen_host() -> String {
    DEFAULT_LISTEN_HOST.to_string()
}

fn default_cycle_timeout_ms() -> u64 {
    DEFAULT_CYCLE_TIMEOUT_MS
}

/// Per-agent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub name: String,
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// Subsystems that must signal END before a cycle may advance.
    pub required_subsystems: Vec<String>,
    /// Watchdog bound on one armed cycle.
    #[serde(default = "default_cycle_timeout_ms")]
    pub cycle_timeout_ms: u64,
    /// Stop after this many completed cycles.
    #[serde(default)]
    pub max_cycles: Option<u64>,
    /// Seed for the reference stimulus/action generator.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl AgentSettings {
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }
}

/// Address of the supervising simulation process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationEndpoint {
    pub host: String,
    pub port: u16,
}

impl SimulationEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything a process needs besides its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent: AgentSettings,
    #[serde(default)]
    pub simulation: Option<SimulationEndpoint>,
    #[serde(default)]
    pub dimensions: DimensionCatalogue,
    /// Free-form per-agent parameters. Opaque to the protocol.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl AgentContext {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let context: AgentContext = toml::from_str(source)?;
        context.validate()?;
        Ok(context)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.name.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.name is empty".into()));
        }
        if self.agent.required_subsystems.is_empty() {
            return Err(ConfigError::Invalid(
                "agent.required_subsystems must name at least one subsystem".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for id in &self.agent.required_subsystems {
            if id.trim().is_empty() || !seen.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "agent.required_subsystems: empty or duplicate entry `{id}`"
                )));
            }
        }
        if self.agent.cycle_timeout_ms == 0 {
            return Err(ConfigError::Invalid("agent.cycle_timeout_ms must be > 0".into()));
        }
        if self.agent.max_cycles == Some(0) {
            return Err(ConfigError::Invalid(
                "agent.max_cycles must be > 0; omit it to run without a limit".into(),
            ));
        }
        self.dimensions.validate()
    }
}

/// Read-only source of the agent context.
pub trait ConfigProvider {
    fn load(&self) -> Result<AgentContext, ConfigError>;
}

impl ConfigProvider for AgentContext {
    fn load(&self) -> Result<AgentContext, ConfigError> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// Loads the agent context from a TOML file on disk.
#[derive(Debug, Clone)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use `path` if given, else `<config dir>/pacycle/agent.toml`.
    pub fn resolve(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Ok(Self::new(p)),
            None => Self::default_path().map(Self::new).ok_or(ConfigError::NoConfigPath),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pacycle").join("agent.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn load(&self) -> Result<AgentContext, ConfigError> {
        let source = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let context = AgentContext::from_toml_str(&source)?;
        tracing::debug!(
            path = %self.path.display(),
            agent = %context.agent.name,
            dimensions = context.dimensions.len(),
            "Loaded agent context"
        );
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionKind;

    const SAMPLE: &str = r#"
[agent]
name = "agent-1"
required_subsystems = ["ACS", "IDN"]
max_cycles = 12

[simulation]
host = "10.0.0.5"
port = 9100

[[dimensions]]
name = "color"
kind = "node"
values = ["red", "green", "blue"]

[[dimensions]]
name = "intensity"
kind = "ranged_float"
min = 0.0
max = 1.0

[[dimensions]]
name = "word"
kind = "string"

[parameters]
learning_rate = 0.1
"#;

    #[test]
    fn test_parse_full_context() {
        let ctx = AgentContext::from_toml_str(SAMPLE).unwrap();
        assert_eq!(ctx.agent.name, "agent-1");
        assert_eq!(ctx.agent.listen_host, DEFAULT_LISTEN_HOST);
        assert_eq!(ctx.agent.cycle_timeout(), Duration::from_millis(DEFAULT_CYCLE_TIMEOUT_MS));
        assert_eq!(ctx.agent.max_cycles, Some(12));
        assert_eq!(ctx.simulation.as_ref().unwrap().address(), "10.0.0.5:9100");
        assert_eq!(ctx.dimensions.len(), 3);
        assert_eq!(
            ctx.dimensions.get("intensity").unwrap().kind,
            DimensionKind::RangedFloat { min: 0.0, max: 1.0 }
        );
        assert_eq!(
            ctx.dimensions.get("word").unwrap().kind,
            DimensionKind::Text { values: vec![] }
        );
        assert_eq!(ctx.parameters["learning_rate"], serde_json::json!(0.1));
    }

    #[test]
    fn test_required_subsystems_must_not_be_empty() {
        let src = "[agent]\nname = \"a\"\nrequired_subsystems = []\n";
        assert!(matches!(AgentContext::from_toml_str(src), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        assert!(matches!(
            AgentContext::from_toml_str("[agent\nname="),
            Err(ConfigError::Parse(_))
        ));
    }
}
