//! Configuration loading
//!
//! Settings come from a TOML file read once at startup and are converted into
//! explicit registry, router and supervisor configuration.
//!
//! ```toml
//! default_agent = "claude"
//! preference_order = ["aider", "gemini"]
//! availability = "cached"
//!
//! [supervisor]
//! max_turn_secs = 1800
//!
//! [sessions]
//! idle_ttl_secs = 3600
//!
//! [logging]
//! directory = "~/.local/state/lastagent/logs"
//!
//! [[agents]]
//! name = "local"
//! command = "my-agent"
//! args = ["--ask", "{prompt}"]
//! capabilities = ["coding"]
//! ```

use crate::agent::{AgentRegistry, AvailabilityMode, PathProbe, Router, RouterConfig};
use crate::dispatch::Dispatcher;
use crate::error::{ConfigError, Result};
use crate::process::{Supervisor, SupervisorConfig};
use crate::session::SessionLimits;
use crate::types::{AgentDescriptor, InvocationSpec, PromptDelivery};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const CONFIG_ENV: &str = "LASTAGENT_CONFIG";
pub const DEFAULT_AGENT_ENV: &str = "LASTAGENT_DEFAULT_AGENT";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub default_agent: Option<String>,
    pub preference_order: Vec<String>,
    pub availability: AvailabilityMode,
    /// Let one-shot front-ends retry with another agent after a failed turn
    pub fallback_on_failure: bool,
    pub supervisor: SupervisorSettings,
    pub server: ServerSettings,
    pub sessions: SessionSettings,
    pub logging: LoggingSettings,
    pub workflow: WorkflowSettings,
    pub agents: Vec<AgentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorSettings {
    pub max_turn_secs: u64,
    pub default_timeout_secs: Option<u64>,
    pub output_channel_capacity: usize,
    pub read_chunk_bytes: usize,
    pub stderr_tail_bytes: usize,
    pub max_line_bytes: usize,
    pub drain_grace_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        let defaults = SupervisorConfig::default();
        Self {
            max_turn_secs: defaults.max_turn_duration.as_secs(),
            default_timeout_secs: defaults.default_timeout.map(|t| t.as_secs()),
            output_channel_capacity: defaults.channel_capacity,
            read_chunk_bytes: defaults.read_chunk_bytes,
            stderr_tail_bytes: defaults.stderr_tail_bytes,
            max_line_bytes: defaults.max_line_bytes,
            drain_grace_ms: defaults.drain_grace.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// `[sessions]`: retention of server and MCP sessions; 0 disables a bound
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    pub idle_ttl_secs: u64,
    pub max_sessions: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionLimits::default();
        Self {
            idle_ttl_secs: defaults.idle_ttl.map_or(0, |t| t.as_secs()),
            max_sessions: defaults.max_sessions.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

/// `[logging]`: optional log files next to the stderr output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Directory for rolling log files; no files are written without it
    pub directory: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Also write a JSON log next to the text log
    pub json_file: bool,
    /// Mask secrets in log fields and messages
    pub redact: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: None,
            rotation: LogRotation::Daily,
            json_file: true,
            redact: true,
        }
    }
}

impl LoggingSettings {
    /// Log directory with a leading `~` expanded
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        let dir = self.directory.as_ref()?;
        match dir.strip_prefix("~") {
            Ok(rest) => dirs::home_dir().map(|home| home.join(rest)),
            Err(_) => Some(dir.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Phase name to directory relative to the workflow root
    pub phase_dirs: BTreeMap<String, PathBuf>,
}

/// `[[agents]]` entry: a new agent, or an override of a built-in one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentEntry {
    pub name: String,
    pub display_name: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub prompt_delivery: Option<PromptDelivery>,
    pub capabilities: Option<Vec<String>>,
    pub strengths: Option<Vec<String>>,
    pub best_for: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AgentEntry {
    fn apply_to(&self, mut agent: AgentDescriptor) -> AgentDescriptor {
        if let Some(display_name) = &self.display_name {
            agent.display_name = display_name.clone();
        }
        if let Some(command) = &self.command {
            agent.invocation.program = command.clone();
        }
        if let Some(args) = &self.args {
            agent.invocation.args = args.clone();
        }
        if let Some(delivery) = self.prompt_delivery {
            agent.invocation.prompt_delivery = delivery;
        }
        if let Some(capabilities) = &self.capabilities {
            agent.capabilities = capabilities.clone();
        }
        if let Some(strengths) = &self.strengths {
            agent.strengths = strengths.clone();
        }
        if let Some(best_for) = &self.best_for {
            agent.best_for = best_for.clone();
        }
        agent.invocation.env.extend(self.env.clone());
        agent
    }

    fn to_descriptor(&self) -> Result<AgentDescriptor> {
        let command = self.command.as_deref().ok_or_else(|| {
            ConfigError::Invalid(format!("agent '{}' needs a command", self.name))
        })?;
        Ok(self.apply_to(AgentDescriptor::new(
            self.name.clone(),
            InvocationSpec::new(command),
        )))
    }
}

impl Settings {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("lastagent").join("config.toml"))
    }

    /// Load settings from `explicit`, `$LASTAGENT_CONFIG`, or the default path.
    ///
    /// Only a missing default file is tolerated.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut settings = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file, using defaults");
                    Self::default()
                }
            },
        };

        settings.apply_overrides(std::env::var(DEFAULT_AGENT_ENV).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&content, path)?;
        info!(path = %path.display(), agents = settings.agents.len(), "Configuration loaded");
        Ok(settings)
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Environment overrides layered over the file
    pub fn apply_overrides(&mut self, default_agent: Option<String>) {
        if let Some(agent) = default_agent.filter(|a| !a.trim().is_empty()) {
            self.default_agent = Some(agent);
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            default_agent: self.default_agent.clone(),
            preference_order: self.preference_order.clone(),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let s = &self.supervisor;
        SupervisorConfig {
            max_turn_duration: Duration::from_secs(s.max_turn_secs.max(1)),
            default_timeout: s.default_timeout_secs.map(Duration::from_secs),
            channel_capacity: s.output_channel_capacity.max(1),
            read_chunk_bytes: s.read_chunk_bytes.max(1),
            stderr_tail_bytes: s.stderr_tail_bytes,
            max_line_bytes: s.max_line_bytes.max(1),
            drain_grace: Duration::from_millis(s.drain_grace_ms),
        }
    }

    pub fn session_limits(&self) -> SessionLimits {
        let s = &self.sessions;
        SessionLimits {
            idle_ttl: (s.idle_ttl_secs > 0).then(|| Duration::from_secs(s.idle_ttl_secs)),
            max_sessions: (s.max_sessions > 0).then_some(s.max_sessions),
        }
    }

    /// Built-in catalogue merged with `[[agents]]` entries.
    ///
    /// Entries replace same-named agents in place, new names are appended,
    /// and `enabled = false` removes the agent.
    pub fn agents(&self) -> Result<Vec<AgentDescriptor>> {
        let mut agents = AgentDescriptor::builtin_agents();

        for entry in &self.agents {
            let position = agents.iter().position(|a| a.name == entry.name);
            match (entry.enabled, position) {
                (false, Some(i)) => {
                    agents.remove(i);
                }
                (false, None) => {}
                (true, Some(i)) => {
                    let merged = entry.apply_to(agents[i].clone());
                    agents[i] = merged;
                }
                (true, None) => agents.push(entry.to_descriptor()?),
            }
        }

        Ok(agents)
    }

    pub fn build_registry(&self) -> Result<AgentRegistry> {
        AgentRegistry::new(self.agents()?, Arc::new(PathProbe::from_env()), self.availability)
    }

    /// Wire registry, router and supervisor into a dispatcher
    pub fn build_dispatcher(&self) -> Result<Dispatcher> {
        let registry = Arc::new(self.build_registry()?);
        Ok(Dispatcher::new(
            Router::new(registry, self.router_config()),
            Supervisor::new(self.supervisor_config()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    fn parse(content: &str) -> Settings {
        Settings::from_toml(content, Path::new("test.toml")).unwrap()
    }

    #[test]
    fn test_empty_config_is_default() {
        let settings = parse("");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.agents().unwrap().len(), 5);
        assert_eq!(settings.supervisor_config(), SupervisorConfig::default());
        assert_eq!(settings.session_limits(), SessionLimits::default());
        assert_eq!(settings.logging.resolved_directory(), None);
    }

    #[test]
    fn test_full_config() {
        let settings = parse(
            r#"
            default_agent = "aider"
            preference_order = ["gemini"]
            availability = "live"
            fallback_on_failure = true

            [supervisor]
            max_turn_secs = 120
            default_timeout_secs = 30
            drain_grace_ms = 100

            [server]
            port = 9100

            [sessions]
            idle_ttl_secs = 0
            max_sessions = 50

            [logging]
            directory = "~/logs"
            rotation = "hourly"

            [workflow.phase_dirs]
            implement = "src"
            "#,
        );

        assert_eq!(settings.availability, AvailabilityMode::Live);
        assert!(settings.fallback_on_failure);
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.workflow.phase_dirs["implement"], PathBuf::from("src"));

        let limits = settings.session_limits();
        assert_eq!(limits.idle_ttl, None);
        assert_eq!(limits.max_sessions, Some(50));

        assert_eq!(settings.logging.rotation, LogRotation::Hourly);
        assert!(settings.logging.redact);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(settings.logging.resolved_directory(), Some(home.join("logs")));
        }

        let router = settings.router_config();
        assert_eq!(router.default_agent.as_deref(), Some("aider"));
        assert_eq!(router.preference_order, vec!["gemini".to_string()]);

        let supervisor = settings.supervisor_config();
        assert_eq!(supervisor.max_turn_duration, Duration::from_secs(120));
        assert_eq!(supervisor.default_timeout, Some(Duration::from_secs(30)));
        assert_eq!(supervisor.drain_grace, Duration::from_millis(100));
    }

    #[test]
    fn test_agent_entries_merge_with_builtins() {
        let settings = parse(
            r#"
            [[agents]]
            name = "claude"
            args = ["--print", "{prompt}"]

            [[agents]]
            name = "goose"
            enabled = false

            [[agents]]
            name = "local"
            command = "/opt/agent"
            prompt_delivery = "stdin"
            capabilities = ["coding", "offline"]
            "#,
        );

        let agents = settings.agents().unwrap();
        let names: Vec<_> = agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["claude", "gemini", "aider", "codex", "local"]);

        assert_eq!(agents[0].invocation.args, vec!["--print", "{prompt}"]);
        assert_eq!(agents[0].invocation.program, "claude");
        assert!(agents[0].has_capability("reasoning"));

        let local = &agents[4];
        assert_eq!(local.invocation.prompt_delivery, PromptDelivery::Stdin);
        assert!(local.has_capability("offline"));
    }

    #[test]
    fn test_new_agent_without_command_is_invalid() {
        let settings = parse(
            r#"
            [[agents]]
            name = "mystery"
            "#,
        );
        assert!(matches!(
            settings.agents(),
            Err(Error::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = Settings::from_toml("default_agent = [", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Parse { .. })));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "preference_order = [\"codex\"]\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.preference_order, vec!["codex".to_string()]);
    }

    #[test]
    fn test_default_agent_override() {
        let mut settings = parse("default_agent = \"claude\"");
        settings.apply_overrides(Some("gemini".to_string()));
        assert_eq!(settings.default_agent.as_deref(), Some("gemini"));

        settings.apply_overrides(Some("  ".to_string()));
        assert_eq!(settings.default_agent.as_deref(), Some("gemini"));
    }
}
