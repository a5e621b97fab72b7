//! Agent registry
//!
//! Declared table of agents in declaration order, keyed by unique name, with
//! an availability cache in front of the probe.

use super::availability::{AvailabilityMode, AvailabilityProbe, PathProbe};
use crate::error::{ConfigError, Result};
use crate::types::{AgentDescriptor, AgentSummary};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct AgentRegistry {
    agents: Vec<AgentDescriptor>,
    probe: Arc<dyn AvailabilityProbe>,
    mode: AvailabilityMode,
    cache: RwLock<HashMap<String, bool>>,
}

impl AgentRegistry {
    /// Build a registry, rejecting duplicate names
    pub fn new(
        agents: Vec<AgentDescriptor>,
        probe: Arc<dyn AvailabilityProbe>,
        mode: AvailabilityMode,
    ) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for agent in &agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::Invalid("agent name must not be empty".to_string()).into());
            }
            if !seen.insert(agent.name.as_str()) {
                let message = format!("duplicate agent name: {}", agent.name);
                return Err(ConfigError::Invalid(message).into());
            }
        }

        info!(count = agents.len(), mode = ?mode, "Agent registry loaded");

        Ok(Self {
            agents,
            probe,
            mode,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Built-in catalogue probed against `PATH`
    pub fn builtin() -> Self {
        Self {
            agents: AgentDescriptor::builtin_agents(),
            probe: Arc::new(PathProbe::from_env()),
            mode: AvailabilityMode::Cached,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// All agents in declaration order
    pub fn list(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    pub fn get(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Agents carrying `capability`, declaration order preserved
    pub fn filter(&self, capability: &str) -> Vec<&AgentDescriptor> {
        self.agents
            .iter()
            .filter(|a| a.has_capability(capability))
            .collect()
    }

    pub fn mode(&self) -> AvailabilityMode {
        self.mode
    }

    /// Whether the agent's executable can be launched.
    ///
    /// In cached mode the first probe result sticks until [`invalidate`](Self::invalidate).
    pub fn check_availability(&self, descriptor: &AgentDescriptor) -> bool {
        if self.mode == AvailabilityMode::Cached {
            if let Some(available) = self.cache.read().get(&descriptor.name) {
                return *available;
            }
        }

        let available = self.probe.is_installed(&descriptor.invocation.program);
        debug!(
            agent = %descriptor.name,
            program = %descriptor.invocation.program,
            available,
            "Probed agent availability"
        );

        if self.mode == AvailabilityMode::Cached {
            self.cache.write().insert(descriptor.name.clone(), available);
        }

        available
    }

    /// Drop cached availability so the next check probes again
    pub fn invalidate(&self) {
        self.cache.write().clear();
        debug!("Agent availability cache cleared");
    }

    /// Listing for front-ends, optionally filtered by capability
    pub fn summaries(&self, capability: Option<&str>) -> Vec<AgentSummary> {
        self.agents
            .iter()
            .filter(|a| capability.map_or(true, |c| a.has_capability(c)))
            .map(|a| AgentSummary::from_descriptor(a, self.check_availability(a)))
            .collect()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.iter().map(|a| &a.name).collect::<Vec<_>>())
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::availability::MockAvailabilityProbe;
    use crate::error::Error;
    use crate::types::InvocationSpec;

    fn agent(name: &str, caps: &[&str]) -> AgentDescriptor {
        AgentDescriptor::new(name, InvocationSpec::new(format!("{}-bin", name)))
            .with_capabilities(caps.iter().copied())
    }

    #[test]
    fn test_builtin_registry() {
        let registry = AgentRegistry::builtin();
        assert_eq!(registry.list().len(), 5);
        assert!(registry.get("claude").is_some());
        assert!(registry.get("aider").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let probe = Arc::new(MockAvailabilityProbe::new());
        let result = AgentRegistry::new(
            vec![agent("a", &[]), agent("a", &[])],
            probe,
            AvailabilityMode::Cached,
        );
        assert!(matches!(result, Err(Error::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn test_filter_preserves_order() {
        let registry = AgentRegistry::new(
            vec![
                agent("a", &["coding"]),
                agent("b", &["git"]),
                agent("c", &["coding", "git"]),
            ],
            Arc::new(MockAvailabilityProbe::new()),
            AvailabilityMode::Cached,
        )
        .unwrap();

        let names: Vec<_> = registry.filter("git").iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_cached_availability_probes_once_until_invalidated() {
        let mut probe = MockAvailabilityProbe::new();
        probe
            .expect_is_installed()
            .withf(|program| program == "a-bin")
            .times(2)
            .return_const(true);

        let registry =
            AgentRegistry::new(vec![agent("a", &[])], Arc::new(probe), AvailabilityMode::Cached)
                .unwrap();
        let a = registry.get("a").unwrap().clone();

        assert!(registry.check_availability(&a));
        assert!(registry.check_availability(&a));
        registry.invalidate();
        assert!(registry.check_availability(&a));
    }

    #[test]
    fn test_live_availability_probes_every_time() {
        let mut probe = MockAvailabilityProbe::new();
        probe.expect_is_installed().times(3).return_const(false);

        let registry =
            AgentRegistry::new(vec![agent("a", &[])], Arc::new(probe), AvailabilityMode::Live)
                .unwrap();
        let a = registry.get("a").unwrap().clone();

        for _ in 0..3 {
            assert!(!registry.check_availability(&a));
        }
    }

    #[test]
    fn test_summaries_report_availability() {
        let mut probe = MockAvailabilityProbe::new();
        probe
            .expect_is_installed()
            .returning(|program| program == "b-bin");

        let registry = AgentRegistry::new(
            vec![agent("a", &["coding"]), agent("b", &["git"])],
            Arc::new(probe),
            AvailabilityMode::Cached,
        )
        .unwrap();

        let all = registry.summaries(None);
        assert_eq!(all.len(), 2);
        assert!(!all[0].available);
        assert!(all[1].available);

        let git = registry.summaries(Some("git"));
        assert_eq!(git.len(), 1);
        assert_eq!(git[0].name, "b");
    }
}
