//! Capability matcher / router
//!
//! Selection is a pure, synchronous decision. Priority:
//! 1. forced agent (request, then session override) used verbatim
//! 2. first available agent, in declaration order, whose capabilities
//!    intersect the filter
//! 3. first available agent in the default preference order

use super::registry::AgentRegistry;
use crate::error::{NoAgentReason, RoutingError};
use crate::types::{AgentDescriptor, Rationale, RoutingDecision, TaskRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Preference settings threaded in from configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    pub default_agent: Option<String>,
    #[serde(default)]
    pub preference_order: Vec<String>,
}

pub struct Router {
    registry: Arc<AgentRegistry>,
    config: RouterConfig,
}

impl Router {
    pub fn new(registry: Arc<AgentRegistry>, config: RouterConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Pick exactly one agent for `request`.
    ///
    /// `session_override` is the session's `/agent` choice; a request-level
    /// forced agent wins over it.
    pub fn select(
        &self,
        request: &TaskRequest,
        session_override: Option<&str>,
    ) -> Result<RoutingDecision, RoutingError> {
        let forced = request.forced_agent.as_deref().or(session_override);

        let decision = if let Some(name) = forced {
            self.select_forced(name)?
        } else if !request.capabilities.is_empty() {
            self.select_by_capability(request)?
        } else {
            self.select_default(request)?
        };

        debug!(
            agent = %decision.agent.name,
            rationale = %decision.rationale,
            alternatives = ?decision.alternatives,
            "Routing decision"
        );

        Ok(decision)
    }

    fn select_forced(&self, name: &str) -> Result<RoutingDecision, RoutingError> {
        let agent = self.registry.get(name).ok_or_else(|| {
            RoutingError::NoAgentAvailable(NoAgentReason::UnknownAgent {
                name: name.to_string(),
            })
        })?;

        if !self.registry.check_availability(agent) {
            return Err(RoutingError::NoAgentAvailable(
                NoAgentReason::AgentUnavailable {
                    name: name.to_string(),
                },
            ));
        }

        Ok(RoutingDecision::new(agent.clone(), Rationale::Forced, Vec::new()))
    }

    fn select_by_capability(&self, request: &TaskRequest) -> Result<RoutingDecision, RoutingError> {
        let candidates: Vec<&AgentDescriptor> = self
            .registry
            .list()
            .iter()
            .filter(|a| !request.is_excluded(&a.name))
            .filter(|a| a.matches_any(&request.capabilities))
            .filter(|a| self.registry.check_availability(a))
            .collect();

        match candidates.split_first() {
            Some((chosen, rest)) => Ok(RoutingDecision::new(
                (*chosen).clone(),
                Rationale::CapabilityMatch,
                rest.iter().map(|a| a.name.clone()).collect(),
            )),
            None => Err(RoutingError::NoAgentAvailable(
                NoAgentReason::NoCapabilityMatch {
                    capabilities: request.capabilities.clone(),
                },
            )),
        }
    }

    fn select_default(&self, request: &TaskRequest) -> Result<RoutingDecision, RoutingError> {
        let candidates: Vec<&AgentDescriptor> = self
            .default_order()
            .into_iter()
            .filter(|a| !request.is_excluded(&a.name))
            .filter(|a| self.registry.check_availability(a))
            .collect();

        match candidates.split_first() {
            Some((chosen, rest)) => Ok(RoutingDecision::new(
                (*chosen).clone(),
                Rationale::DefaultFallback,
                rest.iter().map(|a| a.name.clone()).collect(),
            )),
            None => Err(RoutingError::NoAgentAvailable(NoAgentReason::NoneAvailable)),
        }
    }

    /// Default agent, then preference order, then the rest in declaration order.
    /// Unknown names in the configuration are skipped.
    pub fn default_order(&self) -> Vec<&AgentDescriptor> {
        let mut order: Vec<&AgentDescriptor> = Vec::with_capacity(self.registry.list().len());

        let preferred = self
            .config
            .default_agent
            .iter()
            .chain(self.config.preference_order.iter())
            .filter_map(|name| self.registry.get(name));

        for agent in preferred.chain(self.registry.list().iter()) {
            if !order.iter().any(|a| a.name == agent.name) {
                order.push(agent);
            }
        }

        order
    }
}
