//! Task request and routing decision types

use super::AgentDescriptor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One routed task, built fresh by a front-end for each invocation
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// One-off override; never substituted when unavailable
    pub forced_agent: Option<String>,
    /// Capability filter; empty means no filter
    pub capabilities: Vec<String>,
    /// Skipped by capability and default selection, ignored when forcing
    pub excluded_agents: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub stream: bool,
    pub render_markdown: bool,
}

impl TaskRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            stream: true,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.forced_agent = Some(agent.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn excluding(mut self, agent: impl Into<String>) -> Self {
        self.excluded_agents.push(agent.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_markdown(mut self, render_markdown: bool) -> Self {
        self.render_markdown = render_markdown;
        self
    }

    /// Prompt as delivered to the agent, system prefix first
    pub fn full_prompt(&self) -> String {
        match self.system_prompt.as_deref().map(str::trim) {
            Some(system) if !system.is_empty() => format!("{}\n\n{}", system, self.prompt),
            _ => self.prompt.clone(),
        }
    }

    /// Short single-line preview for history and logs
    pub fn preview(&self) -> String {
        const MAX: usize = 80;
        let line = self.prompt.lines().next().unwrap_or_default().trim();
        if line.chars().count() > MAX {
            let cut: String = line.chars().take(MAX).collect();
            format!("{}...", cut)
        } else {
            line.to_string()
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded_agents.iter().any(|n| n == name)
    }
}

/// Why a particular agent was chosen
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Rationale {
    Forced,
    CapabilityMatch,
    DefaultFallback,
}

impl std::fmt::Display for Rationale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Forced => "forced",
            Self::CapabilityMatch => "capability-match",
            Self::DefaultFallback => "default-fallback",
        };
        f.write_str(s)
    }
}

/// Router output, consumed once by the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub agent: AgentDescriptor,
    pub rationale: Rationale,
    /// Other available candidates that were passed over, in order
    pub alternatives: Vec<String>,
    pub decided_at: chrono::DateTime<chrono::Utc>,
}

impl RoutingDecision {
    pub fn new(agent: AgentDescriptor, rationale: Rationale, alternatives: Vec<String>) -> Self {
        Self {
            agent,
            rationale,
            alternatives,
            decided_at: chrono::Utc::now(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent.name
    }
}
