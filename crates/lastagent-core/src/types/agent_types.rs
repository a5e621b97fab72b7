//! Agent descriptor types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Placeholder substituted with the prompt inside invocation arguments
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// How the prompt reaches the agent process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptDelivery {
    /// Substituted into `{prompt}` or appended as the last argument
    #[default]
    Argument,
    /// Written to stdin, which is then closed
    Stdin,
}

/// Kind of agent backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Cli,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
        }
    }
}

/// Executable plus argument template for launching an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub prompt_delivery: PromptDelivery,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl InvocationSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            prompt_delivery: PromptDelivery::Argument,
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delivery(mut self, delivery: PromptDelivery) -> Self {
        self.prompt_delivery = delivery;
        self
    }

    /// Final argument vector for a prompt.
    ///
    /// With argument delivery every `{prompt}` occurrence is substituted; if
    /// the template has none, the prompt is appended. With stdin delivery the
    /// placeholder is substituted with an empty string.
    pub fn build_args(&self, prompt: &str) -> Vec<String> {
        let substitute = match self.prompt_delivery {
            PromptDelivery::Argument => prompt,
            PromptDelivery::Stdin => "",
        };

        let mut has_placeholder = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(PROMPT_PLACEHOLDER) {
                    has_placeholder = true;
                    arg.replace(PROMPT_PLACEHOLDER, substitute)
                } else {
                    arg.clone()
                }
            })
            .collect();

        if self.prompt_delivery == PromptDelivery::Argument && !has_placeholder {
            args.push(prompt.to_string());
        }

        args
    }
}

/// Immutable description of one routable agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub kind: AgentKind,
    pub invocation: InvocationSpec,
    /// Capability tags such as "coding", "git", "sandboxed", "long-context"
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub best_for: String,
    #[serde(default = "default_requires_working_directory")]
    pub requires_working_directory: bool,
}

fn default_requires_working_directory() -> bool {
    true
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, invocation: InvocationSpec) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            kind: AgentKind::Cli,
            invocation,
            capabilities: Vec::new(),
            strengths: Vec::new(),
            best_for: String::new(),
            requires_working_directory: true,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
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

    pub fn with_strengths<I, S>(mut self, strengths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strengths = strengths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_best_for(mut self, best_for: impl Into<String>) -> Self {
        self.best_for = best_for.into();
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(capability))
    }

    /// True when the capability set intersects `filter`
    pub fn matches_any(&self, filter: &[String]) -> bool {
        filter.iter().any(|c| self.has_capability(c))
    }

    /// Reasoning-focused agent
    pub fn claude() -> Self {
        Self::new(
            "claude",
            InvocationSpec::new("claude").with_args(["-p", PROMPT_PLACEHOLDER]),
        )
        .with_display_name("Claude Code")
        .with_capabilities(["coding", "reasoning", "review", "planning"])
        .with_strengths(["deep reasoning", "architecture", "code review"])
        .with_best_for("Complex reasoning, design and careful code changes")
    }

    /// Large-context agent
    pub fn gemini() -> Self {
        Self::new(
            "gemini",
            InvocationSpec::new("gemini").with_args(["-p", PROMPT_PLACEHOLDER]),
        )
        .with_display_name("Gemini CLI")
        .with_capabilities(["coding", "long-context", "research", "analysis"])
        .with_strengths(["very large context window", "repository-wide analysis"])
        .with_best_for("Reading and summarising large codebases")
    }

    /// Git-aware editing agent
    pub fn aider() -> Self {
        Self::new(
            "aider",
            InvocationSpec::new("aider").with_args([
                "--yes-always",
                "--no-pretty",
                "--message",
                PROMPT_PLACEHOLDER,
            ]),
        )
        .with_display_name("Aider")
        .with_capabilities(["coding", "git", "editing", "refactoring"])
        .with_strengths(["commits every change", "multi-file edits"])
        .with_best_for("Targeted edits committed straight to git")
    }

    /// Sandboxed-execution agent
    pub fn codex() -> Self {
        Self::new(
            "codex",
            InvocationSpec::new("codex").with_args(["exec", PROMPT_PLACEHOLDER]),
        )
        .with_display_name("Codex CLI")
        .with_capabilities(["coding", "sandboxed", "execution", "testing"])
        .with_strengths(["sandboxed command execution", "running tests"])
        .with_best_for("Running and fixing code inside a sandbox")
    }

    /// Multi-step workflow agent
    pub fn goose() -> Self {
        Self::new(
            "goose",
            InvocationSpec::new("goose").with_args(["run", "--text", PROMPT_PLACEHOLDER]),
        )
        .with_display_name("Goose")
        .with_capabilities(["coding", "workflow", "automation", "multi-step"])
        .with_strengths(["long multi-step plans", "tool automation"])
        .with_best_for("Multi-step tasks that chain several tools")
    }

    /// Built-in catalogue in declaration order
    pub fn builtin_agents() -> Vec<Self> {
        vec![
            Self::claude(),
            Self::gemini(),
            Self::aider(),
            Self::codex(),
            Self::goose(),
        ]
    }
}

/// Read-only listing entry for front-ends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub name: String,
    pub display_name: String,
    pub kind: AgentKind,
    pub command: String,
    pub capabilities: Vec<String>,
    pub strengths: Vec<String>,
    pub best_for: String,
    pub requires_working_directory: bool,
    pub available: bool,
}

impl AgentSummary {
    pub fn from_descriptor(descriptor: &AgentDescriptor, available: bool) -> Self {
        Self {
            name: descriptor.name.clone(),
            display_name: descriptor.display_name.clone(),
            kind: descriptor.kind,
            command: descriptor.invocation.program.clone(),
            capabilities: descriptor.capabilities.clone(),
            strengths: descriptor.strengths.clone(),
            best_for: descriptor.best_for.clone(),
            requires_working_directory: descriptor.requires_working_directory,
            available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_args_substitutes_placeholder() {
        let spec = InvocationSpec::new("claude").with_args(["-p", PROMPT_PLACEHOLDER]);
        assert_eq!(spec.build_args("fix the bug"), vec!["-p", "fix the bug"]);
    }

    #[test]
    fn test_build_args_appends_without_placeholder() {
        let spec = InvocationSpec::new("agent").with_args(["--quiet"]);
        assert_eq!(spec.build_args("hi"), vec!["--quiet", "hi"]);
    }

    #[test]
    fn test_build_args_stdin_leaves_prompt_out() {
        let spec = InvocationSpec::new("agent")
            .with_args(["run"])
            .with_delivery(PromptDelivery::Stdin);
        assert_eq!(spec.build_args("hi"), vec!["run"]);
    }

    #[test]
    fn test_builtin_agents_unique_names() {
        let agents = AgentDescriptor::builtin_agents();
        assert_eq!(agents.len(), 5);

        let mut names: Vec<_> = agents.iter().map(|a| a.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_capability_match_is_case_insensitive() {
        let aider = AgentDescriptor::aider();
        assert!(aider.has_capability("GIT"));
        assert!(aider.matches_any(&["sandboxed".to_string(), "git".to_string()]));
        assert!(!aider.matches_any(&["long-context".to_string()]));
    }
}
