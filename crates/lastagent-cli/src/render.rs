//! Terminal rendering of normalized events

use lastagent_core::{AgentSummary, ErrorKind, NormalizedEvent, TurnSummary};
use owo_colors::{OwoColorize, Style};
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use std::io::Write;

/// Writes a turn's events to stdout (text) and stderr (diagnostics)
///
/// With markdown on, text lines are held back until a block is complete
/// (blank line outside a code fence, or any non-text event) and then
/// rendered as a whole.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    markdown: bool,
    block: String,
    in_fence: bool,
}

impl Renderer {
    pub fn new(markdown: bool) -> Self {
        Self {
            markdown,
            ..Default::default()
        }
    }

    pub fn render(&mut self, event: &NormalizedEvent) {
        if let NormalizedEvent::TextDelta { text } = event {
            let output = if self.markdown {
                self.push_markdown(text)
            } else {
                Some(text.clone())
            };
            if let Some(output) = output {
                print_line(&output);
            }
            return;
        }

        if let Some(block) = self.flush_markdown() {
            print_line(&block);
        }
        match event {
            NormalizedEvent::TextDelta { .. } => {}
            NormalizedEvent::ToolCall { name, args } => {
                eprintln!("{} {} {}", "⚙".cyan(), name.cyan().bold(), format_args(args).dimmed());
            }
            NormalizedEvent::Error { kind, message } => match kind {
                ErrorKind::AgentStderr => eprintln!("{}", message.dimmed()),
                ErrorKind::AgentUnavailable => eprintln!("{} {}", "✗".red(), message.red()),
            },
            NormalizedEvent::Done(summary) => eprintln!("{}", format_summary(summary)),
        }
    }

    /// Buffer one line; returns a rendered block once it is complete
    fn push_markdown(&mut self, line: &str) -> Option<String> {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            self.in_fence = !self.in_fence;
        }
        if !self.in_fence && trimmed.is_empty() {
            return self.flush_markdown().map(|block| block + "\n");
        }
        self.block.push_str(line);
        self.block.push('\n');
        None
    }

    fn flush_markdown(&mut self) -> Option<String> {
        self.in_fence = false;
        if self.block.trim().is_empty() {
            self.block.clear();
            return None;
        }
        let block = std::mem::take(&mut self.block);
        Some(render_markdown(&block))
    }
}

fn print_line(text: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", text);
    let _ = out.flush();
}

/// Render a markdown document for the terminal
pub fn render_markdown(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut writer = MarkdownWriter::new();
    for event in Parser::new_ext(source, options) {
        writer.event(event);
    }
    writer.finish()
}

struct MarkdownWriter {
    out: String,
    at_line_start: bool,
    /// A list bullet was just written; the item's first block stays on its line
    fresh_item: bool,
    pending_blank: bool,
    /// Next number for ordered lists, `None` for bullets
    lists: Vec<Option<u64>>,
    quote_depth: usize,
    heading: bool,
    code: bool,
    strong: usize,
    emphasis: usize,
    strike: usize,
    /// Destination and visible text of the links being written
    links: Vec<(String, String)>,
}

impl MarkdownWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            at_line_start: true,
            fresh_item: false,
            pending_blank: false,
            lists: Vec::new(),
            quote_depth: 0,
            heading: false,
            code: false,
            strong: 0,
            emphasis: 0,
            strike: 0,
            links: Vec::new(),
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if let Some((_, visible)) = self.links.last_mut() {
                    visible.push_str(&text);
                }
                let style = if self.code {
                    Style::new().green()
                } else {
                    self.inline_style()
                };
                self.write_lines(&text, style);
            }
            Event::Code(code) => {
                if let Some((_, visible)) = self.links.last_mut() {
                    visible.push_str(&code);
                }
                self.write_lines(&code, Style::new().yellow());
            }
            Event::Html(html) | Event::InlineHtml(html) => self.write_lines(&html, Style::new()),
            Event::SoftBreak | Event::HardBreak => self.newline(),
            Event::Rule => {
                self.start_block();
                self.write_lines(&"─".repeat(40), Style::new().dimmed());
                self.end_block();
            }
            Event::TaskListMarker(done) => {
                let marker = if done { "[x] " } else { "[ ] " };
                self.write_lines(marker, Style::new().cyan());
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => self.start_block(),
            Tag::Heading { .. } => {
                self.start_block();
                self.heading = true;
            }
            Tag::BlockQuote => {
                self.start_block();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                self.start_block();
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        self.write_lines(&lang, Style::new().dimmed());
                        self.newline();
                    }
                }
                self.code = true;
            }
            Tag::List(start) => {
                if self.lists.is_empty() {
                    self.start_block();
                } else if !self.at_line_start {
                    self.newline();
                }
                self.lists.push(start);
            }
            Tag::Item => {
                if !self.at_line_start {
                    self.newline();
                }
                let bullet = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        *n += 1;
                        format!("{}.", *n - 1)
                    }
                    _ => "•".to_string(),
                };
                let depth = self.lists.len().saturating_sub(1);
                self.write_prefix(depth);
                self.out.push_str(&format!("{} ", bullet.cyan()));
                self.fresh_item = true;
            }
            Tag::Emphasis => self.emphasis += 1,
            Tag::Strong => self.strong += 1,
            Tag::Strikethrough => self.strike += 1,
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                self.links.push((dest_url.to_string(), String::new()));
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => self.end_block(),
            TagEnd::Heading(_) => {
                self.heading = false;
                self.end_block();
            }
            TagEnd::BlockQuote => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.end_block();
            }
            TagEnd::CodeBlock => {
                self.code = false;
                self.end_block();
            }
            TagEnd::List(_) => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.end_block();
                }
            }
            TagEnd::Item => {
                if !self.at_line_start {
                    self.newline();
                }
            }
            TagEnd::Emphasis => self.emphasis = self.emphasis.saturating_sub(1),
            TagEnd::Strong => self.strong = self.strong.saturating_sub(1),
            TagEnd::Strikethrough => self.strike = self.strike.saturating_sub(1),
            TagEnd::Link | TagEnd::Image => {
                if let Some((url, visible)) = self.links.pop() {
                    if !url.is_empty() && url != visible {
                        let suffix = format!(" ({})", url);
                        self.write_lines(&suffix, Style::new().dimmed());
                    }
                }
            }
            _ => {}
        }
    }

    fn inline_style(&self) -> Style {
        let mut style = Style::new();
        if self.heading {
            style = style.bold().underline();
        }
        if self.strong > 0 {
            style = style.bold();
        }
        if self.emphasis > 0 {
            style = style.italic();
        }
        if self.strike > 0 {
            style = style.strikethrough();
        }
        if !self.links.is_empty() {
            style = style.blue().underline();
        }
        style
    }

    fn start_block(&mut self) {
        if self.fresh_item {
            self.fresh_item = false;
            return;
        }
        if !self.at_line_start {
            self.newline();
        }
        if self.pending_blank && !self.out.is_empty() {
            self.out.push('\n');
        }
        self.pending_blank = false;
    }

    fn end_block(&mut self) {
        if !self.at_line_start {
            self.newline();
        }
        if self.lists.is_empty() && self.quote_depth == 0 {
            self.pending_blank = true;
        }
    }

    fn newline(&mut self) {
        self.out.push('\n');
        self.at_line_start = true;
        self.fresh_item = false;
    }

    /// Quote bars and list indentation at the start of a line
    fn write_prefix(&mut self, list_depth: usize) {
        if !self.at_line_start {
            return;
        }
        for _ in 0..self.quote_depth {
            self.out.push_str(&format!("{} ", "│".dimmed()));
        }
        self.out.push_str(&"  ".repeat(list_depth));
        self.at_line_start = false;
    }

    fn write_lines(&mut self, text: &str, style: Style) {
        for piece in text.split_inclusive('\n') {
            let (body, ends_line) = match piece.strip_suffix('\n') {
                Some(body) => (body, true),
                None => (piece, false),
            };
            if !body.is_empty() {
                self.write_prefix(self.lists.len());
                self.fresh_item = false;
                self.out.push_str(&format!("{}", body.style(style)));
            }
            if ends_line {
                self.newline();
            }
        }
    }

    fn finish(mut self) -> String {
        let len = self.out.trim_end_matches('\n').len();
        self.out.truncate(len);
        self.out
    }
}

fn format_args(args: &serde_json::Value) -> String {
    let text = match args {
        serde_json::Value::Null => return String::new(),
        other => other.to_string(),
    };
    if text.chars().count() > 120 {
        let cut: String = text.chars().take(117).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

/// One-line turn footer
pub fn format_summary(summary: &TurnSummary) -> String {
    let secs = summary.duration_ms as f64 / 1000.0;
    if summary.outcome.is_success() {
        format!(
            "{}",
            format!("── {} · {:.1}s · {} chars", summary.agent, secs, summary.chars).dimmed()
        )
    } else {
        let mut line = format!(
            "{} {} {} ({:.1}s)",
            "✗".red(),
            summary.agent.bold(),
            summary.outcome.to_string().red(),
            secs
        );
        let tail = summary.stderr_tail.as_deref().map(str::trim);
        if let Some(tail) = tail.filter(|t| !t.is_empty()) {
            line.push('\n');
            line.push_str(&format!("{}", tail.dimmed()));
        }
        line
    }
}

/// Agent listing with availability markers
pub fn format_agents(agents: &[AgentSummary]) -> String {
    if agents.is_empty() {
        return "No agents match.\n".to_string();
    }

    let width = agents.iter().map(|a| a.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for agent in agents {
        let status = if agent.available {
            format!("{}", "●".green())
        } else {
            format!("{}", "○".dimmed())
        };
        out.push_str(&format!(
            "{} {:<width$}  {:<4}  {}\n",
            status,
            agent.name.bold(),
            agent.kind.to_string(),
            agent.best_for,
            width = width
        ));
        if !agent.capabilities.is_empty() {
            out.push_str(&format!(
                "  {:<width$}  {}\n",
                "",
                agent.capabilities.join(", ").dimmed(),
                width = width
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastagent_core::{AgentDescriptor, TurnOutcome};

    fn plain(s: &str) -> String {
        let mut out = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                for c in chars.by_ref() {
                    if c == 'm' {
                        break;
                    }
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    fn lines(markdown: &str) -> Vec<String> {
        plain(&render_markdown(markdown)).lines().map(str::to_string).collect()
    }

    #[test]
    fn test_headings_and_inline_styles() {
        assert_eq!(
            plain(&render_markdown("# Title\n\nSome *soft* and **bold** text.")),
            "Title\n\nSome soft and bold text."
        );
    }

    #[test]
    fn test_bullet_lists_nest() {
        assert_eq!(lines("- one\n- two\n  - nested"), vec!["• one", "• two", "  • nested"]);
        assert_eq!(lines("3. third\n4. fourth"), vec!["3. third", "4. fourth"]);
    }

    #[test]
    fn test_code_fence_is_not_markdown() {
        assert_eq!(
            lines("```rust\n# not a heading\n- nor a list\n```"),
            vec!["rust", "# not a heading", "- nor a list"]
        );
    }

    #[test]
    fn test_quotes_and_links() {
        assert_eq!(
            lines("> quoted\n\nSee [docs](https://docs.rs) or <https://crates.io>."),
            vec!["│ quoted", "", "See docs (https://docs.rs) or https://crates.io."]
        );
    }

    #[test]
    fn test_task_list_markers() {
        let out = lines("- [x] done\n- [ ] todo");
        assert!(out[0].starts_with("• [x]") && out[0].ends_with("done"));
        assert!(out[1].starts_with("• [ ]") && out[1].ends_with("todo"));
    }

    #[test]
    fn test_blocks_flush_on_blank_line_outside_fence() {
        let mut r = Renderer::new(true);
        assert_eq!(r.push_markdown("Intro **text**"), None);
        assert_eq!(r.push_markdown("```"), None);
        assert_eq!(r.push_markdown("code"), None);
        assert_eq!(r.push_markdown(""), None);
        assert_eq!(r.push_markdown("more"), None);
        assert_eq!(r.push_markdown("```"), None);

        let block = r.push_markdown("").unwrap();
        assert_eq!(plain(&block), "Intro text\n\ncode\n\nmore\n");
        assert_eq!(r.push_markdown(""), None);
        assert_eq!(r.flush_markdown(), None);
    }

    #[test]
    fn test_unterminated_fence_flushes_at_end_of_turn() {
        let mut r = Renderer::new(true);
        r.push_markdown("```");
        r.push_markdown("let x = 1;");
        assert_eq!(plain(&r.flush_markdown().unwrap()), "let x = 1;");
        assert!(!r.in_fence);
    }

    #[test]
    fn test_format_agents_marks_availability() {
        let agents = vec![
            AgentSummary::from_descriptor(&AgentDescriptor::claude(), true),
            AgentSummary::from_descriptor(&AgentDescriptor::aider(), false),
        ];
        let out = plain(&format_agents(&agents));
        assert!(out.contains("● claude"));
        assert!(out.contains("○ aider"));
        assert!(out.contains("git"));
    }

    #[test]
    fn test_failure_summary_includes_stderr_tail() {
        let summary = TurnSummary {
            agent: "codex".to_string(),
            outcome: TurnOutcome::ExecutionFailed { code: Some(2) },
            exit_code: Some(2),
            chars: 0,
            duration_ms: 1500,
            pid: None,
            stderr_tail: Some("boom\n".to_string()),
        };
        let line = plain(&format_summary(&summary));
        assert!(line.contains("agent exited with code 2"));
        assert!(line.ends_with("boom"));
    }
}
