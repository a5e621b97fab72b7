//! Output normalizer
//!
//! Turns the supervisor's raw chunk sequence into [`NormalizedEvent`]s.
//! Stdout is split into lines; a line carrying a recognised JSON object
//! (`{"type":"tool_use",...}` or `{"type":"text",...}`) becomes the
//! matching event, anything else is passed through verbatim as text.

use crate::process::{ProcessExit, RawChunk};
use crate::types::{ErrorKind, NormalizedEvent, TurnSummary};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::time::Instant;
use tracing::trace;

#[derive(Debug)]
pub struct Normalizer {
    agent: String,
    max_line_bytes: usize,
    pending: Vec<u8>,
    chars: usize,
    started_at: Instant,
    finished: bool,
}

impl Normalizer {
    pub fn new(agent: impl Into<String>, max_line_bytes: usize) -> Self {
        Self {
            agent: agent.into(),
            max_line_bytes: max_line_bytes.max(1),
            pending: Vec::new(),
            chars: 0,
            started_at: Instant::now(),
            finished: false,
        }
    }

    /// Characters of text emitted so far
    pub fn chars(&self) -> usize {
        self.chars
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one raw chunk, returning the events it completes.
    ///
    /// Chunks after `Exit` are ignored.
    pub fn push(&mut self, chunk: RawChunk) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        match chunk {
            RawChunk::Stdout(bytes) => self.push_stdout(&bytes, &mut events),
            RawChunk::Stderr(line) => events.push(NormalizedEvent::stderr(line)),
            RawChunk::Exit(exit) => self.finish(exit, &mut events),
        }

        events
    }

    fn push_stdout(&mut self, bytes: &[u8], events: &mut Vec<NormalizedEvent>) {
        self.pending.extend_from_slice(bytes);
        for line in split_lines(&mut self.pending, self.max_line_bytes) {
            self.emit_line(&line, events);
        }
    }

    fn emit_line(&mut self, line: &[u8], events: &mut Vec<NormalizedEvent>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = String::from_utf8_lossy(line);

        let event = parse_structured(&text).unwrap_or_else(|| NormalizedEvent::text(text.as_ref()));
        if let NormalizedEvent::TextDelta { text } = &event {
            self.chars += text.chars().count();
        }
        trace!(agent = %self.agent, ?event, "Normalized line");
        events.push(event);
    }

    fn finish(&mut self, exit: ProcessExit, events: &mut Vec<NormalizedEvent>) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit_line(&rest, events);
        }

        if let Some(message) = &exit.spawn_error {
            events.push(NormalizedEvent::Error {
                kind: ErrorKind::AgentUnavailable,
                message: format!("Failed to start {}: {}", self.agent, message),
            });
        }

        events.push(NormalizedEvent::Done(TurnSummary {
            agent: self.agent.clone(),
            outcome: exit.outcome,
            exit_code: exit.exit_code,
            chars: self.chars,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
            pid: exit.pid,
            stderr_tail: exit.stderr_tail,
        }));
        self.finished = true;
    }
}

/// Take every complete line off the front of `pending`, terminators removed.
///
/// A runaway line without terminator is flushed in pieces of at most
/// `max_line` bytes, cut where a UTF-8 character starts.
pub(crate) fn split_lines(pending: &mut Vec<u8>, max_line: usize) -> Vec<Vec<u8>> {
    let max_line = max_line.max(1);
    let mut lines = Vec::new();

    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
        let mut line: Vec<u8> = pending.drain(..=pos).collect();
        line.pop();
        lines.push(line);
    }

    while pending.len() >= max_line {
        let cut = char_boundary(pending, max_line);
        lines.push(pending.drain(..cut).collect());
    }

    lines
}

/// Largest cut at or below `at` that does not split a character
fn char_boundary(bytes: &[u8], at: usize) -> usize {
    let is_continuation = |b: u8| b & 0b1100_0000 == 0b1000_0000;
    let mut cut = at.min(bytes.len());
    while cut > 0 && cut < bytes.len() && at - cut < 3 && is_continuation(bytes[cut]) {
        cut -= 1;
    }
    if cut == 0 {
        at.min(bytes.len())
    } else {
        cut
    }
}

/// Recognise tool-call and text objects emitted by agents in JSON mode
fn parse_structured(line: &str) -> Option<NormalizedEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }

    let value: Value = serde_json::from_str(trimmed).ok()?;
    let object = value.as_object()?;

    match object.get("type")?.as_str()? {
        "tool_use" | "tool_call" => {
            let name = object.get("name")?.as_str()?.to_string();
            let args = object
                .get("input")
                .or_else(|| object.get("args"))
                .or_else(|| object.get("arguments"))
                .cloned()
                .unwrap_or(Value::Null);
            Some(NormalizedEvent::ToolCall { name, args })
        }
        "text" => object.get("text")?.as_str().map(NormalizedEvent::text),
        _ => None,
    }
}

/// Lazily normalize a raw chunk stream; the result ends after `Done`
pub fn normalize<S>(
    agent: impl Into<String>,
    max_line_bytes: usize,
    raw: S,
) -> impl Stream<Item = NormalizedEvent>
where
    S: Stream<Item = RawChunk>,
{
    let mut normalizer = Normalizer::new(agent, max_line_bytes);
    raw.flat_map(move |chunk| futures::stream::iter(normalizer.push(chunk)))
}
