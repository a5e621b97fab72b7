//! Handle to one running turn

use crate::types::{NormalizedEvent, RoutingDecision, TurnSummary};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lazy, finite, non-restartable event sequence of a turn
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<NormalizedEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<NormalizedEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<NormalizedEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = NormalizedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A routed, running turn.
///
/// Dropping the turn (or its event stream) before `Done` cancels the agent.
#[derive(Debug)]
pub struct Turn {
    pub id: uuid::Uuid,
    pub decision: RoutingDecision,
    events: EventStream,
    cancel: CancellationToken,
}

impl Turn {
    pub(crate) fn new(
        id: uuid::Uuid,
        decision: RoutingDecision,
        events: EventStream,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            decision,
            events,
            cancel,
        }
    }

    pub fn agent(&self) -> &str {
        self.decision.agent_name()
    }

    /// Request termination; the stream still ends with `Done`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token usable from another task, e.g. a Ctrl-C handler
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next_event(&mut self) -> Option<NormalizedEvent> {
        self.events.recv().await
    }

    pub fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    pub fn into_events(self) -> EventStream {
        self.events
    }

    /// Drain the turn into a transcript
    pub async fn collect(mut self) -> TurnTranscript {
        let mut transcript = TurnTranscript::default();
        while let Some(event) = self.events.recv().await {
            transcript.push(event);
        }
        transcript
    }
}

/// Everything a turn produced, for non-streaming front-ends
#[derive(Debug, Clone, Default)]
pub struct TurnTranscript {
    lines: Vec<String>,
    pub stderr: Vec<String>,
    pub tool_calls: Vec<(String, serde_json::Value)>,
    pub summary: Option<TurnSummary>,
}

impl TurnTranscript {
    pub fn push(&mut self, event: NormalizedEvent) {
        match event {
            NormalizedEvent::TextDelta { text } => self.lines.push(text),
            NormalizedEvent::ToolCall { name, args } => self.tool_calls.push((name, args)),
            NormalizedEvent::Error { message, .. } => self.stderr.push(message),
            NormalizedEvent::Done(summary) => self.summary = Some(summary),
        }
    }

    /// Text deltas joined by newlines
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_success(&self) -> bool {
        self.summary.as_ref().map_or(false, |s| s.outcome.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnOutcome;
    use futures::StreamExt;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[tokio::test]
    async fn test_event_stream_pending_until_sent() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = EventStream::new(rx);

        {
            let mut next = task::spawn(stream.next());
            assert_pending!(next.poll());
            tx.send(NormalizedEvent::text("hi")).await.unwrap();
            assert!(next.is_woken());
            assert_ready_eq!(next.poll(), Some(NormalizedEvent::text("hi")));
        }

        drop(tx);
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn test_transcript_collects_by_kind() {
        let mut transcript = TurnTranscript::default();
        transcript.push(NormalizedEvent::text("line one"));
        transcript.push(NormalizedEvent::stderr("warning"));
        transcript.push(NormalizedEvent::ToolCall {
            name: "bash".to_string(),
            args: serde_json::Value::Null,
        });
        transcript.push(NormalizedEvent::text("line two"));
        assert!(!transcript.is_success());

        transcript.push(NormalizedEvent::Done(TurnSummary {
            agent: "a".to_string(),
            outcome: TurnOutcome::Success,
            exit_code: Some(0),
            chars: 16,
            duration_ms: 1,
            pid: None,
            stderr_tail: None,
        }));

        assert_eq!(transcript.text(), "line one\nline two");
        assert_eq!(transcript.stderr, vec!["warning".to_string()]);
        assert_eq!(transcript.tool_calls.len(), 1);
        assert!(transcript.is_success());
    }
}
