//! Bounded in-memory routing audit trail

use crate::types::{DecisionRecord, TurnOutcome};
use parking_lot::Mutex;
use std::collections::VecDeque;

pub const DEFAULT_DECISION_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct DecisionLog {
    entries: Mutex<VecDeque<DecisionRecord>>,
    capacity: usize,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_DECISION_CAPACITY))),
            capacity,
        }
    }

    /// Append a record, evicting the oldest once full
    pub fn record(&self, record: DecisionRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Attach the final outcome to the decision made for `turn_id`
    pub fn complete(&self, turn_id: uuid::Uuid, outcome: TurnOutcome) {
        let mut entries = self.entries.lock();
        if let Some(record) = entries.iter_mut().rev().find(|r| r.turn_id == turn_id) {
            record.outcome = Some(outcome);
        }
    }

    /// Most recent decisions first
    pub fn recent(&self, limit: usize) -> Vec<DecisionRecord> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new(DEFAULT_DECISION_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rationale;

    fn record(agent: &str) -> DecisionRecord {
        DecisionRecord {
            turn_id: uuid::Uuid::new_v4(),
            session_id: "s".to_string(),
            agent: agent.to_string(),
            rationale: Rationale::DefaultFallback,
            alternatives: vec![],
            outcome: None,
            decided_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_bounded_and_newest_first() {
        let log = DecisionLog::new(2);
        log.record(record("a"));
        log.record(record("b"));
        log.record(record("c"));

        let recent: Vec<_> = log.recent(10).into_iter().map(|r| r.agent).collect();
        assert_eq!(recent, vec!["c", "b"]);
        assert_eq!(log.recent(1).len(), 1);
    }

    #[test]
    fn test_complete_sets_outcome() {
        let log = DecisionLog::default();
        let r = record("a");
        let id = r.turn_id;
        log.record(r);
        log.complete(id, TurnOutcome::Cancelled);
        assert_eq!(log.recent(1)[0].outcome, Some(TurnOutcome::Cancelled));
    }
}
