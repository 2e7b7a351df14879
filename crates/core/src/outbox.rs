//! Transactional outbox entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::OutboxEntryId;

/// An outbox entry before the store assigns it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEntry {
    pub event_type: String,
    pub aggregate_key: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// A durable queue item describing one pending side effect.
///
/// Lifecycle:
/// - pending: `processed_at` and `failed_at` are both `None`
/// - processed: `processed_at` set (never cleared again)
/// - dead-lettered: `failed_at` set after exhausting the attempt ceiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxEntryId,
    pub event_type: String,
    pub aggregate_key: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Materialize a freshly enqueued entry.
    pub fn from_new(id: OutboxEntryId, new: NewOutboxEntry) -> Self {
        Self {
            id,
            event_type: new.event_type,
            aggregate_key: new.aggregate_key,
            payload: new.payload,
            created_at: new.created_at,
            processed_at: None,
            attempts: 0,
            last_error: None,
            failed_at: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn is_dead_lettered(&self) -> bool {
        self.failed_at.is_some()
    }

    /// Eligible for the next worker batch under the given attempt ceiling.
    pub fn is_pending(&self, max_attempts: u32) -> bool {
        !self.is_processed() && !self.is_dead_lettered() && self.attempts < max_attempts
    }

    /// Mark as processed. Monotonic: an existing timestamp is kept.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        if self.processed_at.is_none() {
            self.processed_at = Some(now);
        }
    }

    /// Record a failed (or noteworthy) attempt.
    pub fn bump_attempt(&mut self, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
    }

    /// Park the entry after it exhausted its attempts.
    pub fn dead_letter(&mut self, now: DateTime<Utc>) {
        if self.processed_at.is_none() && self.failed_at.is_none() {
            self.failed_at = Some(now);
        }
    }

    /// Put a dead-lettered entry back into the queue with a fresh attempt budget.
    ///
    /// Returns `false` if the entry was not dead-lettered.
    pub fn requeue(&mut self) -> bool {
        if self.failed_at.is_none() || self.processed_at.is_some() {
            return false;
        }
        self.failed_at = None;
        self.attempts = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> OutboxEntry {
        OutboxEntry::from_new(
            OutboxEntryId(1),
            NewOutboxEntry {
                event_type: "REFUND_STATUS_UPDATED".to_string(),
                aggregate_key: "u:2025".to_string(),
                payload: serde_json::json!({}),
                created_at: Utc::now(),
            },
        )
    }

    #[test]
    fn processed_at_is_monotonic() {
        let mut e = entry();
        let first = Utc::now();
        e.mark_processed(first);
        e.mark_processed(first + chrono::Duration::seconds(30));
        assert_eq!(e.processed_at, Some(first));
    }

    #[test]
    fn pending_respects_attempt_ceiling() {
        let mut e = entry();
        assert!(e.is_pending(2));
        e.bump_attempt("timeout");
        e.bump_attempt("timeout");
        assert!(!e.is_pending(2));
        assert_eq!(e.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn dead_letter_and_requeue() {
        let mut e = entry();
        e.bump_attempt("boom");
        e.dead_letter(Utc::now());
        assert!(e.is_dead_lettered());
        assert!(!e.is_pending(20));

        assert!(e.requeue());
        assert!(e.is_pending(20));
        assert_eq!(e.attempts, 0);
        assert!(!e.requeue());
    }

    #[test]
    fn processed_entry_is_never_dead_lettered() {
        let mut e = entry();
        e.mark_processed(Utc::now());
        e.dead_letter(Utc::now());
        assert!(!e.is_dead_lettered());
    }
}
