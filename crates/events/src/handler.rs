//! Consumer contract for outbox events.

use async_trait::async_trait;

use refundsync_core::OutboxEntry;

/// Explicit result of handling one outbox entry.
///
/// The worker maps each variant to a bookkeeping action:
/// - `Applied` / `PermanentFailure`: mark processed
/// - `AlreadyApplied`: note the attempt, then mark processed
/// - `TransientFailure`: count the attempt and leave the entry pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The side effect was performed (or there was nothing to do).
    Applied,
    /// The side effect already exists; nothing was written.
    AlreadyApplied { note: String },
    /// Worth retrying on a later tick.
    TransientFailure { error: String },
    /// Retrying cannot help (bad payload, model unavailable, client error).
    PermanentFailure { error: String },
}

impl HandleOutcome {
    pub fn already_applied(note: impl Into<String>) -> Self {
        HandleOutcome::AlreadyApplied { note: note.into() }
    }

    pub fn transient(error: impl Into<String>) -> Self {
        HandleOutcome::TransientFailure {
            error: error.into(),
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        HandleOutcome::PermanentFailure {
            error: error.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HandleOutcome::Applied => "applied",
            HandleOutcome::AlreadyApplied { .. } => "already_applied",
            HandleOutcome::TransientFailure { .. } => "transient_failure",
            HandleOutcome::PermanentFailure { .. } => "permanent_failure",
        }
    }
}

/// Performs the side effect described by an outbox entry.
///
/// Implementations must be idempotent: the same entry may be delivered more
/// than once (at-least-once delivery), and a redelivery must not produce a
/// second side effect.
#[async_trait]
pub trait OutboxEventHandler: Send + Sync {
    async fn handle(&self, entry: &OutboxEntry) -> HandleOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_name_each_outcome() {
        assert_eq!(HandleOutcome::Applied.label(), "applied");
        assert_eq!(HandleOutcome::already_applied("dup").label(), "already_applied");
        assert_eq!(HandleOutcome::transient("timeout").label(), "transient_failure");
        assert_eq!(HandleOutcome::permanent("bad payload").label(), "permanent_failure");
    }
}
