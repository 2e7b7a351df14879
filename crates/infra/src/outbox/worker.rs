//! Periodic outbox worker with retry ceiling and dead-lettering.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use refundsync_core::{OutboxEntry, OutboxEntryId};
use refundsync_events::{HandleOutcome, OutboxEventHandler};

use crate::config::OutboxConfig;
use crate::store::{RefundStore, StoreError, StoreTx};

/// What happened to one selected entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryResult {
    Applied,
    AlreadyApplied,
    Retried,
    Permanent,
    DeadLettered,
    /// Gone, already processed, or held by another worker.
    Skipped,
}

/// Summary of one worker tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub selected: usize,
    pub applied: usize,
    pub already_applied: usize,
    pub retried: usize,
    pub permanent: usize,
    pub dead_lettered: usize,
    pub skipped: usize,
}

impl TickReport {
    fn record(&mut self, result: EntryResult) {
        match result {
            EntryResult::Applied => self.applied += 1,
            EntryResult::AlreadyApplied => self.already_applied += 1,
            EntryResult::Retried => self.retried += 1,
            EntryResult::Permanent => self.permanent += 1,
            EntryResult::DeadLettered => self.dead_lettered += 1,
            EntryResult::Skipped => self.skipped += 1,
        }
    }
}

/// Apply a handler outcome to an entry's bookkeeping.
///
/// - `Applied`: processed
/// - `AlreadyApplied`: attempt noted, processed
/// - `TransientFailure`: attempt counted, stays pending (dead-lettered at the ceiling)
/// - `PermanentFailure`: attempt counted, processed
pub fn apply_outcome(
    entry: &mut OutboxEntry,
    outcome: HandleOutcome,
    now: DateTime<Utc>,
    config: &OutboxConfig,
) -> EntryResult {
    match outcome {
        HandleOutcome::Applied => {
            entry.mark_processed(now);
            EntryResult::Applied
        }
        HandleOutcome::AlreadyApplied { note } => {
            entry.bump_attempt(note);
            entry.mark_processed(now);
            EntryResult::AlreadyApplied
        }
        HandleOutcome::TransientFailure { error } => {
            entry.bump_attempt(error);
            if config.dead_letter && entry.attempts >= config.max_attempts {
                entry.dead_letter(now);
                EntryResult::DeadLettered
            } else {
                EntryResult::Retried
            }
        }
        HandleOutcome::PermanentFailure { error } => {
            entry.bump_attempt(error);
            entry.mark_processed(now);
            EntryResult::Permanent
        }
    }
}

/// Drains pending outbox entries through a handler.
///
/// - One tick at a time: a tick that finds another still running is skipped.
/// - Entries are processed sequentially, each in its own unit of work.
/// - Must be paired with an idempotent handler (at-least-once delivery).
pub struct OutboxWorker<S: RefundStore> {
    store: Arc<S>,
    handler: Arc<dyn OutboxEventHandler>,
    config: OutboxConfig,
    tick_guard: Mutex<()>,
}

impl<S: RefundStore> OutboxWorker<S> {
    pub fn new(store: Arc<S>, handler: Arc<dyn OutboxEventHandler>, config: OutboxConfig) -> Self {
        Self {
            store,
            handler,
            config,
            tick_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Run one tick now.
    ///
    /// Returns `Ok(None)` if another tick is in progress.
    pub async fn run_once(&self) -> Result<Option<TickReport>, StoreError> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("previous outbox tick still running; skipping");
            return Ok(None);
        };

        let ids = self
            .store
            .pending_outbox(self.config.max_attempts, self.config.batch_size)
            .await?;

        let mut report = TickReport {
            selected: ids.len(),
            ..TickReport::default()
        };

        for id in ids {
            match self.process_entry(id).await {
                Ok(result) => report.record(result),
                Err(e) => {
                    warn!(outbox_id = id.0, error = %e, "outbox entry bookkeeping failed");
                    report.record(EntryResult::Skipped);
                }
            }
        }

        if report.selected > 0 {
            info!(
                selected = report.selected,
                applied = report.applied,
                already_applied = report.already_applied,
                retried = report.retried,
                permanent = report.permanent,
                dead_lettered = report.dead_lettered,
                skipped = report.skipped,
                "outbox tick complete"
            );
        }
        Ok(Some(report))
    }

    async fn process_entry(&self, id: OutboxEntryId) -> Result<EntryResult, StoreError> {
        let mut tx = self.store.begin().await?;
        let Some(mut entry) = tx.lock_outbox_entry(id).await? else {
            return Ok(EntryResult::Skipped);
        };
        if entry.is_processed() || entry.is_dead_lettered() {
            return Ok(EntryResult::Skipped);
        }

        let outcome = self.handler.handle(&entry).await;
        let label = outcome.label();
        let result = apply_outcome(&mut entry, outcome, Utc::now(), &self.config);

        match result {
            EntryResult::DeadLettered => error!(
                outbox_id = id.0,
                event_type = %entry.event_type,
                aggregate_key = %entry.aggregate_key,
                attempts = entry.attempts,
                last_error = entry.last_error.as_deref().unwrap_or(""),
                "outbox entry dead-lettered"
            ),
            EntryResult::Retried | EntryResult::Permanent => warn!(
                outbox_id = id.0,
                outcome = label,
                attempts = entry.attempts,
                last_error = entry.last_error.as_deref().unwrap_or(""),
                "outbox entry failed"
            ),
            _ => debug!(outbox_id = id.0, outcome = label, "outbox entry handled"),
        }

        tx.save_outbox_entry(&entry).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// Spawn the periodic loop on the current tokio runtime.
    pub fn spawn(self: Arc<Self>) -> OutboxWorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = self.config.poll_interval;

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = %e, "outbox tick failed");
                        }
                    }
                }
            }
            info!("outbox worker stopped");
        });

        OutboxWorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}

/// Handle to stop a spawned outbox worker.
#[derive(Debug)]
pub struct OutboxWorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl OutboxWorkerHandle {
    /// Request shutdown and wait for the in-flight tick to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refundsync_core::NewOutboxEntry;

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

    fn config(max_attempts: u32, dead_letter: bool) -> OutboxConfig {
        OutboxConfig {
            max_attempts,
            dead_letter,
            ..OutboxConfig::default()
        }
    }

    #[test]
    fn applied_marks_processed_without_attempt() {
        let mut e = entry();
        let r = apply_outcome(&mut e, HandleOutcome::Applied, Utc::now(), &config(20, true));
        assert_eq!(r, EntryResult::Applied);
        assert!(e.is_processed());
        assert_eq!(e.attempts, 0);
    }

    #[test]
    fn already_applied_notes_the_attempt() {
        let mut e = entry();
        let r = apply_outcome(&mut e, HandleOutcome::already_applied("dup"), Utc::now(), &config(20, true));
        assert_eq!(r, EntryResult::AlreadyApplied);
        assert!(e.is_processed());
        assert_eq!(e.attempts, 1);
        assert_eq!(e.last_error.as_deref(), Some("dup"));
    }

    #[test]
    fn transient_failures_stay_pending_until_the_ceiling() {
        let cfg = config(2, true);
        let mut e = entry();

        let r = apply_outcome(&mut e, HandleOutcome::transient("timeout"), Utc::now(), &cfg);
        assert_eq!(r, EntryResult::Retried);
        assert!(e.is_pending(cfg.max_attempts));

        let r = apply_outcome(&mut e, HandleOutcome::transient("timeout"), Utc::now(), &cfg);
        assert_eq!(r, EntryResult::DeadLettered);
        assert!(e.is_dead_lettered());
        assert!(!e.is_processed());
    }

    #[test]
    fn without_dead_lettering_exhausted_entries_just_stop_being_selected() {
        let cfg = config(1, false);
        let mut e = entry();
        let r = apply_outcome(&mut e, HandleOutcome::transient("timeout"), Utc::now(), &cfg);
        assert_eq!(r, EntryResult::Retried);
        assert!(!e.is_dead_lettered());
        assert!(!e.is_pending(cfg.max_attempts));
    }

    #[test]
    fn permanent_failure_is_terminal() {
        let mut e = entry();
        let r = apply_outcome(&mut e, HandleOutcome::permanent("bad payload"), Utc::now(), &config(20, true));
        assert_eq!(r, EntryResult::Permanent);
        assert!(e.is_processed());
        assert_eq!(e.attempts, 1);
    }

    fn outcome_strategy() -> impl proptest::strategy::Strategy<Value = HandleOutcome> {
        use proptest::prelude::*;
        prop_oneof![
            Just(HandleOutcome::Applied),
            Just(HandleOutcome::already_applied("dup")),
            Just(HandleOutcome::transient("timeout")),
            Just(HandleOutcome::permanent("bad")),
        ]
    }

    proptest::proptest! {
        #[test]
        fn retry_budget_is_never_exceeded(
            max_attempts in 1u32..6,
            outcomes in proptest::collection::vec(outcome_strategy(), 1..20),
        ) {
            let cfg = config(max_attempts, true);
            let mut e = entry();
            for outcome in outcomes {
                if !e.is_pending(cfg.max_attempts) {
                    break;
                }
                let r = apply_outcome(&mut e, outcome, Utc::now(), &cfg);
                proptest::prop_assert!(e.attempts <= cfg.max_attempts);
                if r == EntryResult::DeadLettered {
                    proptest::prop_assert_eq!(e.attempts, cfg.max_attempts);
                }
            }
            proptest::prop_assert!(!(e.is_processed() && e.is_dead_lettered()));
        }
    }
}
