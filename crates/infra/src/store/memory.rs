//! In-memory store for tests/dev.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use refundsync_core::{
    NewOutboxEntry, NewPrediction, OutboxEntry, OutboxEntryId, Prediction, PredictionKey, RecordKey,
    RefundRecord, RefundStatus, StatusTransition, UserId,
};

use super::{InsertOutcome, RefundStore, StoreError, StoreTx};

#[derive(Debug, Default)]
struct State {
    records: HashMap<RecordKey, RefundRecord>,
    transitions: Vec<StatusTransition>,
    outbox: BTreeMap<OutboxEntryId, OutboxEntry>,
    next_outbox_id: i64,
    predictions: Vec<Prediction>,
    next_prediction_id: i64,
    /// Outbox entries currently held by an open unit of work.
    claimed: HashSet<OutboxEntryId>,
}

impl State {
    fn allocate_outbox_id(&mut self) -> OutboxEntryId {
        self.next_outbox_id += 1;
        OutboxEntryId(self.next_outbox_id)
    }
}

/// In-memory refund store.
///
/// Units of work stage their writes and apply them atomically on commit.
/// Outbox entries are claimed per unit of work, so two concurrent workers never
/// process the same entry at the same time.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRefundStore {
    state: Arc<Mutex<State>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryRefundStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    /// Make the next `commit` fail after staging (simulates a crash before commit).
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    pub fn all_transitions(&self) -> Vec<StatusTransition> {
        self.lock().transitions.clone()
    }

    pub fn all_outbox_entries(&self) -> Vec<OutboxEntry> {
        self.lock().outbox.values().cloned().collect()
    }

    pub fn all_predictions(&self) -> Vec<Prediction> {
        self.lock().predictions.clone()
    }

    /// Insert an outbox entry directly (bypassing the status sync path).
    pub fn seed_outbox(&self, entry: NewOutboxEntry) -> OutboxEntryId {
        let mut s = self.lock();
        let id = s.allocate_outbox_id();
        s.outbox.insert(id, OutboxEntry::from_new(id, entry));
        id
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RefundStore for InMemoryRefundStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTx {
            state: self.state.clone(),
            fail_commit: self.fail_next_commit.clone(),
            records: HashMap::new(),
            transitions: Vec::new(),
            outbox_new: Vec::new(),
            outbox_updates: HashMap::new(),
            claims: Vec::new(),
        })
    }

    async fn find_record(&self, key: RecordKey) -> Result<Option<RefundRecord>, StoreError> {
        Ok(self.lock().records.get(&key).cloned())
    }

    async fn latest_record_for_user(&self, user_id: UserId) -> Result<Option<RefundRecord>, StoreError> {
        Ok(self
            .lock()
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .max_by_key(|r| r.tax_year)
            .cloned())
    }

    async fn transitions_for(&self, key: RecordKey) -> Result<Vec<StatusTransition>, StoreError> {
        Ok(self
            .lock()
            .transitions
            .iter()
            .filter(|t| t.user_id == key.user_id && t.tax_year == key.tax_year)
            .cloned()
            .collect())
    }

    async fn pending_outbox(&self, max_attempts: u32, limit: usize) -> Result<Vec<OutboxEntryId>, StoreError> {
        let s = self.lock();
        let mut pending: Vec<&OutboxEntry> = s
            .outbox
            .values()
            .filter(|e| e.is_pending(max_attempts))
            .collect();
        pending.sort_by_key(|e| (e.created_at, e.id));
        Ok(pending.into_iter().take(limit).map(|e| e.id).collect())
    }

    async fn find_outbox_entry(&self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, StoreError> {
        Ok(self.lock().outbox.get(&id).cloned())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut dead: Vec<OutboxEntry> = self
            .lock()
            .outbox
            .values()
            .filter(|e| e.is_dead_lettered())
            .cloned()
            .collect();
        dead.sort_by_key(|e| (e.failed_at, e.id));
        dead.truncate(limit);
        Ok(dead)
    }

    async fn requeue_outbox_entry(&self, id: OutboxEntryId) -> Result<bool, StoreError> {
        let mut s = self.lock();
        let entry = s
            .outbox
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox entry {}", id.0)))?;
        Ok(entry.requeue())
    }

    async fn prediction_exists(&self, key: &PredictionKey) -> Result<bool, StoreError> {
        Ok(self.lock().predictions.iter().any(|p| &p.key() == key))
    }

    async fn insert_prediction(&self, prediction: NewPrediction) -> Result<InsertOutcome, StoreError> {
        let mut s = self.lock();
        let key = prediction.key();
        if s.predictions.iter().any(|p| p.key() == key) {
            return Ok(InsertOutcome::Duplicate);
        }
        s.next_prediction_id += 1;
        let id = s.next_prediction_id;
        s.predictions.push(Prediction::from_new(id, prediction));
        Ok(InsertOutcome::Inserted)
    }

    async fn predictions_for(&self, key: RecordKey) -> Result<Vec<Prediction>, StoreError> {
        Ok(self
            .lock()
            .predictions
            .iter()
            .filter(|p| p.user_id == key.user_id && p.tax_year == key.tax_year)
            .cloned()
            .collect())
    }
}

/// Staged writes of one in-memory unit of work.
#[derive(Debug)]
pub struct InMemoryTx {
    state: Arc<Mutex<State>>,
    fail_commit: Arc<AtomicBool>,
    records: HashMap<RecordKey, RefundRecord>,
    transitions: Vec<StatusTransition>,
    outbox_new: Vec<OutboxEntry>,
    outbox_updates: HashMap<OutboxEntryId, OutboxEntry>,
    claims: Vec<OutboxEntryId>,
}

impl InMemoryTx {
    fn release_claims(&mut self, state: &mut State) {
        for id in self.claims.drain(..) {
            state.claimed.remove(&id);
        }
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if self.claims.is_empty() {
            return;
        }
        let state = self.state.clone();
        let mut s = lock_state(&state);
        self.release_claims(&mut s);
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn find_record_for_update(&mut self, key: RecordKey) -> Result<Option<RefundRecord>, StoreError> {
        if let Some(staged) = self.records.get(&key) {
            return Ok(Some(staged.clone()));
        }
        Ok(lock_state(&self.state).records.get(&key).cloned())
    }

    async fn save_record(&mut self, record: &RefundRecord) -> Result<(), StoreError> {
        self.records.insert(record.key(), record.clone());
        Ok(())
    }

    async fn append_transition(&mut self, transition: &StatusTransition) -> Result<(), StoreError> {
        self.transitions.push(transition.clone());
        Ok(())
    }

    async fn enqueue_outbox(&mut self, entry: NewOutboxEntry) -> Result<OutboxEntryId, StoreError> {
        let id = lock_state(&self.state).allocate_outbox_id();
        self.outbox_new.push(OutboxEntry::from_new(id, entry));
        Ok(id)
    }

    async fn latest_prediction(
        &mut self,
        key: RecordKey,
        status: RefundStatus,
    ) -> Result<Option<Prediction>, StoreError> {
        Ok(lock_state(&self.state)
            .predictions
            .iter()
            .filter(|p| p.user_id == key.user_id && p.tax_year == key.tax_year && p.status == status)
            .max_by_key(|p| (p.created_at, p.id))
            .cloned())
    }

    async fn lock_outbox_entry(&mut self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, StoreError> {
        if let Some(staged) = self.outbox_updates.get(&id) {
            return Ok(Some(staged.clone()));
        }
        let mut s = lock_state(&self.state);
        if self.claims.contains(&id) {
            return Ok(s.outbox.get(&id).cloned());
        }
        if s.claimed.contains(&id) {
            return Ok(None);
        }
        let Some(entry) = s.outbox.get(&id).cloned() else {
            return Ok(None);
        };
        s.claimed.insert(id);
        self.claims.push(id);
        Ok(Some(entry))
    }

    async fn save_outbox_entry(&mut self, entry: &OutboxEntry) -> Result<(), StoreError> {
        if !self.claims.contains(&entry.id) {
            return Err(StoreError::Conflict(format!(
                "outbox entry {} is not locked by this unit of work",
                entry.id.0
            )));
        }
        self.outbox_updates.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let state = self.state.clone();
        let mut s = lock_state(&state);

        if self.fail_commit.swap(false, Ordering::SeqCst) {
            self.release_claims(&mut s);
            return Err(StoreError::Database("commit failed (injected)".to_string()));
        }

        for (key, record) in self.records.drain() {
            s.records.insert(key, record);
        }
        s.transitions.append(&mut self.transitions);
        for entry in self.outbox_new.drain(..) {
            s.outbox.insert(entry.id, entry);
        }
        for (id, entry) in self.outbox_updates.drain() {
            s.outbox.insert(id, entry);
        }
        self.release_claims(&mut s);
        Ok(())
    }
}
