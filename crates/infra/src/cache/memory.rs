use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CacheError, StatusCache};

/// In-memory TTL cache for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryStatusCache {
    /// Expiry `None` means the TTL was too large to represent.
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    unavailable: AtomicBool,
    deletes: AtomicUsize,
}

impl InMemoryStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (String, Option<Instant>)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("cache unavailable".to_string()));
        }
        Ok(())
    }

    /// Make every operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Store a raw value, bypassing serialization (e.g. to plant a corrupt entry).
    pub fn put_raw(&self, key: &str, value: &str, ttl: Duration) {
        self.entries()
            .insert(key.to_string(), (value.to_string(), Instant::now().checked_add(ttl)));
    }

    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries()
            .get(key)
            .filter(|(_, expires)| is_live(*expires))
            .map(|(v, _)| v.clone())
    }

    /// Number of successful `delete` calls so far.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

fn is_live(expires: Option<Instant>) -> bool {
    expires.is_none_or(|at| at > Instant::now())
}

#[async_trait]
impl StatusCache for InMemoryStatusCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_available()?;
        let mut entries = self.entries();
        match entries.get(key) {
            Some((value, expires)) if is_live(*expires) => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check_available()?;
        self.put_raw(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check_available()?;
        self.entries().remove(key);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
