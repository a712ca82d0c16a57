//! In-process store for single-replica deployments and tests
//!
//! Same contract as the Redis backend: increments are atomic under one lock
//! and entries expire by clock time. Expired entries are dropped on access
//! and swept from the whole map every [`SWEEP_EVERY`] writes, so keys that are
//! never read again (past rate-limit windows) do not accumulate.

use super::{ttl_seconds, SharedStore, StoreError};
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Writes between full sweeps of expired entries
pub const SWEEP_EVERY: u64 = 64;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Mutex-guarded map with TTL expiry
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, MemoryEntry>>,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Live (unexpired) keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = match self.entries.lock() {
            Ok(mut entries) => {
                entries.retain(|_, entry| entry.expires_at > now);
                entries.keys().cloned().collect()
            }
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    /// Number of entries held, including expired ones not yet swept
    pub fn stored_len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Drop every expired entry once per [`SWEEP_EVERY`] writes
    fn sweep_if_due(&self, entries: &mut HashMap<String, MemoryEntry>, now: DateTime<Utc>) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            entries.retain(|_, entry| entry.expires_at > now);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryEntry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Command("memory store lock poisoned".to_string()))
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::seconds(ttl_seconds(ttl) as i64)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let fresh_expiry = self.expiry(ttl);
        let mut entries = self.lock()?;

        let current = match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(
                entry
                    .value
                    .parse::<u64>()
                    .map_err(|_| StoreError::NotACounter(key.to_string()))?,
            ),
            _ => None,
        };

        let (count, expires_at) = match current {
            Some(count) => {
                let expires_at = entries
                    .get(key)
                    .map(|entry| entry.expires_at)
                    .unwrap_or(fresh_expiry);
                (count + 1, expires_at)
            }
            None => (1, fresh_expiry),
        };

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: count.to_string(),
                expires_at,
            },
        );
        self.sweep_if_due(&mut entries, now);
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        self.sweep_if_due(&mut entries, now);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new());
        let store = MemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_incr_creates_and_counts() {
        let (_clock, store) = store();
        let ttl = Duration::from_secs(60);
        assert_eq!(store.incr_with_expiry("k", ttl).await.unwrap(), 1);
        assert_eq!(store.incr_with_expiry("k", ttl).await.unwrap(), 2);
        assert_eq!(store.incr_with_expiry("k", ttl).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_incr_keeps_original_expiry() {
        let (clock, store) = store();
        let ttl = Duration::from_secs(60);
        store.incr_with_expiry("k", ttl).await.unwrap();
        clock.advance(Duration::from_secs(50));
        assert_eq!(store.incr_with_expiry("k", ttl).await.unwrap(), 2);
        clock.advance(Duration::from_secs(11));
        // the second increment did not extend the window
        assert_eq!(store.incr_with_expiry("k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let (clock, store) = store();
        store
            .set_with_ttl("cache", "{\"a\":1}", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.get("cache").await.unwrap().as_deref(), Some("{\"a\":1}"));

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.get("cache").await.unwrap(), None);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let (_clock, store) = store();
        let ttl = Duration::from_secs(5);
        store.set_with_ttl("k", "one", ttl).await.unwrap();
        store.set_with_ttl("k", "two", ttl).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_incr_on_non_counter_fails() {
        let (_clock, store) = store();
        store
            .set_with_ttl("k", "text", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(
            store.incr_with_expiry("k", Duration::from_secs(5)).await,
            Err(StoreError::NotACounter(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_and_ping() {
        let (_clock, store) = store();
        store.set_with_ttl("k", "v", Duration::from_secs(5)).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.ping().await.is_ok());
        assert_eq!(store.backend(), "memory");
    }

    #[tokio::test]
    async fn test_unread_expired_keys_are_swept() {
        let (clock, store) = store();
        let ttl = Duration::from_secs(60);

        for window in 0..1_000 {
            store
                .incr_with_expiry(&format!("rl:client:{window}"), ttl)
                .await
                .unwrap();
            clock.advance(ttl);
        }

        assert!(store.stored_len() <= SWEEP_EVERY as usize);
        assert!(store.keys().is_empty());
        assert_eq!(store.stored_len(), 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_entries() {
        let (clock, store) = store();
        store
            .set_with_ttl("cache:live", "v", Duration::from_secs(3600))
            .await
            .unwrap();

        for i in 0..(SWEEP_EVERY * 3) {
            store
                .set_with_ttl(&format!("cache:short:{i}"), "v", Duration::from_secs(1))
                .await
                .unwrap();
            clock.advance(Duration::from_secs(2));
        }

        assert!(store.stored_len() <= SWEEP_EVERY as usize + 1);
        assert_eq!(store.get("cache:live").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .incr_with_expiry("burst", Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=50).collect::<Vec<u64>>());
    }
}
