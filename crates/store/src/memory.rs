use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use slipway_common::{SlipwayError, SlipwayResult};

use crate::KeyValueStore;

struct Entry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process store backend with the same hash-and-TTL semantics as the
/// Redis backend. Used by tests and local development; the availability
/// flag lets tests exercise the degradation policy without a network.
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Flip the health signal, simulating a store outage or recovery.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Remaining TTL of `key`, if the key exists and carries one.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let data = self.data.lock().expect("memory store lock poisoned");
        data.get(key)
            .filter(|entry| !entry.expired())
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn check_available(&self) -> SlipwayResult<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(SlipwayError::StoreUnavailable)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn hash_get(&self, key: &str, fields: &[&str]) -> SlipwayResult<Vec<Option<String>>> {
        self.check_available()?;

        let mut data = self.data.lock().expect("memory store lock poisoned");

        if data.get(key).is_some_and(Entry::expired) {
            data.remove(key);
        }

        let entry = data.get(key);
        Ok(fields
            .iter()
            .map(|field| entry.and_then(|e| e.fields.get(*field).cloned()))
            .collect())
    }

    async fn hash_set_expire(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl_secs: i64,
    ) -> SlipwayResult<()> {
        self.check_available()?;

        let mut data = self.data.lock().expect("memory store lock poisoned");

        if data.get(key).is_some_and(Entry::expired) {
            data.remove(key);
        }

        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            fields: HashMap::new(),
            expires_at: None,
        });
        for (field, value) in fields {
            entry.fields.insert((*field).to_string(), value.clone());
        }
        entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs.max(0) as u64));

        Ok(())
    }

    async fn delete(&self, key: &str) -> SlipwayResult<()> {
        self.check_available()?;

        let mut data = self.data.lock().expect("memory store lock poisoned");
        data.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_key_reads_as_all_none() {
        let store = MemoryStore::new();
        let values = store.hash_get("missing", &["a", "b"]).await.unwrap();
        assert_eq!(values, vec![None, None]);
    }

    #[tokio::test]
    async fn writes_then_reads_fields_in_order() {
        let store = MemoryStore::new();
        store
            .hash_set_expire("k", &[("a", "1".to_string()), ("b", "2".to_string())], 60)
            .await
            .unwrap();

        let values = store.hash_get("k", &["b", "a", "c"]).await.unwrap();
        assert_eq!(
            values,
            vec![Some("2".to_string()), Some("1".to_string()), None]
        );
        assert!(store.ttl_of("k").is_some());
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let store = MemoryStore::new();
        store
            .hash_set_expire("k", &[("a", "1".to_string())], 0)
            .await
            .unwrap();

        let values = store.hash_get("k", &["a"]).await.unwrap();
        assert_eq!(values, vec![None]);
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let store = MemoryStore::new();
        store
            .hash_set_expire("k", &[("a", "1".to_string())], 60)
            .await
            .unwrap();
        store.delete("k").await.unwrap();

        let values = store.hash_get("k", &["a"]).await.unwrap();
        assert_eq!(values, vec![None]);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_operations() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(!store.available());

        let err = store.hash_get("k", &["a"]).await.unwrap_err();
        assert!(matches!(err, SlipwayError::StoreUnavailable));

        store.set_available(true);
        assert!(store.hash_get("k", &["a"]).await.is_ok());
    }
}
