use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use rand::Rng;
use slipway_common::{SlipwayError, SlipwayResult, StoreConfig};
use slipway_store::KeyValueStore;
use tracing::{debug, warn};

use crate::bucket::{refill_and_take, Bucket, Decision};

// On-wire hash field names. These are the storage contract; every server
// instance reads and writes the same fields.
pub const FIELD_TOKENS: &str = "tokens";
pub const FIELD_LAST_REFILL: &str = "lastRefill";
pub const FIELD_BUCKET_SIZE: &str = "bucketSize";
pub const FIELD_REFILL_RATE: &str = "refillRate";

const BUCKET_FIELDS: [&str; 4] = [
    FIELD_TOKENS,
    FIELD_LAST_REFILL,
    FIELD_BUCKET_SIZE,
    FIELD_REFILL_RATE,
];

/// Owns the read-modify-write cycle for one bucket per identifier.
///
/// The load and the write are deliberately not a compare-and-set.
/// Concurrent checks for the same identifier race, and the refill engine
/// bounds that race: the last writer's state never exceeds capacity and
/// never goes negative.
pub struct BucketStore {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
    ttl_secs: i64,
    /// Buckets whose corruption has already been logged.
    warned: DashSet<String>,
}

impl BucketStore {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &StoreConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            ttl_secs: config.key_ttl_secs,
            warned: DashSet::new(),
        }
    }

    /// Run one admission check for `identifier` at `now_ms`, creating the
    /// bucket if absent, and persist the outcome.
    ///
    /// `capacity` and `rate` are the caller's policy view; they seed a
    /// new bucket but never overwrite a live one, so a racing caller with
    /// a stale policy cannot shrink a bucket mid-operation.
    pub async fn acquire(
        &self,
        identifier: &str,
        capacity: f64,
        rate: f64,
        now_ms: i64,
    ) -> SlipwayResult<Decision> {
        if identifier.is_empty() {
            return Err(SlipwayError::InvalidRequest(
                "empty rate limit identifier".to_string(),
            ));
        }
        if !(capacity.is_finite() && capacity > 0.0 && rate.is_finite() && rate > 0.0) {
            return Err(SlipwayError::PolicyMisconfig(format!(
                "capacity={capacity}, rate={rate}"
            )));
        }

        let key = self.key(identifier);

        let raw = self.load(&key).await?;
        let (current, fresh) = self.decode(&key, &raw, capacity, rate, now_ms);
        let (next, decision) = refill_and_take(&current, now_ms);
        self.commit(&key, &Self::encode(&next, fresh)).await?;

        debug!(
            identifier,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "admission check"
        );

        Ok(decision)
    }

    /// Delete the bucket for `identifier`. The next admission check
    /// recreates it full, from the then-current policy.
    pub async fn reset(&self, identifier: &str) -> SlipwayResult<()> {
        let key = self.key(identifier);
        self.store.delete(&key).await?;
        self.warned.remove(&key);
        debug!(identifier, "bucket reset");
        Ok(())
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}{}", self.key_prefix, identifier)
    }

    async fn load(&self, key: &str) -> SlipwayResult<Vec<Option<String>>> {
        match self.store.hash_get(key, &BUCKET_FIELDS).await {
            Err(e) if e.is_transient() => {
                backoff().await;
                match self.store.hash_get(key, &BUCKET_FIELDS).await {
                    Err(e2) if e2.is_transient() => {
                        warn!(key, error = %e2, "bucket load failed after retry");
                        Err(SlipwayError::StoreUnavailable)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn commit(&self, key: &str, fields: &[(&str, String)]) -> SlipwayResult<()> {
        match self.store.hash_set_expire(key, fields, self.ttl_secs).await {
            Err(e) if e.is_transient() => {
                backoff().await;
                match self.store.hash_set_expire(key, fields, self.ttl_secs).await {
                    Err(e2) if e2.is_transient() => {
                        warn!(key, error = %e2, "bucket write failed after retry");
                        Err(SlipwayError::StoreUnavailable)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Rebuild a [`Bucket`] from raw hash values. Returns the bucket and
    /// whether it is newly created (absent from the store).
    ///
    /// Stored `bucketSize`/`refillRate` win over the caller's policy for
    /// a live bucket. Unparsable fields are replaced with the caller's
    /// policy values and logged once per bucket.
    fn decode(
        &self,
        key: &str,
        raw: &[Option<String>],
        capacity: f64,
        rate: f64,
        now_ms: i64,
    ) -> (Bucket, bool) {
        if raw.iter().all(Option::is_none) {
            return (Bucket::full(capacity, rate, now_ms), true);
        }

        let stored_capacity = self.field_f64(key, FIELD_BUCKET_SIZE, raw.get(2), capacity, true);
        let stored_rate = self.field_f64(key, FIELD_REFILL_RATE, raw.get(3), rate, true);
        let tokens = self.field_f64(key, FIELD_TOKENS, raw.get(0), stored_capacity, false);
        let last_refill_ms = self.field_i64(key, FIELD_LAST_REFILL, raw.get(1), now_ms);

        (
            Bucket {
                tokens,
                last_refill_ms,
                capacity: stored_capacity,
                rate: stored_rate,
            },
            false,
        )
    }

    fn field_f64(
        &self,
        key: &str,
        field: &'static str,
        value: Option<&Option<String>>,
        fallback: f64,
        require_positive: bool,
    ) -> f64 {
        let value = value.and_then(Option::as_deref);
        let Some(value) = value else {
            return fallback;
        };

        let parsed = value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && if require_positive { *v > 0.0 } else { *v >= 0.0 });

        match parsed {
            Some(v) => v,
            None => {
                self.warn_corrupt(key, field);
                fallback
            }
        }
    }

    fn field_i64(
        &self,
        key: &str,
        field: &'static str,
        value: Option<&Option<String>>,
        fallback: i64,
    ) -> i64 {
        let value = value.and_then(Option::as_deref);
        let Some(value) = value else {
            return fallback;
        };

        match value.parse::<i64>().ok().filter(|v| *v >= 0) {
            Some(v) => v,
            None => {
                self.warn_corrupt(key, field);
                fallback
            }
        }
    }

    fn warn_corrupt(&self, key: &str, field: &'static str) {
        if self.warned.insert(key.to_string()) {
            let err = SlipwayError::StoreCorruption {
                key: key.to_string(),
                field,
            };
            warn!(%err, "substituting policy defaults for corrupt bucket state");
        }
    }

    fn encode(next: &Bucket, fresh: bool) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            (FIELD_TOKENS, next.tokens.to_string()),
            (FIELD_LAST_REFILL, next.last_refill_ms.to_string()),
        ];
        if fresh {
            fields.push((FIELD_BUCKET_SIZE, next.capacity.to_string()));
            fields.push((FIELD_REFILL_RATE, next.rate.to_string()));
        }
        fields
    }
}

async fn backoff() {
    let jitter = rand::thread_rng().gen_range(0..50);
    tokio::time::sleep(Duration::from_millis(25 + jitter)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_store::MemoryStore;

    const NOW: i64 = 1_700_000_000_000;

    fn bucket_store(store: Arc<MemoryStore>) -> BucketStore {
        BucketStore::new(store, &StoreConfig::default())
    }

    #[tokio::test]
    async fn first_acquire_creates_a_full_bucket() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store.clone());

        let decision = buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);

        // All four fields are written on creation, as decimal strings.
        let raw = store
            .hash_get("ratelimit:k1", &BUCKET_FIELDS)
            .await
            .unwrap();
        assert_eq!(raw[0].as_deref(), Some("9"));
        assert_eq!(raw[1].as_deref(), Some(NOW.to_string().as_str()));
        assert_eq!(raw[2].as_deref(), Some("10"));
        assert_eq!(raw[3].as_deref(), Some("0.1"));

        // TTL lands on the idle horizon.
        let ttl = store.ttl_of("ratelimit:k1").unwrap();
        assert!(ttl > Duration::from_secs(86_000));
    }

    #[tokio::test]
    async fn exhaustion_denies_with_retry_hint() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store);

        for expected in (0..10).rev() {
            let decision = buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let denied = buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_secs >= 9);
    }

    #[tokio::test]
    async fn identifiers_never_share_state() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store);

        for _ in 0..3 {
            buckets.acquire("a", 3.0, 1.0, NOW).await.unwrap();
        }
        let denied = buckets.acquire("a", 3.0, 1.0, NOW).await.unwrap();
        assert!(!denied.allowed);

        let decision = buckets.acquire("b", 3.0, 1.0, NOW).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn stored_limits_win_over_the_callers() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store.clone());

        buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap();

        // A caller with a smaller policy view cannot shrink the bucket.
        let decision = buckets.acquire("k1", 5.0, 9.9, NOW).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 8);

        // And the stored limits are untouched by the second write.
        let raw = store
            .hash_get("ratelimit:k1", &[FIELD_BUCKET_SIZE, FIELD_REFILL_RATE])
            .await
            .unwrap();
        assert_eq!(raw[0].as_deref(), Some("10"));
        assert_eq!(raw[1].as_deref(), Some("0.1"));
    }

    #[tokio::test]
    async fn corrupt_tokens_fall_back_to_policy_value() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store.clone());

        store
            .hash_set_expire(
                "ratelimit:k1",
                &[
                    (FIELD_TOKENS, "garbage".to_string()),
                    (FIELD_LAST_REFILL, NOW.to_string()),
                    (FIELD_BUCKET_SIZE, "10".to_string()),
                    (FIELD_REFILL_RATE, "0.1".to_string()),
                ],
                60,
            )
            .await
            .unwrap();

        // Tokens recover to the (stored) capacity, then one is consumed.
        let decision = buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
    }

    #[tokio::test]
    async fn negative_fields_are_treated_as_corrupt() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store.clone());

        store
            .hash_set_expire(
                "ratelimit:k1",
                &[
                    (FIELD_TOKENS, "-3".to_string()),
                    (FIELD_LAST_REFILL, "-1".to_string()),
                    (FIELD_BUCKET_SIZE, "-10".to_string()),
                    (FIELD_REFILL_RATE, "0".to_string()),
                ],
                60,
            )
            .await
            .unwrap();

        let decision = buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
    }

    #[tokio::test]
    async fn refill_after_idle_grants_one_token() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store);

        for _ in 0..10 {
            buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap();
        }
        assert!(!buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap().allowed);

        // Ten seconds at 0.1 tokens/sec refills exactly one token; it is
        // consumed by this check, leaving zero.
        let decision = buckets
            .acquire("k1", 10.0, 0.1, NOW + 10_000)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, 0);
    }

    #[tokio::test]
    async fn backwards_clock_does_not_grant_tokens() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store.clone());

        for _ in 0..10 {
            buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap();
        }

        let denied = buckets
            .acquire("k1", 10.0, 0.1, NOW - 60_000)
            .await
            .unwrap();
        assert!(!denied.allowed);

        // lastRefill must not have regressed below the stored value.
        let raw = store
            .hash_get("ratelimit:k1", &[FIELD_LAST_REFILL])
            .await
            .unwrap();
        assert_eq!(raw[0].as_deref(), Some(NOW.to_string().as_str()));
    }

    #[tokio::test]
    async fn reset_recreates_the_bucket_full() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store);

        for _ in 0..5 {
            buckets.acquire("k1", 5.0, 1.0, NOW).await.unwrap();
        }
        assert!(!buckets.acquire("k1", 5.0, 1.0, NOW).await.unwrap().allowed);

        buckets.reset("k1").await.unwrap();

        let decision = buckets.acquire("k1", 5.0, 1.0, NOW).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn empty_identifier_is_rejected_without_store_access() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let buckets = bucket_store(store);

        let err = buckets.acquire("", 10.0, 0.1, NOW).await.unwrap_err();
        assert!(matches!(err, SlipwayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn non_positive_policy_is_misconfiguration() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store);

        for (capacity, rate) in [(0.0, 1.0), (10.0, 0.0), (f64::NAN, 1.0), (10.0, f64::INFINITY)] {
            let err = buckets.acquire("k1", capacity, rate, NOW).await.unwrap_err();
            assert!(matches!(err, SlipwayError::PolicyMisconfig(_)));
        }
    }

    #[tokio::test]
    async fn unavailable_store_propagates() {
        let store = Arc::new(MemoryStore::new());
        let buckets = bucket_store(store.clone());
        store.set_available(false);

        let err = buckets.acquire("k1", 10.0, 0.1, NOW).await.unwrap_err();
        assert!(matches!(err, SlipwayError::StoreUnavailable));
    }
}
