/// Persistent state of a single token bucket.
///
/// `capacity` and `rate` are carried in the bucket itself so a concurrent
/// writer with a different policy view still reads the authoritative
/// limits.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Current credit, `0 <= tokens <= capacity`.
    pub tokens: f64,
    /// Wall-clock milliseconds since the epoch of the last refill.
    pub last_refill_ms: i64,
    /// Maximum and initial token count (burst size).
    pub capacity: f64,
    /// Tokens added per second.
    pub rate: f64,
}

impl Bucket {
    /// A freshly created bucket: full, refilled now.
    pub fn full(capacity: f64, rate: f64, now_ms: i64) -> Self {
        Self {
            tokens: capacity,
            last_refill_ms: now_ms,
            capacity,
            rate,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Whole tokens left after this check; 0 when denied.
    pub remaining: u64,
    /// Seconds until one token will be available; 0 when allowed.
    pub retry_after_secs: u64,
}

/// Refill `bucket` up to `now_ms` and try to consume one token.
///
/// Pure function of its inputs. Tokens stay real-valued internally so
/// slow refill rates are not lost to truncation; `remaining` reports the
/// floor. The refill timestamp advances on denial too, and never moves
/// backwards: a `now_ms` behind the stored timestamp means zero elapsed
/// time, not a negative refill.
pub fn refill_and_take(bucket: &Bucket, now_ms: i64) -> (Bucket, Decision) {
    let elapsed_secs = (now_ms - bucket.last_refill_ms).max(0) as f64 / 1000.0;
    let refilled = (bucket.tokens + elapsed_secs * bucket.rate).min(bucket.capacity);

    let (tokens, decision) = if refilled >= 1.0 {
        let tokens = refilled - 1.0;
        (
            tokens,
            Decision {
                allowed: true,
                remaining: tokens.floor() as u64,
                retry_after_secs: 0,
            },
        )
    } else {
        let wait = ((1.0 - refilled) / bucket.rate).ceil();
        (
            refilled,
            Decision {
                allowed: false,
                remaining: 0,
                retry_after_secs: wait as u64,
            },
        )
    };

    let next = Bucket {
        tokens,
        last_refill_ms: now_ms.max(bucket.last_refill_ms),
        capacity: bucket.capacity,
        rate: bucket.rate,
    };

    (next, decision)
}
