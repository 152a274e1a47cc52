use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use slipway_common::{SlipwayError, SlipwayResult, StoreConfig};
use tracing::{info, trace, warn};

use crate::KeyValueStore;

/// Production store backend over one process-wide Redis connection.
///
/// The underlying [`ConnectionManager`] reconnects on transient failures
/// (connection refused, timeout, replica promotion) up to the configured
/// attempt count. Every operation additionally runs under the configured
/// response deadline; on expiry it fails with a retryable error and the
/// health latch flips to unavailable until a later operation or ping
/// succeeds.
pub struct RedisStore {
    manager: ConnectionManager,
    healthy: AtomicBool,
    op_timeout: Duration,
}

impl RedisStore {
    /// Establish the shared connection. Fails if the store cannot be
    /// reached within the connect timeout.
    pub async fn connect(config: &StoreConfig) -> SlipwayResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| SlipwayError::StoreTransient(e.to_string()))?;

        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let op_timeout = Duration::from_secs(config.op_timeout_secs);

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(connect_timeout)
            .set_response_timeout(op_timeout)
            .set_number_of_retries(config.max_retries);

        let manager = tokio::time::timeout(
            connect_timeout,
            ConnectionManager::new_with_config(client, manager_config),
        )
        .await
        .map_err(|_| SlipwayError::StoreTransient("store connect timed out".to_string()))?
        .map_err(|e| SlipwayError::StoreTransient(e.to_string()))?;

        info!(url = %config.url, "connected to shared store");

        Ok(Self {
            manager,
            healthy: AtomicBool::new(true),
            op_timeout,
        })
    }

    /// Issue a PING and update the health latch with the outcome.
    pub async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        let result: SlipwayResult<String> = self
            .run("ping", async move { redis::cmd("PING").query_async(&mut conn).await })
            .await;
        result.is_ok()
    }

    /// Spawn a background task that pings the store on an interval so the
    /// health latch recovers without waiting for request traffic.
    pub fn start_health_task(self: &Arc<Self>, interval: Duration) {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let ok = store.ping().await;
                trace!(ok, "store health ping");
            }
        });
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> SlipwayResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => {
                self.mark(true);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.mark(false);
                warn!(op, error = %e, "store operation failed");
                Err(SlipwayError::StoreTransient(e.to_string()))
            }
            Err(_) => {
                self.mark(false);
                warn!(op, timeout_ms = self.op_timeout.as_millis() as u64, "store operation timed out");
                Err(SlipwayError::StoreTransient(format!("{op} timed out")))
            }
        }
    }

    fn mark(&self, healthy: bool) {
        let was = self.healthy.swap(healthy, Ordering::Relaxed);
        if was != healthy {
            if healthy {
                info!("shared store recovered");
            } else {
                warn!("shared store marked unavailable");
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn available(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    async fn hash_get(&self, key: &str, fields: &[&str]) -> SlipwayResult<Vec<Option<String>>> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(*field);
        }

        self.run("hmget", async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn hash_set_expire(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl_secs: i64,
    ) -> SlipwayResult<()> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(key, fields);
        pipe.expire(key, ttl_secs);

        self.run("hset+expire", async move { pipe.query_async(&mut conn).await })
            .await
    }

    async fn delete(&self, key: &str) -> SlipwayResult<()> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);

        self.run("del", async move { cmd.query_async(&mut conn).await })
            .await
    }
}
