use std::sync::{Arc, RwLock};
use std::time::Instant;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry};
use serde::{Deserialize, Serialize};
use slipway_common::AppConfig;
use slipway_rate_limit::{BucketStore, PlanTable};
use slipway_store::KeyValueStore;

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AppState>;

/// Central application state: configuration, the shared store handle, the
/// bucket store built on it, the plan table, and metrics.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub buckets: BucketStore,
    pub plans: PlanTable,
    pub metrics: GatewayMetrics,
    pub deployments: RwLock<Vec<DeploymentRecord>>,
    pub start_time: Instant,
}

/// Prometheus metrics collected by the gateway.
pub struct GatewayMetrics {
    pub registry: Registry,
    pub requests_total: IntCounter,
    pub admissions_allowed: IntCounter,
    pub admissions_denied: IntCounter,
    pub admission_errors: IntCounter,
    pub store_unavailable_total: IntCounter,
    /// Health latch of the shared store, refreshed on scrape.
    pub store_ready: IntGauge,
    pub request_duration: HistogramVec,
}

/// A queued deployment. Persistence and the build worker live elsewhere;
/// the gateway only records what it accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub project: String,
    pub status: String,
    pub created_at_ms: i64,
}

impl GatewayMetrics {
    /// Create a new GatewayMetrics instance with all counters and the
    /// histogram registered against a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "gateway_requests_total",
            "Total number of requests seen by the admission gate",
        ))
        .expect("failed to create requests_total counter");

        let admissions_allowed = IntCounter::with_opts(Opts::new(
            "gateway_admissions_allowed",
            "Total number of requests admitted",
        ))
        .expect("failed to create admissions_allowed counter");

        let admissions_denied = IntCounter::with_opts(Opts::new(
            "gateway_admissions_denied",
            "Total number of requests rejected with 429",
        ))
        .expect("failed to create admissions_denied counter");

        let admission_errors = IntCounter::with_opts(Opts::new(
            "gateway_admission_errors",
            "Total number of admission checks that failed internally",
        ))
        .expect("failed to create admission_errors counter");

        let store_unavailable_total = IntCounter::with_opts(Opts::new(
            "gateway_store_unavailable_total",
            "Total number of admission checks that hit an unavailable store",
        ))
        .expect("failed to create store_unavailable_total counter");

        let store_ready = IntGauge::with_opts(Opts::new(
            "gateway_store_ready",
            "Whether the shared rate limit store is reachable (1) or unavailable (0)",
        ))
        .expect("failed to create store_ready gauge");

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Request processing duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["method", "status"],
        )
        .expect("failed to create request_duration histogram");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("failed to register requests_total");
        registry
            .register(Box::new(admissions_allowed.clone()))
            .expect("failed to register admissions_allowed");
        registry
            .register(Box::new(admissions_denied.clone()))
            .expect("failed to register admissions_denied");
        registry
            .register(Box::new(admission_errors.clone()))
            .expect("failed to register admission_errors");
        registry
            .register(Box::new(store_unavailable_total.clone()))
            .expect("failed to register store_unavailable_total");
        registry
            .register(Box::new(store_ready.clone()))
            .expect("failed to register store_ready");
        registry
            .register(Box::new(request_duration.clone()))
            .expect("failed to register request_duration");

        Self {
            registry,
            requests_total,
            admissions_allowed,
            admissions_denied,
            admission_errors,
            store_unavailable_total,
            store_ready,
            request_duration,
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Create a new AppState from the given configuration and store.
    pub fn new(config: AppConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let buckets = BucketStore::new(store.clone(), &config.store);
        let plans = PlanTable::new(&config.rate_limit);

        Self {
            config,
            store,
            buckets,
            plans,
            metrics: GatewayMetrics::new(),
            deployments: RwLock::new(Vec::new()),
            start_time: Instant::now(),
        }
    }
}
