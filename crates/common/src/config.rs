use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level platform configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Connection settings for the shared key/value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Prepended to every bucket key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Idle horizon after which untouched buckets expire.
    #[serde(default = "default_key_ttl")]
    pub key_ttl_secs: i64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,
    /// Reconnection attempts before the client latches unavailable.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            key_prefix: default_key_prefix(),
            key_ttl_secs: default_key_ttl(),
            connect_timeout_secs: default_connect_timeout(),
            op_timeout_secs: default_op_timeout(),
            max_retries: default_max_retries(),
            health_interval_secs: default_health_interval(),
        }
    }
}

/// Admission-gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pass requests through when the store is unavailable instead of
    /// rejecting with 503. Production keeps this off.
    #[serde(default)]
    pub fail_open: bool,
    /// Used when no plan row matches.
    #[serde(default = "default_capacity")]
    pub default_capacity: f64,
    #[serde(default = "default_rate")]
    pub default_rate: f64,
    #[serde(default = "default_plans")]
    pub plans: HashMap<String, PlanLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_open: false,
            default_capacity: default_capacity(),
            default_rate: default_rate(),
            plans: default_plans(),
        }
    }
}

/// Per-plan bucket limits: burst size and sustained refill rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlanLimit {
    pub capacity: f64,
    /// Tokens added per second.
    pub rate: f64,
}

// Default value helpers
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}
fn default_key_ttl() -> i64 {
    86_400
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_op_timeout() -> u64 {
    5
}
fn default_max_retries() -> usize {
    3
}
fn default_health_interval() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_capacity() -> f64 {
    10.0
}
fn default_rate() -> f64 {
    0.1
}
fn default_plans() -> HashMap<String, PlanLimit> {
    HashMap::from([
        (
            "free".to_string(),
            PlanLimit {
                capacity: 10.0,
                rate: 0.1,
            },
        ),
        (
            "pro".to_string(),
            PlanLimit {
                capacity: 30.0,
                rate: 0.5,
            },
        ),
        (
            "enterprise".to_string(),
            PlanLimit {
                capacity: 60.0,
                rate: 1.0,
            },
        ),
    ])
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.listen.is_empty() {
            anyhow::bail!("server.listen must not be empty");
        }

        if self.store.key_ttl_secs <= 0 {
            anyhow::bail!("store.key_ttl_secs must be positive");
        }

        if !(self.rate_limit.default_capacity.is_finite()
            && self.rate_limit.default_capacity > 0.0
            && self.rate_limit.default_rate.is_finite()
            && self.rate_limit.default_rate > 0.0)
        {
            anyhow::bail!("rate_limit defaults must be positive finite numbers");
        }

        for (name, limit) in &self.rate_limit.plans {
            if !(limit.capacity.is_finite()
                && limit.capacity > 0.0
                && limit.rate.is_finite()
                && limit.rate > 0.0)
            {
                anyhow::bail!(
                    "plan '{}' has invalid limits (capacity={}, rate={})",
                    name,
                    limit.capacity,
                    limit.rate
                );
            }
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_the_builtin_plan_table() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let free = config.rate_limit.plans.get("free").unwrap();
        assert_eq!(free.capacity, 10.0);
        assert_eq!(free.rate, 0.1);

        let enterprise = config.rate_limit.plans.get("enterprise").unwrap();
        assert_eq!(enterprise.capacity, 60.0);
        assert_eq!(enterprise.rate, 1.0);
    }

    #[test]
    fn rejects_non_positive_plan_limits() {
        let mut config = AppConfig::default();
        config.rate_limit.plans.insert(
            "broken".to_string(),
            PlanLimit {
                capacity: 0.0,
                rate: 1.0,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let yaml = r#"
server:
  listen: "127.0.0.1:9000"
rate_limit:
  fail_open: true
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert!(config.rate_limit.fail_open);
        assert_eq!(config.store.key_prefix, "ratelimit:");
        assert_eq!(config.store.key_ttl_secs, 86_400);
    }
}
