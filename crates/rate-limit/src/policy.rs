use std::collections::HashMap;

use slipway_common::{PlanLimit, RateLimitConfig};

/// Fallback plan row for unknown or missing plan names.
const FALLBACK_PLAN: &str = "free";

/// Plan-to-limit table, injected from configuration.
#[derive(Debug, Clone)]
pub struct PlanTable {
    plans: HashMap<String, PlanLimit>,
    default_limit: PlanLimit,
}

impl PlanTable {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            plans: config.plans.clone(),
            default_limit: PlanLimit {
                capacity: config.default_capacity,
                rate: config.default_rate,
            },
        }
    }

    /// Resolve a plan name to its bucket limits.
    ///
    /// Unknown or missing names fall back to the `free` row; a table
    /// without a `free` row falls back to the configured defaults.
    pub fn resolve(&self, plan: Option<&str>) -> PlanLimit {
        let name = plan
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_PLAN);

        if let Some(limit) = self.plans.get(name) {
            return *limit;
        }

        self.plans
            .get(FALLBACK_PLAN)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

/// Normalize a client address for use as a bucket identifier.
///
/// Strips an IPv4-mapped-IPv6 prefix and lowercases, so `::ffff:10.0.0.1`
/// and `10.0.0.1` share one bucket.
pub fn normalize_client_addr(addr: &str) -> String {
    let addr = addr.trim().to_ascii_lowercase();
    match addr.strip_prefix("::ffff:") {
        Some(mapped) => mapped.to_string(),
        None => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PlanTable {
        PlanTable::new(&RateLimitConfig::default())
    }

    #[test]
    fn resolves_builtin_rows() {
        let table = table();

        let free = table.resolve(Some("free"));
        assert_eq!((free.capacity, free.rate), (10.0, 0.1));

        let pro = table.resolve(Some("pro"));
        assert_eq!((pro.capacity, pro.rate), (30.0, 0.5));

        let enterprise = table.resolve(Some("enterprise"));
        assert_eq!((enterprise.capacity, enterprise.rate), (60.0, 1.0));
    }

    #[test]
    fn unknown_or_missing_plan_falls_back_to_free() {
        let table = table();

        for plan in [None, Some("platinum"), Some(""), Some("   ")] {
            let limit = table.resolve(plan);
            assert_eq!((limit.capacity, limit.rate), (10.0, 0.1));
        }
    }

    #[test]
    fn table_without_free_row_uses_defaults() {
        let mut config = RateLimitConfig::default();
        config.plans.clear();
        config.default_capacity = 5.0;
        config.default_rate = 2.0;

        let table = PlanTable::new(&config);
        let limit = table.resolve(Some("anything"));
        assert_eq!((limit.capacity, limit.rate), (5.0, 2.0));
    }

    #[test]
    fn normalizes_mapped_and_mixed_case_addresses() {
        assert_eq!(normalize_client_addr("::ffff:10.0.0.1"), "10.0.0.1");
        assert_eq!(normalize_client_addr("::FFFF:10.0.0.1"), "10.0.0.1");
        assert_eq!(normalize_client_addr("2001:DB8::1"), "2001:db8::1");
        assert_eq!(normalize_client_addr(" 10.0.0.1 "), "10.0.0.1");
    }
}
