pub mod config;
pub mod error;

pub use config::{AppConfig, PlanLimit, RateLimitConfig, ServerConfig, StoreConfig};
pub use error::{SlipwayError, SlipwayResult};
