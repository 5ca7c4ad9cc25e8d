pub mod app;
pub mod config;
pub mod logging;

pub use app::{Collector, AGGREGATION_TIER_NAME, DB_STATUS_NAME};
pub use config::{Config, ConfigError, DatabaseConfig, ProbeConfig};
pub use logging::init_logging;
