//! Application configuration.
//!
//! One [`AppConfig`] record is assembled at startup by [`ConfigLoader`]
//! (defaults, optional TOML file, environment) and handed to every component
//! that needs a section of it.

mod loader;
mod types;

pub use loader::{generate_sample_config, ConfigLoader};
pub use types::{
    AnalyticsConfig, AppConfig, AwsConfig, Catalog, InsightsConfig, McpConfig, ServerConfig, StoreBackend,
    StoreConfig, TableEntry, WarehouseConfig,
};
