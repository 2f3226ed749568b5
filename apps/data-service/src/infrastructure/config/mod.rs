//! Configuration Module
//!
//! Configuration loading and dependency injection for the data service.

mod context;
mod settings;

pub use context::{MetadataStatus, ServiceContext, ServiceStatus, StreamStatus};
pub use settings::{
    ConfigError, DISCOVERY_FILE_NAME, ExchangeSettings, MetadataSettings, ResourceSettings,
    ServerSettings, ServiceConfig,
};
pub(crate) use settings::{parse_env_bool, parse_env_string};
