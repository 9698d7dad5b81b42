//! Configuration for lxnet hosts.
//!
//! Settings persist to disk as RON and map onto `lxnet::NetInit`. Supports
//! CLI overrides via clap and hot-reload detection.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    BuffersConfig, CONFIG_FILE, Config, DebugConfig, LimitsConfig, PoolsConfig, RuntimeConfig,
    ServerConfig,
};
pub use error::ConfigError;
