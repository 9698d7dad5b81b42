//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use lxnet::{DEFAULT_MAX_MSG_LEN, NetInit};

use crate::error::ConfigError;

/// File name of the persisted configuration.
pub const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Receive buffer classes.
    pub buffers: BuffersConfig,
    /// Handle pool sizes.
    pub pools: PoolsConfig,
    /// I/O runtime settings.
    pub runtime: RuntimeConfig,
    /// Message and backpressure limits.
    pub limits: LimitsConfig,
    /// Listening and outgoing endpoints.
    pub server: ServerConfig,
    /// Logging and diagnostics.
    pub debug: DebugConfig,
}

/// Receive buffer classes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuffersConfig {
    /// Size of a big receive buffer in bytes.
    pub bigbuf_size: usize,
    /// Number of big receive buffers.
    pub bigbuf_count: usize,
    /// Size of a small receive buffer in bytes.
    pub smallbuf_size: usize,
    /// Number of small receive buffers.
    pub smallbuf_count: usize,
}

/// Handle pool sizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolsConfig {
    /// Listener slots.
    pub listener_capacity: usize,
    /// Connection slots.
    pub socket_capacity: usize,
    /// Grow pools past their capacity instead of failing.
    pub grow: bool,
}

/// I/O runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads (0 or less = one per CPU).
    pub thread_count: i32,
    /// Interval between `Net::run` calls in milliseconds.
    pub run_interval_ms: u64,
}

/// Message and backpressure limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Exclusive upper bound on a message in bytes.
    pub max_msg_len: usize,
    /// Receive threshold applied to new connections (0 or less = unlimited).
    pub recv_critical: i64,
    /// Send threshold applied to new connections (0 = unlimited).
    pub send_critical: usize,
}

/// Listening and outgoing endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Accept backlog.
    pub backlog: i32,
    /// Address to connect to in client mode.
    pub connect_address: String,
    /// Use the big receive-buffer class for accepted connections.
    pub big_buffers: bool,
}

/// Logging and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level filter (e.g. "debug", "info,lxnet=trace").
    pub log_level: String,
    /// Log connection-level errors.
    pub enable_error_log: bool,
    /// Seconds between statistics dumps (0 = never).
    pub stats_interval_secs: u64,
}

// --- Default implementations ---

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            bigbuf_size: 16 * 1024,
            bigbuf_count: 64,
            smallbuf_size: 4 * 1024,
            smallbuf_count: 1024,
        }
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            listener_capacity: 8,
            socket_capacity: 1024,
            grow: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_count: 0,
            run_interval_ms: 10,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            recv_critical: 0,
            send_critical: 0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            backlog: 128,
            connect_address: "127.0.0.1".to_string(),
            big_buffers: false,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_error_log: true,
            stats_interval_secs: 5,
        }
    }
}

// --- Conversion ---

impl Config {
    /// Sizing for `Net::init`.
    pub fn net_init(&self) -> NetInit {
        NetInit {
            bigbuf_size: self.buffers.bigbuf_size,
            bigbuf_count: self.buffers.bigbuf_count,
            smallbuf_size: self.buffers.smallbuf_size,
            smallbuf_count: self.buffers.smallbuf_count,
            listener_capacity: self.pools.listener_capacity,
            socket_capacity: self.pools.socket_capacity,
            thread_count: self.runtime.thread_count,
            max_msg_len: self.limits.max_msg_len,
            grow_pools: self.pools.grow,
        }
    }

    /// Per-user config directory (`<config dir>/lxnet`), if the platform has one.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lxnet"))
    }
}

// --- Validation ---

impl Config {
    /// Reject values `Net::init` or the host loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.buffers.bigbuf_size == 0 {
            return invalid("buffers.bigbuf_size", "must be non-zero");
        }
        if self.buffers.smallbuf_size == 0 {
            return invalid("buffers.smallbuf_size", "must be non-zero");
        }
        if self.limits.max_msg_len <= lxnet::HEADER_SIZE + 1 {
            return invalid("limits.max_msg_len", "leaves no room for a payload");
        }
        if u32::try_from(self.limits.max_msg_len).is_err() {
            return invalid("limits.max_msg_len", "does not fit the 4-byte length header");
        }
        if self.runtime.run_interval_ms == 0 {
            return invalid("runtime.run_interval_ms", "must be at least 1");
        }
        Ok(())
    }
}

// --- Load / Save / Reload ---

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&contents).map_err(ConfigError::Parse)
}

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = read_config(&config_path)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::Write {
            path: config_path.clone(),
            source,
        })
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    ///
    /// A changed file that fails validation is an error; the caller keeps the
    /// current config.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = read_config(&config_dir.join(CONFIG_FILE))?;
        if &new_config == self {
            return Ok(None);
        }
        new_config.validate()?;
        log::info!("Config reloaded with changes");
        Ok(Some(new_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let ron_str =
            ron::ser::to_string_pretty(&Config::default(), ron::ser::PrettyConfig::new()).unwrap();
        assert!(ron_str.contains("socket_capacity: 1024"));
        assert!(ron_str.contains("max_msg_len: 65536"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = ron::from_str("(pools: (socket_capacity: 64))").unwrap();
        assert_eq!(config.pools.socket_capacity, 64);
        assert_eq!(config.pools.listener_capacity, 8);
        assert_eq!(config.limits, LimitsConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_net_init_mapping() {
        let mut config = Config::default();
        config.buffers.bigbuf_size = 4096;
        config.buffers.bigbuf_count = 4;
        config.buffers.smallbuf_size = 1024;
        config.buffers.smallbuf_count = 8;
        config.pools.listener_capacity = 8;
        config.pools.socket_capacity = 64;
        config.runtime.thread_count = 2;

        let init = config.net_init();
        assert_eq!(init, NetInit::new(4096, 4, 1024, 8, 8, 64, 2));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.port = 9100;
        config.limits.send_critical = 1 << 20;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.limits.recv_critical = 8192;
        modified.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap();
        assert_eq!(reloaded.map(|c| c.limits.recv_critical), Some(8192));
        assert!(modified.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validation_names_field() {
        let mut config = Config::default();
        config.limits.max_msg_len = 4;
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "limits.max_msg_len"),
            other => panic!("expected invalid field, got {other:?}"),
        }
    }

    #[test]
    fn test_reload_rejects_invalid_change() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let mut broken = config.clone();
        broken.runtime.run_interval_ms = 0;
        broken.save(dir.path()).unwrap();

        assert!(matches!(
            config.reload(dir.path()),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
