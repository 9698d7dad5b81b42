//! Command-line overrides.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Command-line arguments shared by lxnet hosts.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "lxnet-echo", about = "lxnet echo server and client")]
pub struct CliArgs {
    /// Port to listen on (or to connect to with `--connect`).
    #[arg(long)]
    pub port: Option<u16>,

    /// Connect to this address instead of listening.
    #[arg(long)]
    pub connect: Option<String>,

    /// I/O worker threads (0 = one per CPU).
    #[arg(long)]
    pub threads: Option<i32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref addr) = args.connect {
            self.server.connect_address = addr.clone();
        }
        if let Some(threads) = args.threads {
            self.runtime.thread_count = threads;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            port: Some(9100),
            connect: Some("10.0.0.2".to_string()),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.connect_address, "10.0.0.2");
        // Non-overridden fields retain defaults
        assert_eq!(config.runtime.thread_count, 0);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from(["lxnet-echo", "--port", "9001", "--log-level", "debug"]);
        assert_eq!(args.port, Some(9001));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.connect.is_none());
    }
}
