pub mod range;
pub mod transport;

pub use range::RangeConfig;
pub use transport::{MultiplexingConfig, MuxMode, TransportConfig};

use crate::utils::error::{MuxError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MuxError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| MuxError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let transport = &self.transport;
        let mux = &transport.multiplexing;

        let ranges = [
            ("x_padding_bytes", transport.x_padding_bytes),
            ("sc_max_each_post_bytes", transport.sc_max_each_post_bytes),
            ("sc_max_concurrent_posts", transport.sc_max_concurrent_posts),
            ("sc_min_posts_interval_ms", transport.sc_min_posts_interval_ms),
            ("max_connection_concurrency", mux.max_connection_concurrency),
            ("max_connection_lifetime", mux.max_connection_lifetime),
        ];

        for (name, range) in ranges {
            if range.is_unset() {
                continue;
            }
            if range.from < 0 {
                return Err(MuxError::Config(format!(
                    "{} cannot be negative (from = {})",
                    name, range.from
                )));
            }
            if range.from > range.to {
                return Err(MuxError::Config(format!(
                    "{} is inverted: from {} > to {}",
                    name, range.from, range.to
                )));
            }
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(MuxError::Config(format!(
                "Invalid log format: {}. Must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let example = r#"[transport]
path = "/tunnel"

# Extra request headers sent on every upload/download request
# [transport.headers]
# Host = "cdn.example.com"

# Ranges are [from, to); leave a range out to use its default
[transport.x_padding_bytes]
from = 100
to = 1000

[transport.sc_min_posts_interval_ms]
from = 30
to = 30

[transport.multiplexing]
mode = "prefer_existing"  # Options: "disabled", "prefer_existing", "prefer_new"
max_connections = 4       # 0 = unbounded

[transport.multiplexing.max_connection_concurrency]
from = 1
to = 3

# Seconds
[transport.multiplexing.max_connection_lifetime]
from = 60
to = 90

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
format = "pretty"  # Options: "pretty", "json"
"#;

        std::fs::write(path.as_ref(), example)
            .map_err(|e| MuxError::Config(format!("Failed to write example config: {}", e)))?;

        Ok(())
    }
}
