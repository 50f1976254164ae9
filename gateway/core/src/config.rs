//! Gateway Configuration
//!
//! Settings are layered, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config`), missing files fall back to defaults
//! 3. `GATEWAY_*` environment variables
//! 4. Command-line flags (applied by the daemon)
//!
//! Example file:
//!
//! ```toml
//! listen_addr = "0.0.0.0:8000"
//!
//! [rate_limit]
//! per_hour = 3600
//! burst = 100
//! enabled = true
//!
//! [stream]
//! snapshot_frame_limit = 10
//! retry_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rate_limit::RateLimitConfig;

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: toml::de::Error,
    },
}

/// Streaming session settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frames a snapshot session sends before completing on its own
    pub snapshot_frame_limit: usize,

    /// Reconnect delay advertised to clients in the preamble
    pub retry_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            snapshot_frame_limit: 10,
            retry_ms: 1000,
        }
    }
}

impl StreamConfig {
    /// Set the snapshot frame limit
    #[must_use]
    pub fn with_snapshot_frame_limit(mut self, limit: usize) -> Self {
        self.snapshot_frame_limit = limit;
        self
    }

    /// Reconnect delay as a duration
    #[must_use]
    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }
}

/// Top-level gateway configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Socket address the HTTP server binds to
    pub listen_addr: String,

    /// Per-client request budget
    pub rate_limit: RateLimitConfig,

    /// Streaming session settings
    pub stream: StreamConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            rate_limit: RateLimitConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by environment variables
    ///
    /// Environment variables:
    /// - `GATEWAY_LISTEN_ADDR`: Listen address
    /// - `GATEWAY_RATE_LIMIT`: "0" or "false" to disable rate limiting
    /// - `GATEWAY_RATE_LIMIT_PER_HOUR`: Requests per hour per client
    /// - `GATEWAY_RATE_LIMIT_BURST`: Burst size
    /// - `GATEWAY_SNAPSHOT_FRAME_LIMIT`: Frames per snapshot stream
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load from a TOML file, then apply environment overrides
    ///
    /// A path that does not exist yields the defaults.
    pub fn load_from_path(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::parse_file(path)?,
            Some(path) => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("GATEWAY_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Ok(v) = std::env::var("GATEWAY_RATE_LIMIT") {
            self.rate_limit.enabled = v != "0" && v.to_lowercase() != "false";
        }
        self.rate_limit.per_hour = std::env::var("GATEWAY_RATE_LIMIT_PER_HOUR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.rate_limit.per_hour);
        self.rate_limit.burst = std::env::var("GATEWAY_RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.rate_limit.burst);
        self.stream.snapshot_frame_limit = std::env::var("GATEWAY_SNAPSHOT_FRAME_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.stream.snapshot_frame_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.stream.snapshot_frame_limit, 10);
        assert_eq!(config.stream.retry(), Duration::from_secs(1));
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn test_parse_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"
listen_addr = "0.0.0.0:9000"

[stream]
snapshot_frame_limit = 3
"#,
        )
        .unwrap();

        let config = GatewayConfig::parse_file(file.path()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.stream.snapshot_frame_limit, 3);
        assert_eq!(config.stream.retry_ms, 1000);
        assert_eq!(config.rate_limit, RateLimitConfig::default());
    }

    #[test]
    fn test_parse_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"listen_addr = [").unwrap();

        let err = GatewayConfig::parse_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = Path::new("/nonexistent/gateway.toml");
        let config = GatewayConfig::load_from_path(Some(path)).unwrap();
        assert_eq!(config.stream, StreamConfig::default());
    }
}
