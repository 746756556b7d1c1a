//! Configuration structures for the translating proxy.

mod error;
mod loader;

use std::path::PathBuf;

pub use error::ConfigError;
use secrecy::SecretString;
use url::Url;

/// Default keepalive comment interval while awaiting the first upstream chunk.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 10_000;
/// Default hard bound on time to terminal event.
pub const DEFAULT_TERMINAL_WATCHDOG_MS: u64 = 60_000;
/// Default ceiling on the backpressure drain wait before closing.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;
/// Default request cache byte budget (0 disables caching).
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 0;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the OpenAI-compatible backend, e.g. `http://127.0.0.1:1234/v1`.
    pub backend_base_url: Url,

    /// Credential forwarded to the backend as `authorization: Bearer <key>`. Never printed.
    pub backend_api_key: Option<SecretString>,

    /// Byte budget for the in-memory request cache. Zero disables caching entirely.
    pub cache_max_bytes: u64,

    /// Keepalive comment interval in milliseconds while awaiting the first upstream chunk.
    pub keepalive_interval_ms: u64,

    /// Hard upper bound, in milliseconds, on time to terminal event.
    pub terminal_watchdog_ms: u64,

    /// Ceiling, in milliseconds, on the backpressure-aware drain wait before closing.
    pub drain_timeout_ms: u64,

    /// Directory redacted per-request trace files are written to. `None` disables tracing.
    pub trace_dir: Option<PathBuf>,

    /// Logging verbosity.
    pub log_level: LogLevel,
}

/// Logging verbosity, as recognized by the `log_level` configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Off,
    #[default]
    Basic,
    Verbose,
    Trace,
}

impl LogLevel {
    /// Maps to an `EnvFilter`-compatible directive string.
    pub fn env_filter(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Basic => "info",
            LogLevel::Verbose => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Explicit overrides applied on top of a loaded (or absent) configuration file, highest
/// priority source in the resolution order: defaults < file < environment < these overrides.
/// The CLI layer is expected to have already folded environment variables into this struct
/// via `clap`'s `env` attribute, so `loader` only has to know about two sources.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend_base_url: Option<String>,
    pub backend_api_key: Option<String>,
    pub cache_max_bytes: Option<u64>,
    pub keepalive_interval_ms: Option<u64>,
    pub terminal_watchdog_ms: Option<u64>,
    pub drain_timeout_ms: Option<u64>,
    pub trace_dir: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
}

impl Config {
    /// Loads configuration from an optional TOML file, then applies `overrides` on top.
    pub fn load(path: Option<&std::path::Path>, overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
        loader::load(path, overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_file_values() {
        let overrides = ConfigOverrides {
            backend_base_url: Some("http://localhost:1234/v1".to_owned()),
            cache_max_bytes: Some(1024),
            ..Default::default()
        };

        let config = Config::load(None, &overrides).unwrap();

        assert_eq!(config.backend_base_url.as_str(), "http://localhost:1234/v1");
        assert_eq!(config.cache_max_bytes, 1024);
        assert_eq!(config.keepalive_interval_ms, DEFAULT_KEEPALIVE_INTERVAL_MS);
    }

    #[test]
    fn missing_backend_url_is_an_error() {
        let err = Config::load(None, &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBackendUrl));
    }
}
