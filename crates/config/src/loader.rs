use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::{Config, ConfigError, ConfigOverrides, LogLevel};

/// Mirrors [`Config`] but every field is optional, matching the shape of a possibly-partial
/// TOML file. Unknown keys are rejected so typos in a config file surface immediately rather
/// than being silently ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    backend_base_url: Option<String>,
    backend_api_key: Option<String>,
    cache_max_bytes: Option<u64>,
    keepalive_interval_ms: Option<u64>,
    terminal_watchdog_ms: Option<u64>,
    drain_timeout_ms: Option<u64>,
    trace_dir: Option<PathBuf>,
    log_level: Option<LogLevel>,
}

pub(crate) fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
    let raw = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => RawConfig::default(),
    };

    let backend_base_url = overrides
        .backend_base_url
        .clone()
        .or(raw.backend_base_url)
        .ok_or(ConfigError::MissingBackendUrl)?;
    let backend_base_url = Url::parse(&backend_base_url)?;

    let backend_api_key = overrides
        .backend_api_key
        .clone()
        .or(raw.backend_api_key)
        .map(SecretString::from);

    Ok(Config {
        backend_base_url,
        backend_api_key,
        cache_max_bytes: overrides
            .cache_max_bytes
            .or(raw.cache_max_bytes)
            .unwrap_or(crate::DEFAULT_CACHE_MAX_BYTES),
        keepalive_interval_ms: overrides
            .keepalive_interval_ms
            .or(raw.keepalive_interval_ms)
            .unwrap_or(crate::DEFAULT_KEEPALIVE_INTERVAL_MS),
        terminal_watchdog_ms: overrides
            .terminal_watchdog_ms
            .or(raw.terminal_watchdog_ms)
            .unwrap_or(crate::DEFAULT_TERMINAL_WATCHDOG_MS),
        drain_timeout_ms: overrides
            .drain_timeout_ms
            .or(raw.drain_timeout_ms)
            .unwrap_or(crate::DEFAULT_DRAIN_TIMEOUT_MS),
        trace_dir: overrides.trace_dir.clone().or(raw.trace_dir),
        log_level: overrides.log_level.or(raw.log_level).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "backend_base_url = \"http://localhost:8000/v1\"\n").unwrap();

        let config = load(Some(&path), &ConfigOverrides::default()).unwrap();

        assert_eq!(config.backend_base_url.as_str(), "http://localhost:8000/v1");
        assert_eq!(config.log_level, LogLevel::Basic);
    }

    #[test]
    fn rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "bogus_key = 1\n").unwrap();

        let err = load(Some(&path), &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
