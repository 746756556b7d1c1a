use std::path::PathBuf;

use clap::Parser;
use relay_config::{ConfigOverrides, LogLevel};

/// Command-line entry point for the Anthropic-to-OpenAI translating proxy.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
pub struct Args {
    /// Path to a TOML configuration file. Overridden by environment variables and flags below.
    #[arg(long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the HTTP listener binds to.
    #[arg(long, env = "RELAY_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: String,

    /// Base URL of the OpenAI-compatible backend.
    #[arg(long, env = "RELAY_BACKEND_BASE_URL")]
    pub backend_base_url: Option<String>,

    /// Credential forwarded to the backend as `authorization: Bearer ...`.
    #[arg(long, env = "RELAY_BACKEND_API_KEY")]
    pub backend_api_key: Option<String>,

    /// Byte budget for the in-memory request cache (0 disables caching).
    #[arg(long, env = "RELAY_CACHE_MAX_BYTES")]
    pub cache_max_bytes: Option<u64>,

    /// Keepalive comment interval while awaiting the first upstream chunk, in milliseconds.
    #[arg(long, env = "RELAY_KEEPALIVE_INTERVAL_MS")]
    pub keepalive_interval_ms: Option<u64>,

    /// Hard upper bound on time to terminal event, in milliseconds.
    #[arg(long, env = "RELAY_TERMINAL_WATCHDOG_MS")]
    pub terminal_watchdog_ms: Option<u64>,

    /// Ceiling on the backpressure drain wait before closing, in milliseconds.
    #[arg(long, env = "RELAY_DRAIN_TIMEOUT_MS")]
    pub drain_timeout_ms: Option<u64>,

    /// Directory to write redacted per-request trace files into. Unset disables tracing.
    #[arg(long, env = "RELAY_TRACE_DIR")]
    pub trace_dir: Option<PathBuf>,

    /// Logging verbosity.
    #[arg(long, env = "RELAY_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,
}

impl Args {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            backend_base_url: self.backend_base_url.clone(),
            backend_api_key: self.backend_api_key.clone(),
            cache_max_bytes: self.cache_max_bytes,
            keepalive_interval_ms: self.keepalive_interval_ms,
            terminal_watchdog_ms: self.terminal_watchdog_ms,
            drain_timeout_ms: self.drain_timeout_ms,
            trace_dir: self.trace_dir.clone(),
            log_level: self.log_level,
        }
    }
}
