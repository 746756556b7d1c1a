#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("backend_base_url is required (set it in the config file, RELAY_BACKEND_BASE_URL, or --backend-base-url)")]
    MissingBackendUrl,
    #[error("backend_base_url is not a valid URL: {0}")]
    InvalidBackendUrl(#[from] url::ParseError),
}
