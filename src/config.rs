//! Configuration types for the APIBAN store.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Upstream feed settings.
    #[serde(default)]
    pub feed: FeedConfig,

    /// In-memory cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Upstream feed configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// API key (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the API; the key and endpoint are appended to it.
    #[serde(default = "default_root_url")]
    pub root_url: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Upper bound on pages fetched by one listing call.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            root_url: default_root_url(),
            timeout_ms: default_timeout(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_root_url() -> String {
    "https://apiban.org/api".to_string()
}

fn default_timeout() -> u64 {
    10_000
}

fn default_max_pages() -> u32 {
    10_000
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Minimum spacing between upstream refreshes (seconds).
    #[serde(default = "default_check_interval")]
    pub min_upstream_check_interval_seconds: u64,
}

impl CacheConfig {
    pub fn min_upstream_check_interval(&self) -> Duration {
        Duration::from_secs(self.min_upstream_check_interval_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_upstream_check_interval_seconds: default_check_interval(),
        }
    }
}

fn default_check_interval() -> u64 {
    crate::cache::DEFAULT_MIN_UPSTREAM_CHECK_INTERVAL.as_secs()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.feed.api_key.is_empty() {
            anyhow::bail!("feed.api_key is empty");
        }

        if let Err(e) = Url::parse(&self.feed.root_url) {
            anyhow::bail!("invalid feed.root_url {:?}: {}", self.feed.root_url, e);
        }

        if self.feed.timeout_ms == 0 {
            anyhow::bail!("feed.timeout_ms must be > 0");
        }

        if self.feed.max_pages == 0 {
            anyhow::bail!("feed.max_pages must be > 0");
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# APIBAN store configuration

feed:
  api_key: "${APIBAN_API_KEY}"     # Use environment variable
  root_url: "https://apiban.org/api"
  timeout_ms: 10000                # Per-request timeout
  max_pages: 10000                 # Abort a listing that never ends

cache:
  min_upstream_check_interval_seconds: 180   # At most one refresh per 3 minutes
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");

    re.replace_all(content, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
