use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(100);

// Parses a duration string (e.g., "5s", "1m") into a `tokio::time::Duration`.
fn parse_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Monitor settings, read from the `[app_settings]` section.
///
/// Immutable once loaded; the monitor context takes ownership for the
/// lifetime of the process.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    // Target probed on every cycle.
    pub url: String,

    // Append-only status log. Relative paths are resolved against the
    // executable's directory by `resolve_log_path`.
    pub log_path: PathBuf,

    // PEM or DER certificate whose fingerprint is pinned.
    pub cert_path: PathBuf,

    #[serde(
        default = "Settings::default_poll_interval",
        deserialize_with = "parse_duration"
    )]
    pub poll_interval: Duration,

    #[serde(
        default = "Settings::default_request_timeout",
        deserialize_with = "parse_duration"
    )]
    pub request_timeout: Duration,
}

impl Settings {
    fn default_poll_interval() -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    fn default_request_timeout() -> Duration {
        DEFAULT_REQUEST_TIMEOUT
    }

    /// Anchors a relative `log_path` at `base_dir`. Absolute paths are kept.
    pub fn resolve_log_path(mut self, base_dir: &Path) -> Self {
        if self.log_path.is_relative() {
            self.log_path = base_dir.join(&self.log_path);
        }
        self
    }

    fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.url)
            .with_context(|| format!("Invalid target url: {}", self.url))?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            "Unsupported url scheme '{}', expected http or https",
            url.scheme()
        );
        ensure!(!self.poll_interval.is_zero(), "poll_interval must be greater than zero");
        ensure!(!self.request_timeout.is_zero(), "request_timeout must be greater than zero");
        Ok(())
    }
}

/// Top-level configuration file layout.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app_settings: Settings,
}

impl Config {
    pub fn new(config_path: &Path) -> Result<Self> {
        let config = Self::load_from_file(config_path)?;
        config
            .app_settings
            .validate()
            .with_context(|| format!("Invalid settings in {}", config_path.display()))?;
        tracing::debug!("config: {:?}", config);
        Ok(config)
    }

    // Loads configuration from a TOML file.
    fn load_from_file(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }
}
