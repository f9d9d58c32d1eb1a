//! `AppConfig` struct and TOML read/write.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use guidecast_api::guide::{FetchPlan, GuideClient, RetryPolicy};
use guidecast_store::{GuideStore, resolve_data_dir};
use guidecast_xmltv::GuideClock;
use guidecast_xmltv::inject::{DEFAULT_DAYS, DEFAULT_DESCRIPTION, DEFAULT_TITLE, PlaceholderSpec};
use guidecast_xmltv::timestamp::parse_offset;
use serde::{Deserialize, Serialize};
use url::Url;

/// User-Agent sent when none is configured.
const DEFAULT_USER_AGENT: &str = concat!("guidecast/", env!("CARGO_PKG_VERSION"));

/// Top-level application configuration.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    /// Tuner device settings.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Guide endpoint settings.
    #[serde(default)]
    pub api: ApiConfig,
    /// Windowed fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Published document settings.
    #[serde(default)]
    pub output: OutputConfig,
    /// Placeholder programme defaults.
    #[serde(default)]
    pub placeholder: PlaceholderConfig,
    /// HTTP server and scheduler settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Tuner device configuration.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Device base URL, e.g. `http://192.168.1.10/`.
    #[serde(default)]
    pub url: Option<String>,
}

/// Guide endpoint configuration.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ApiConfig {
    /// Guide endpoint base URL (default: the vendor cloud endpoint).
    #[serde(default)]
    pub url: Option<String>,
    /// User-Agent header.
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Windowed fetch configuration.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetchConfig {
    /// Days to fetch ahead.
    pub days: u32,
    /// Follow-up windows after the base window.
    pub max_windows: u32,
    /// Retries per request.
    pub max_retries: u32,
    /// First retry delay in seconds (doubles per retry).
    pub retry_delay_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let plan = FetchPlan::default();
        Self {
            days: plan.days,
            max_windows: plan.max_windows,
            max_retries: 3,
            retry_delay_secs: 2,
        }
    }
}

/// Published document configuration.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for guide versions (default: data directory).
    pub dir: Option<PathBuf>,
    /// Versions kept on disk.
    pub keep: usize,
    /// Fixed `±HHMM` offset for timestamps (default: local offset).
    pub offset: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: None,
            keep: guidecast_store::store::DEFAULT_KEEP,
            offset: None,
        }
    }
}

/// Placeholder programme configuration.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlaceholderConfig {
    /// Title of every placeholder.
    pub title: String,
    /// Description; `{channel}` is replaced by the channel name.
    pub description: String,
    /// Days covered.
    pub days: u32,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            title: String::from(DEFAULT_TITLE),
            description: String::from(DEFAULT_DESCRIPTION),
            days: DEFAULT_DAYS,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Cron expression (with seconds) for scheduled updates.
    pub schedule: String,
    /// Run an update right after startup.
    pub refresh_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: String::from("0.0.0.0:8089"),
            schedule: String::from("0 0 */6 * * *"),
            refresh_on_start: true,
        }
    }
}

impl AppConfig {
    /// Loads config from a TOML file. Returns default if file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Builds the device/guide client.
    ///
    /// # Errors
    ///
    /// Returns an error if `device.url` is missing or any URL is invalid.
    pub fn guide_client(&self) -> Result<GuideClient> {
        let device_url = self
            .device
            .url
            .as_deref()
            .context("device.url is not configured")?;
        let device_url =
            Url::parse(device_url).with_context(|| format!("invalid device.url: {device_url}"))?;

        let mut builder = GuideClient::builder()
            .device_url(device_url)
            .user_agent(self.api.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT))
            .retry(self.retry_policy());
        if let Some(api_url) = self.api.url.as_deref() {
            builder = builder
                .api_url(Url::parse(api_url).with_context(|| format!("invalid api.url: {api_url}"))?);
        }
        builder.build()
    }

    /// Retry policy from `[fetch]`.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch.max_retries,
            Duration::from_secs(self.fetch.retry_delay_secs),
        )
    }

    /// Fetch plan from `[fetch]`.
    #[must_use]
    pub const fn fetch_plan(&self) -> FetchPlan {
        FetchPlan::new(self.fetch.days, self.fetch.max_windows)
    }

    /// Opens the guide store from `[output]`, falling back to the data
    /// directory under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be resolved or created.
    pub fn guide_store(&self, dir: Option<&PathBuf>) -> Result<GuideStore> {
        let path = match &self.output.dir {
            Some(path) => path.clone(),
            None => resolve_data_dir(dir)?,
        };
        GuideStore::open(path, self.output.keep)
    }

    /// Fixed timestamp offset from `output.offset`, if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if `output.offset` is not a `±HHMM` offset.
    pub fn offset(&self) -> Result<Option<FixedOffset>> {
        self.output
            .offset
            .as_deref()
            .map(|raw| {
                parse_offset(raw)
                    .with_context(|| format!("invalid output.offset: {raw} (expected ±HHMM)"))
            })
            .transpose()
    }

    /// Clock for today in the configured (or local) offset.
    ///
    /// # Errors
    ///
    /// Returns an error if `output.offset` is invalid.
    pub fn clock(&self) -> Result<GuideClock> {
        Ok(self
            .offset()?
            .map_or_else(GuideClock::now_local, GuideClock::now_in))
    }

    /// Placeholder spec for a duration token, with `[placeholder]` text.
    /// `None` when the token disables placeholders.
    #[must_use]
    pub fn placeholder_spec(&self, token: &str) -> Option<PlaceholderSpec> {
        PlaceholderSpec::from_token(token).map(|spec| PlaceholderSpec {
            title: self.placeholder.title.clone(),
            description: self.placeholder.description.clone(),
            days: self.placeholder.days,
            ..spec
        })
    }
}
