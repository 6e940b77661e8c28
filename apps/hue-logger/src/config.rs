use crate::mapper::HueScale;
use crate::writer::InfluxSettings;
use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/hue-logger/config.json";
const DEFAULT_INFLUX_URL: &str = "http://127.0.0.1:8086";
const DEFAULT_INFLUX_DB: &str = "home";
const DEFAULT_MEASUREMENT: &str = "lights";
const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

fn setup_config_path() -> PathBuf {
    if let Ok(path) = env::var("HUE_LOGGER_SETUP_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    bridge_url: Option<String>,
    #[serde(default)]
    hue_username: Option<String>,
    #[serde(default)]
    influx_url: Option<String>,
    #[serde(default)]
    influx_db: Option<String>,
    #[serde(default)]
    influx_username: Option<String>,
    #[serde(default)]
    influx_password: Option<String>,
    #[serde(default)]
    influx_retention_policy: Option<String>,
    #[serde(default)]
    measurement: Option<String>,
    #[serde(default)]
    interval_secs: Option<u64>,
    #[serde(default)]
    request_timeout_ms: Option<u64>,
    #[serde(default)]
    hue_scale: Option<String>,
}

/// Reads the setup file if one exists. Failures come back as a warning
/// message because tracing is not installed yet when config is loaded.
fn load_setup_config_overrides() -> Result<Option<SetupConfigOverrides>, String> {
    let path = setup_config_path();
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|err| {
        format!(
            "hue-logger failed to read setup config {}: {err}; using env only",
            path.display()
        )
    })?;
    parse_setup_config(contents, &path).map(Some)
}

fn parse_setup_config(
    contents: String,
    path: &std::path::Path,
) -> Result<SetupConfigOverrides, String> {
    let mut bytes = contents.into_bytes();
    simd_json::serde::from_slice(&mut bytes).map_err(|err| {
        format!(
            "hue-logger failed to parse setup config {}: {err}; using env only",
            path.display()
        )
    })
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bridge_url: Option<String>,
    pub hue_username: String,
    pub influx_url: String,
    pub influx_db: String,
    pub influx_username: Option<String>,
    pub influx_password: Option<String>,
    pub influx_retention_policy: Option<String>,
    pub measurement: String,
    pub interval_secs: u64,
    pub request_timeout_ms: u64,
    pub hue_scale: HueScale,
    pub otlp_endpoint: Option<String>,
    /// Set when the setup file exists but could not be used. Logged once
    /// tracing is up.
    pub setup_warning: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::resolve_with_setup(|key| env::var(key).ok(), load_setup_config_overrides())
    }

    fn resolve_with_setup(
        lookup: impl Fn(&str) -> Option<String>,
        setup: Result<Option<SetupConfigOverrides>, String>,
    ) -> Result<Self> {
        let (overrides, setup_warning) = match setup {
            Ok(overrides) => (overrides.unwrap_or_default(), None),
            Err(warning) => (SetupConfigOverrides::default(), Some(warning)),
        };
        let mut config = Self::resolve(lookup, &overrides)?;
        config.setup_warning = setup_warning;
        Ok(config)
    }

    /// Environment wins; the setup file only fills what the environment
    /// leaves unset or blank.
    fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        overrides: &SetupConfigOverrides,
    ) -> Result<Self> {
        let env_value = |key: &str| non_empty(lookup(key));

        let bridge_url = env_value("HUE_BRIDGE_URL")
            .or_else(|| non_empty(overrides.bridge_url.clone()))
            .map(|url| normalize_base_url(&url));

        let hue_username = env_value("HUE_USERNAME")
            .or_else(|| non_empty(overrides.hue_username.clone()))
            .ok_or_else(|| {
                anyhow!("HUE_USERNAME is required; run hue-pair to create one on the bridge")
            })?;

        let influx_url = env_value("HUE_LOGGER_INFLUX_URL")
            .or_else(|| non_empty(overrides.influx_url.clone()))
            .map(|url| normalize_base_url(&url))
            .unwrap_or_else(|| DEFAULT_INFLUX_URL.to_string());
        let influx_db = env_value("HUE_LOGGER_INFLUX_DB")
            .or_else(|| non_empty(overrides.influx_db.clone()))
            .unwrap_or_else(|| DEFAULT_INFLUX_DB.to_string());
        let influx_username = env_value("HUE_LOGGER_INFLUX_USERNAME")
            .or_else(|| non_empty(overrides.influx_username.clone()));
        let influx_password = env_value("HUE_LOGGER_INFLUX_PASSWORD")
            .or_else(|| non_empty(overrides.influx_password.clone()));
        let influx_retention_policy = env_value("HUE_LOGGER_INFLUX_RETENTION_POLICY")
            .or_else(|| non_empty(overrides.influx_retention_policy.clone()));
        let measurement = env_value("HUE_LOGGER_MEASUREMENT")
            .or_else(|| non_empty(overrides.measurement.clone()))
            .unwrap_or_else(|| DEFAULT_MEASUREMENT.to_string());

        let interval_secs = env_value("HUE_LOGGER_INTERVAL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .or(overrides.interval_secs)
            .filter(|v| *v != 0)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        let request_timeout_ms = env_value("HUE_LOGGER_REQUEST_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .or(overrides.request_timeout_ms)
            .filter(|v| *v != 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

        let hue_scale = match env_value("HUE_LOGGER_HUE_SCALE")
            .or_else(|| non_empty(overrides.hue_scale.clone()))
        {
            Some(raw) => raw.parse::<HueScale>().map_err(|err| anyhow!(err))?,
            None => HueScale::default(),
        };

        let otlp_endpoint = env_value("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            bridge_url,
            hue_username,
            influx_url,
            influx_db,
            influx_username,
            influx_password,
            influx_retention_policy,
            measurement,
            interval_secs,
            request_timeout_ms,
            hue_scale,
            otlp_endpoint,
            setup_warning: None,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn influx_settings(&self) -> InfluxSettings {
        InfluxSettings {
            url: self.influx_url.clone(),
            database: self.influx_db.clone(),
            username: self.influx_username.clone(),
            password: self.influx_password.clone(),
            retention_policy: self.influx_retention_policy.clone(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Adds a scheme to bare hosts and drops trailing slashes.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
