//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use papersync_core::HttpConfig;
use papersync_pmc::{DEFAULT_BATCH_SIZE, SyncConfig};

/// Global configuration for papersync
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub pmc: PmcConfig,
    pub http: HttpSettings,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub data_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./PMCData"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PmcConfig {
    pub feed_url: String,
    pub idconv_url: String,
    pub efetch_url: String,
    pub idconv_batch_size: usize,
    pub efetch_batch_size: usize,
    pub single_page: bool,
    pub skip_formats: Vec<String>,
    pub tool: String,
    pub payload_scheme: String,
    /// Overrides the contact stored in the state file; may be `${VAR}`
    #[serde(deserialize_with = "deserialize_env_var")]
    pub email: Option<String>,
}

impl Default for PmcConfig {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        Self {
            feed_url: defaults.feed_url,
            idconv_url: defaults.idconv_url,
            efetch_url: defaults.efetch_url,
            idconv_batch_size: DEFAULT_BATCH_SIZE,
            efetch_batch_size: DEFAULT_BATCH_SIZE,
            single_page: defaults.single_page,
            skip_formats: defaults.skip_formats,
            tool: defaults.tool,
            payload_scheme: defaults.payload_scheme,
            email: std::env::var("PAPERSYNC_EMAIL").ok(),
        }
    }
}

/// HTTP timeouts in seconds, request spacing in milliseconds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout: u64,
    pub request_timeout: u64,
    pub read_timeout: u64,
    pub min_interval_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = HttpConfig::default();
        Self {
            connect_timeout: defaults.connect_timeout.as_secs(),
            request_timeout: defaults.request_timeout.as_secs(),
            read_timeout: defaults.read_timeout.as_secs(),
            min_interval_ms: defaults.min_interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minimum age of the watermark before `sync` runs again
    pub min_interval_hours: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_interval_hours: 24,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./papersync.toml (current directory)
    /// 2. ~/.config/papersync/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("papersync.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "papersync") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Library configuration for one run
    pub fn sync_config(&self) -> SyncConfig {
        let pmc = &self.pmc;
        SyncConfig {
            data_dir: self.output.data_dir.clone(),
            feed_url: pmc.feed_url.clone(),
            idconv_url: pmc.idconv_url.clone(),
            efetch_url: pmc.efetch_url.clone(),
            idconv_batch_size: pmc.idconv_batch_size,
            efetch_batch_size: pmc.efetch_batch_size,
            single_page: pmc.single_page,
            skip_formats: pmc.skip_formats.clone(),
            tool: pmc.tool.clone(),
            payload_scheme: pmc.payload_scheme.clone(),
            email: pmc.email.clone(),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs(self.http.connect_timeout),
            request_timeout: Duration::from_secs(self.http.request_timeout),
            read_timeout: Duration::from_secs(self.http.read_timeout),
            min_interval: Duration::from_millis(self.http.min_interval_ms),
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.sync_config().validate()?;
        anyhow::ensure!(
            self.schedule.min_interval_hours >= 0,
            "schedule.min_interval_hours must not be negative"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output.data_dir, PathBuf::from("./PMCData"));
        assert_eq!(config.pmc.idconv_batch_size, 200);
        assert_eq!(config.schedule.min_interval_hours, 24);
        assert_eq!(config.http.min_interval_ms, 340);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("PAPERSYNC_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${PAPERSYNC_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("PAPERSYNC_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(
            expand_env_var("ops@example.org"),
            Some("ops@example.org".to_string())
        );
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[output]
data_dir = "/srv/pmc"

[pmc]
single_page = true
idconv_batch_size = 100
email = "ops@example.org"

[http]
read_timeout = 30
min_interval_ms = 100

[schedule]
min_interval_hours = 6
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.output.data_dir, PathBuf::from("/srv/pmc"));
        assert_eq!(config.schedule.min_interval_hours, 6);

        let sync = config.sync_config();
        assert!(sync.single_page);
        assert_eq!(sync.idconv_batch_size, 100);
        assert_eq!(sync.efetch_batch_size, 200);
        assert_eq!(sync.email.as_deref(), Some("ops@example.org"));
        assert_eq!(sync.skip_formats, vec!["pdf".to_string()]);

        let http = config.http_config();
        assert_eq!(http.read_timeout, Duration::from_secs(30));
        assert_eq!(http.min_interval, Duration::from_millis(100));
        assert_eq!(http.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config: Config = toml::from_str("[pmc]\nefetch_batch_size = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("papersync.toml");
        std::fs::write(&path, "[output\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("papersync.toml"));
    }
}
