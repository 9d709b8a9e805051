use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::recorder::{ProcessCaptureConfig, AUDIO_MIME_TYPE, DEFAULT_RECORDER_URL};

/// Prefix of environment overrides, e.g. `TAB_RECORDER__HTTP__PORT=9000`
pub const ENV_PREFIX: &str = "TAB_RECORDER";

/// Service configuration
///
/// Every section has defaults, so an absent file still yields a runnable
/// service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub cdp: CdpConfig,
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub recorder: RecorderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8018,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    /// HTTP base of the browser's remote-debugging port
    pub endpoint: String,
    /// Milliseconds between tab list polls
    pub poll_interval_ms: u64,
}

impl CdpConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9222".to_string(),
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file backing the shared key-value store
    pub store_path: PathBuf,
    /// Where local artifacts are written
    pub downloads_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/store.json"),
            downloads_dir: PathBuf::from("downloads"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Program writing a tab's encoded audio to stdout
    pub command: String,
    /// Arguments; `{tab}` is replaced by the tab id
    pub args: Vec<String>,
    pub chunk_bytes: usize,
    pub mime_type: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let process = ProcessCaptureConfig::default();
        Self {
            command: process.command,
            args: process.args,
            chunk_bytes: process.chunk_bytes,
            mime_type: AUDIO_MIME_TYPE.to_string(),
        }
    }
}

impl From<&CaptureConfig> for ProcessCaptureConfig {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            chunk_bytes: config.chunk_bytes,
            mime_type: config.mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Page opened in every recorder tab
    pub page_url: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            page_url: DEFAULT_RECORDER_URL.to_string(),
        }
    }
}

impl Config {
    /// Load `path` (any extension the config crate knows, optional) and
    /// overlay `TAB_RECORDER__*` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}
