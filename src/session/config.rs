use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SCREENSHOT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_AUDIO_BATCH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8017";

/// User-facing recording configuration
///
/// Persisted as JSON under the `config` key of the shared store. Missing
/// fields fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingConfig {
    /// Take periodic screenshots of the target tab
    pub capture_screenshots: bool,

    /// Capture the target tab's audio
    pub capture_audio: bool,

    /// Seconds between screenshots
    /// Default: 30
    pub screenshot_interval_sec: u64,

    /// Seconds between audio batch deliveries
    /// Default: 60
    pub audio_batch_interval_sec: u64,

    /// Stream artifacts to the collaborator server instead of downloading them
    pub stream_to_server: bool,

    /// Base URL of the collaborator server
    pub server_url: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            capture_screenshots: true,
            capture_audio: true,
            screenshot_interval_sec: DEFAULT_SCREENSHOT_INTERVAL_SECS,
            audio_batch_interval_sec: DEFAULT_AUDIO_BATCH_INTERVAL_SECS,
            stream_to_server: true,
            server_url: DEFAULT_SERVER_URL.to_string(),
        }
    }
}

impl RecordingConfig {
    /// Replace unusable values (zero intervals, blank server URL) with defaults
    pub fn normalized(mut self) -> Self {
        if self.screenshot_interval_sec == 0 {
            self.screenshot_interval_sec = DEFAULT_SCREENSHOT_INTERVAL_SECS;
        }
        if self.audio_batch_interval_sec == 0 {
            self.audio_batch_interval_sec = DEFAULT_AUDIO_BATCH_INTERVAL_SECS;
        }
        if self.server_url.trim().is_empty() {
            self.server_url = DEFAULT_SERVER_URL.to_string();
        }
        self
    }

    pub fn screenshot_interval(&self) -> Duration {
        Duration::from_secs(self.screenshot_interval_sec.max(1))
    }

    pub fn audio_batch_interval(&self) -> Duration {
        Duration::from_secs(self.audio_batch_interval_sec.max(1))
    }
}
