use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::DeliveryMode;

/// Statistics about a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Whether recording is currently active
    pub is_recording: bool,

    /// Where artifacts went
    pub delivery_mode: DeliveryMode,

    /// Collaborator session id, when streaming
    pub server_session_id: Option<String>,

    /// When the recording started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Screenshots uploaded or downloaded
    pub screenshots_delivered: usize,

    /// Audio batches uploaded or downloaded
    pub audio_batches_delivered: usize,

    /// Deliveries dropped after a failure
    pub deliveries_failed: usize,
}
