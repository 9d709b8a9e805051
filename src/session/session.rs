use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::config::RecordingConfig;
use crate::host::TabId;

/// How a session hands its artifacts over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Downloads on the local machine
    Local,
    /// Uploads to the collaborator server
    Streaming,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Streaming => f.write_str("streaming"),
        }
    }
}

/// Pending-session descriptor handed from the control surface to the
/// recorder surface through the shared store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub tab_id: TabId,

    #[serde(default)]
    pub config: RecordingConfig,

    /// Correlates the log lines of one recording run
    #[serde(default = "Uuid::new_v4")]
    pub recording_id: Uuid,
}

impl SessionDescriptor {
    pub fn new(tab_id: TabId, config: RecordingConfig) -> Self {
        Self {
            tab_id,
            config,
            recording_id: Uuid::new_v4(),
        }
    }
}

/// One recording run, as owned by its recorder surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub recording_id: Uuid,
    pub target_tab_id: TabId,
    pub recorder_tab_id: TabId,

    /// Only set once the collaborator server confirmed the session
    pub server_session_id: Option<String>,

    pub config: RecordingConfig,
    pub delivery_mode: DeliveryMode,
}

impl RecordingSession {
    /// Session that delivers locally
    pub fn local(descriptor: &SessionDescriptor, recorder_tab_id: TabId) -> Self {
        Self {
            recording_id: descriptor.recording_id,
            target_tab_id: descriptor.tab_id,
            recorder_tab_id,
            server_session_id: None,
            config: descriptor.config.clone(),
            delivery_mode: DeliveryMode::Local,
        }
    }

    /// Session confirmed by the collaborator server
    pub fn streaming(
        descriptor: &SessionDescriptor,
        recorder_tab_id: TabId,
        server_session_id: String,
    ) -> Self {
        Self {
            server_session_id: Some(server_session_id),
            delivery_mode: DeliveryMode::Streaming,
            ..Self::local(descriptor, recorder_tab_id)
        }
    }
}
