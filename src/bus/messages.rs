use serde::{Deserialize, Serialize};

use crate::host::{TabId, Viewport};
use crate::session::RecordingConfig;

/// Request sent from a surface to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    UpdateConfig {
        config: RecordingConfig,
    },
    #[serde(rename_all = "camelCase")]
    StartRecording {
        tab_id: TabId,
    },
    #[serde(rename_all = "camelCase")]
    StopRecording {
        tab_id: TabId,
    },
    #[serde(rename_all = "camelCase")]
    GetRecordingState {
        tab_id: TabId,
    },
    #[serde(rename_all = "camelCase")]
    TakeScreenshot {
        tab_id: TabId,
    },
    #[serde(rename_all = "camelCase")]
    RegisterRecorderTab {
        recorder_tab_id: TabId,
        target_tab_id: TabId,
    },
    #[serde(rename_all = "camelCase")]
    RequestTabCapture {
        tab_id: TabId,
        capture_audio: bool,
    },
}

impl Message {
    /// Wire name of the message kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdateConfig { .. } => "UPDATE_CONFIG",
            Self::StartRecording { .. } => "START_RECORDING",
            Self::StopRecording { .. } => "STOP_RECORDING",
            Self::GetRecordingState { .. } => "GET_RECORDING_STATE",
            Self::TakeScreenshot { .. } => "TAKE_SCREENSHOT",
            Self::RegisterRecorderTab { .. } => "REGISTER_RECORDER_TAB",
            Self::RequestTabCapture { .. } => "REQUEST_TAB_CAPTURE",
        }
    }
}

/// Single reply to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Recording {
        recording: bool,
    },
    #[serde(rename_all = "camelCase")]
    Screenshot {
        data_url: String,
    },
    Error {
        error: String,
    },
    Success {
        success: bool,
    },
}

impl Reply {
    pub fn ok() -> Self {
        Self::Success { success: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Who sent a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sender {
    /// Tab of the sending surface, if it lives in a tab
    pub tab: Option<TabId>,
    /// Visible size of the sending tab
    pub viewport: Option<Viewport>,
}

impl Sender {
    pub fn tab(tab: TabId) -> Self {
        Self {
            tab: Some(tab),
            viewport: None,
        }
    }

    pub fn with_viewport(mut self, viewport: Option<Viewport>) -> Self {
        self.viewport = viewport;
        self
    }
}

/// A message as seen by broadcast subscribers
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub sender: Sender,
    pub message: Message,
}
