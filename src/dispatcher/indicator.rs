use tracing::info;

use crate::host::TabId;

/// Per-tab badge shown while a tab is recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Badge {
    pub text: &'static str,
    pub color: &'static str,
}

impl Badge {
    pub const RECORDING: Badge = Badge { text: "REC", color: "#d00" };
    pub const IDLE: Badge = Badge { text: "", color: "#000" };

    pub fn for_state(recording: bool) -> Self {
        if recording {
            Self::RECORDING
        } else {
            Self::IDLE
        }
    }
}

/// Visual recording indicator
pub trait RecordingIndicator: Send + Sync {
    fn update(&self, tab: TabId, badge: Badge);
}

/// Renders the badge as a log line
pub struct TracingIndicator;

impl RecordingIndicator for TracingIndicator {
    fn update(&self, tab: TabId, badge: Badge) {
        info!("updateBadge: tab={}, text={:?}, color={}", tab, badge.text, badge.color);
    }
}
