use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::host::{TabId, Viewport};

/// DevTools protocol version requested on attach
pub const PROTOCOL_VERSION: &str = "1.3";

/// Per-tab debugger sub-state
///
/// `Detached -> Attaching -> Attached -> Capturing -> Attached`, back to
/// `Detached` on host-initiated detachment, failure, or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebuggerState {
    #[default]
    Detached,
    Attaching,
    Attached,
    Capturing,
}

impl DebuggerState {
    /// Whether a debugging session is currently held for the tab
    pub fn is_attached(self) -> bool {
        matches!(self, Self::Attached | Self::Capturing)
    }
}

#[derive(Debug, Clone, Error)]
pub enum DebuggerError {
    #[error("Failed to attach debugger to tab {tab}: {message}")]
    Attach { tab: TabId, message: String },

    #[error("Debugger is not attached to tab {0}")]
    NotAttached(TabId),

    #[error("Debugger detached from tab {tab}: {reason}")]
    Detached { tab: TabId, reason: String },

    #[error("{method} failed: {message}")]
    Command { method: String, message: String },

    #[error("Failed to capture screenshot")]
    EmptyCapture,
}

/// Remote-debugging primitive of the host
///
/// Implementations are not expected to guard against concurrent use for the
/// same tab; the dispatcher serializes attach/command/detach per tab.
#[async_trait::async_trait]
pub trait DebuggerPort: Send + Sync {
    async fn attach(&self, tab: TabId) -> Result<(), DebuggerError>;

    async fn detach(&self, tab: TabId) -> Result<(), DebuggerError>;

    async fn send_command(
        &self,
        tab: TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, DebuggerError>;
}

/// Parameters for `Page.captureScreenshot`
pub fn capture_params(viewport: Option<Viewport>) -> Value {
    let mut params = json!({
        "format": "png",
        "quality": 100,
        "captureBeyondViewport": false,
        "fromSurface": true,
    });

    if let Some(Viewport { width, height }) = viewport.filter(|v| v.width > 0 && v.height > 0) {
        params["clip"] = json!({
            "x": 0,
            "y": 0,
            "width": width,
            "height": height,
            "scale": 1,
        });
    }

    params
}

/// Turn a `Page.captureScreenshot` result into a PNG data URL
pub fn data_url_from_capture(result: &Value) -> Result<String, DebuggerError> {
    match result.get("data").and_then(Value::as_str) {
        Some(data) if !data.is_empty() => Ok(format!("data:image/png;base64,{}", data)),
        _ => Err(DebuggerError::EmptyCapture),
    }
}
