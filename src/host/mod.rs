//! Browser host abstractions
//!
//! The recording coordinator never talks to a browser directly. Everything it
//! needs from the host goes through the traits in this module:
//! - `TabHost` - tab lookup, creation and closing
//! - `ArtifactSink` - local downloads
//! - `HostEvent` - tab removal and debugger detachment notifications
//!
//! Concrete implementations live in the submodules (`cdp`, `downloads`).

pub mod cdp;
pub mod downloads;

pub use cdp::CdpBrowser;
pub use downloads::LocalDownloads;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

/// Browser tab identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TabId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Visible size of a tab, used as a clip hint for screenshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// What the host knows about a tab
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub title: String,
    pub url: String,
    pub viewport: Option<Viewport>,
}

/// Lifecycle notifications raised by the host, independent of any message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A tab was closed (by the user or programmatically)
    TabRemoved(TabId),
    /// The host tore down a debugger attachment we did not ask to release
    DebuggerDetached { tab: TabId, reason: String },
}

/// Fan-out channel for host events
pub type HostEvents = broadcast::Sender<HostEvent>;

/// Create a host event channel
pub fn host_events() -> HostEvents {
    let (tx, _) = broadcast::channel(256);
    tx
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Tab {0} not found")]
    TabNotFound(TabId),

    #[error("Host request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tab management surface of the host
#[async_trait::async_trait]
pub trait TabHost: Send + Sync {
    /// Look up a tab; `None` when it no longer exists
    async fn get(&self, tab: TabId) -> Result<Option<TabInfo>, HostError>;

    /// Open a new background tab and return its id
    async fn open_tab(&self, url: &str) -> Result<TabId, HostError>;

    /// Close a tab
    async fn close_tab(&self, tab: TabId) -> Result<(), HostError>;
}

/// Destination for local downloads
#[async_trait::async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Save one artifact. Returns the name it was actually stored under,
    /// which may differ from `filename` when that name was already taken.
    async fn save(&self, filename: &str, mime_type: &str, data: &[u8]) -> Result<String, HostError>;
}
