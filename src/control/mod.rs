//! Control surface
//!
//! The user-facing trigger. It never touches tab state itself: it asks the
//! dispatcher over the bus, persists the session descriptor in the shared
//! store, and opens a recorder surface for it through a `RecorderLauncher`.

use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{BusClient, BusError, Message, Reply, Sender};
use crate::host::TabId;
use crate::recorder::RecorderLauncher;
use crate::session::{RecordingConfig, SessionDescriptor};
use crate::store::{KeyValueStore, KeyValueStoreExt, StoreError, ACTIVE_RECORDING_KEY};

/// Button the control surface offers for a tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affordance {
    Start,
    Stop,
}

impl Affordance {
    pub fn for_state(recording: bool) -> Self {
        if recording {
            Self::Stop
        } else {
            Self::Start
        }
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Tab {0} is already recording")]
    AlreadyRecording(TabId),

    #[error("Failed to open recorder tab: {0:#}")]
    Launch(anyhow::Error),

    #[error("Recorder tab {0} closed before recording started")]
    RecorderClosed(TabId),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Could not save configuration: {0}")]
    ConfigRejected(String),

    #[error("Unexpected reply from dispatcher: {0:?}")]
    UnexpectedReply(Reply),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// A session the control surface just started
#[derive(Debug, Clone)]
pub struct StartedRecording {
    pub target_tab: TabId,
    pub recorder_tab: TabId,
    pub descriptor: SessionDescriptor,
}

#[derive(Clone)]
pub struct ControlSurface {
    bus: BusClient,
    store: Arc<dyn KeyValueStore>,
    launcher: Arc<dyn RecorderLauncher>,
    /// Serializes start and stop per tab
    tab_locks: Arc<SyncMutex<HashMap<TabId, Arc<Mutex<()>>>>>,
}

impl ControlSurface {
    pub fn new(
        bus: BusClient,
        store: Arc<dyn KeyValueStore>,
        launcher: Arc<dyn RecorderLauncher>,
    ) -> Self {
        Self {
            bus,
            store,
            launcher,
            tab_locks: Arc::new(SyncMutex::new(HashMap::new())),
        }
    }

    pub async fn recording_state(&self, tab: TabId) -> Result<bool, ControlError> {
        let reply = self.request(Message::GetRecordingState { tab_id: tab }).await?;
        Self::recording_flag(reply)
    }

    /// Which affordance to render for the active tab
    pub async fn activate(&self, tab: TabId) -> Result<Affordance, ControlError> {
        Ok(Affordance::for_state(self.recording_state(tab).await?))
    }

    /// Start recording `tab`
    ///
    /// Persists the session descriptor, raises the dispatcher flag, opens a
    /// recorder surface and registers it against `tab`. Concurrent starts
    /// for one tab run one at a time, so only the first of them succeeds.
    pub async fn start(&self, tab: TabId) -> Result<StartedRecording, ControlError> {
        let lock = self.tab_lock(tab);
        let _serial = lock.lock().await;

        if self.recording_state(tab).await? {
            return Err(ControlError::AlreadyRecording(tab));
        }

        let config = self.store.recording_config().await?;
        let descriptor = SessionDescriptor::new(tab, config);
        self.store.set_typed(ACTIVE_RECORDING_KEY, &descriptor).await?;

        self.request(Message::StartRecording { tab_id: tab }).await?;

        let recorder_tab = match self.launcher.open_recorder(&descriptor).await {
            Ok(recorder_tab) => recorder_tab,
            Err(e) => {
                warn!("Could not open recorder for tab {}: {:#}", tab, e);
                self.roll_back(&descriptor).await?;
                return Err(ControlError::Launch(e));
            }
        };

        if !self.launcher.is_open(recorder_tab).await {
            warn!("Recorder tab {} closed during startup", recorder_tab);
            self.roll_back(&descriptor).await?;
            return Err(ControlError::RecorderClosed(recorder_tab));
        }

        let registered = self
            .request(Message::RegisterRecorderTab {
                recorder_tab_id: recorder_tab,
                target_tab_id: tab,
            })
            .await?;
        if let Reply::Error { error } = registered {
            warn!("Recorder tab {} was not registered: {}", recorder_tab, error);
            self.roll_back(&descriptor).await?;
            return Err(ControlError::RecorderClosed(recorder_tab));
        }

        info!(
            "Recording {} started for tab {} in recorder tab {}",
            descriptor.recording_id, tab, recorder_tab
        );

        Ok(StartedRecording {
            target_tab: tab,
            recorder_tab,
            descriptor,
        })
    }

    /// Stop recording `tab`; the recorder surface hears the same message
    pub async fn stop(&self, tab: TabId) -> Result<bool, ControlError> {
        let lock = self.tab_lock(tab);
        let _serial = lock.lock().await;

        let reply = self.request(Message::StopRecording { tab_id: tab }).await?;
        if let Some(pending) = self.store.pending_session().await? {
            if pending.tab_id == tab {
                self.store.remove(ACTIVE_RECORDING_KEY).await?;
            }
        }

        info!("Stop requested for tab {}", tab);
        Self::recording_flag(reply)
    }

    /// Stored configuration merged over the defaults
    pub async fn config(&self) -> Result<RecordingConfig, ControlError> {
        Ok(self.store.recording_config().await?)
    }

    pub async fn update_config(&self, config: RecordingConfig) -> Result<(), ControlError> {
        match self.request(Message::UpdateConfig { config }).await? {
            Reply::Success { success: true } => Ok(()),
            Reply::Error { error } => Err(ControlError::ConfigRejected(error)),
            other => Err(ControlError::UnexpectedReply(other)),
        }
    }

    /// One-off screenshot of a tab as a data URL
    pub async fn screenshot(&self, tab: TabId) -> Result<String, ControlError> {
        match self.request(Message::TakeScreenshot { tab_id: tab }).await? {
            Reply::Screenshot { data_url } => Ok(data_url),
            Reply::Error { error } => Err(ControlError::Screenshot(error)),
            other => Err(ControlError::UnexpectedReply(other)),
        }
    }

    /// Undo a start whose recorder never came up
    async fn roll_back(&self, descriptor: &SessionDescriptor) -> Result<(), ControlError> {
        self.request(Message::StopRecording {
            tab_id: descriptor.tab_id,
        })
        .await?;
        self.clear_descriptor(descriptor).await
    }

    /// Remove the pending descriptor if a later start has not replaced it
    async fn clear_descriptor(&self, descriptor: &SessionDescriptor) -> Result<(), ControlError> {
        match self.store.pending_session().await? {
            Some(pending) if pending.recording_id == descriptor.recording_id => {
                self.store.remove(ACTIVE_RECORDING_KEY).await?;
            }
            _ => debug!(
                "Pending session moved on from recording {}",
                descriptor.recording_id
            ),
        }
        Ok(())
    }

    fn tab_lock(&self, tab: TabId) -> Arc<Mutex<()>> {
        Arc::clone(self.tab_locks.lock().entry(tab).or_default())
    }

    async fn request(&self, message: Message) -> Result<Reply, ControlError> {
        Ok(self.bus.request(Sender::default(), message).await?)
    }

    fn recording_flag(reply: Reply) -> Result<bool, ControlError> {
        match reply {
            Reply::Recording { recording } => Ok(recording),
            other => Err(ControlError::UnexpectedReply(other)),
        }
    }
}
