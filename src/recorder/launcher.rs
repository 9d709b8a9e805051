use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::surface::{RecorderDeps, RecorderStatus, RecorderSurface};
use crate::host::{HostEvent, HostEvents, TabId};
use crate::session::SessionDescriptor;

/// Page loaded into recorder tabs when nothing else is configured
pub const DEFAULT_RECORDER_URL: &str = "about:blank";

/// Opens recorder surfaces on behalf of the control surface
#[async_trait::async_trait]
pub trait RecorderLauncher: Send + Sync {
    /// Open a new recorder surface for `descriptor` and return its tab id
    ///
    /// The returned id is known before the surface's startup protocol
    /// finishes.
    async fn open_recorder(&self, descriptor: &SessionDescriptor) -> Result<TabId>;

    /// Whether the recorder tab still exists
    async fn is_open(&self, recorder_tab: TabId) -> bool;
}

struct RunningSurface {
    /// `None` while the surface is still starting
    surface: Option<RecorderSurface>,
    status: watch::Receiver<RecorderStatus>,
}

/// Launcher that opens a host tab per recorder surface
#[derive(Clone)]
pub struct SurfaceLauncher {
    inner: Arc<LauncherInner>,
}

struct LauncherInner {
    deps: RecorderDeps,
    recorder_url: String,
    surfaces: Mutex<HashMap<TabId, RunningSurface>>,
}

impl SurfaceLauncher {
    pub fn new(deps: RecorderDeps, recorder_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LauncherInner {
                deps,
                recorder_url: recorder_url.into(),
                surfaces: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The running surface in a recorder tab
    pub fn surface(&self, recorder_tab: TabId) -> Option<RecorderSurface> {
        self.inner
            .surfaces
            .lock()
            .get(&recorder_tab)
            .and_then(|running| running.surface.clone())
    }

    /// Current status of a recorder tab
    pub fn status(&self, recorder_tab: TabId) -> Option<RecorderStatus> {
        self.inner
            .surfaces
            .lock()
            .get(&recorder_tab)
            .map(|running| running.status.borrow().clone())
    }

    pub fn recorder_tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.inner.surfaces.lock().keys().copied().collect();
        tabs.sort();
        tabs
    }

    /// Deliver the page-unload signal to surfaces whose tab the host closed
    pub fn watch_host(&self, events: &HostEvents) -> JoinHandle<()> {
        let launcher = self.clone();
        let mut events = events.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(HostEvent::TabRemoved(tab)) => launcher.on_tab_removed(tab).await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Recorder launcher missed {} host events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn on_tab_removed(&self, tab: TabId) {
        let running = self.inner.surfaces.lock().remove(&tab);
        if let Some(RunningSurface {
            surface: Some(surface), ..
        }) = running
        {
            info!("Recorder tab {} closed, finalizing its recording", tab);
            surface.unload().await;
        }
    }

    async fn run_surface(
        self,
        recorder_tab: TabId,
        descriptor: SessionDescriptor,
        status: watch::Sender<RecorderStatus>,
    ) {
        let deps = self.inner.deps.clone();
        let opened = RecorderSurface::open_with(recorder_tab, descriptor, deps, status).await;
        let surface = match opened {
            Ok(surface) => surface,
            // Already logged and rendered on the status
            Err(_) => return,
        };

        let closed = {
            let mut surfaces = self.inner.surfaces.lock();
            match surfaces.get_mut(&recorder_tab) {
                Some(running) => {
                    running.surface = Some(surface.clone());
                    false
                }
                None => true,
            }
        };
        if closed {
            info!("Recorder tab {} closed during startup", recorder_tab);
            surface.unload().await;
            return;
        }

        surface.wait_stopped().await;
        self.inner.surfaces.lock().remove(&recorder_tab);
    }
}

#[async_trait::async_trait]
impl RecorderLauncher for SurfaceLauncher {
    async fn open_recorder(&self, descriptor: &SessionDescriptor) -> Result<TabId> {
        let recorder_tab = self
            .inner
            .deps
            .tabs
            .open_tab(&self.inner.recorder_url)
            .await
            .context("Failed to open recorder tab")?;

        let (status, status_rx) = watch::channel(RecorderStatus::Starting);
        self.inner.surfaces.lock().insert(
            recorder_tab,
            RunningSurface {
                surface: None,
                status: status_rx,
            },
        );

        info!(
            "Opened recorder tab {} for recording {}",
            recorder_tab, descriptor.recording_id
        );
        let run = self.clone().run_surface(recorder_tab, descriptor.clone(), status);
        tokio::spawn(run);

        Ok(recorder_tab)
    }

    async fn is_open(&self, recorder_tab: TabId) -> bool {
        if !self.inner.surfaces.lock().contains_key(&recorder_tab) {
            return false;
        }
        match self.inner.deps.tabs.get(recorder_tab).await {
            Ok(tab) => tab.is_some(),
            Err(e) => {
                warn!("Could not look up recorder tab {}: {}", recorder_tab, e);
                false
            }
        }
    }
}
