//! Long-lived coordinator
//!
//! The dispatcher owns every piece of per-tab state in the system:
//! - recording flags and the visual indicator
//! - the debugger attachment lifecycle (see `DebuggerState`)
//! - the recorder tab -> target tab mapping
//!
//! Surfaces reach it only through the message bus. Host notifications (tab
//! removed, debugger detached) arrive on the host event channel; the
//! recorder-tab removal path is the only state transition not driven by a
//! message.

pub mod debugger;
pub mod indicator;
pub mod registry;

pub use debugger::{DebuggerError, DebuggerPort, DebuggerState};
pub use indicator::{Badge, RecordingIndicator, TracingIndicator};
pub use registry::{TabRecordingState, TabRegistry};

use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{self, BusClient, Envelope, Message, Publisher, Reply, Sender};
use crate::host::{HostEvent, HostEvents, TabId, Viewport};
use crate::store::{KeyValueStore, KeyValueStoreExt, CONFIG_KEY};

/// What a tab removal meant to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabRemoval {
    /// A recorder tab closed; its target was forced to not recording
    Recorder { target: TabId },
    /// A target tab closed while recording
    Target { recorder: Option<TabId> },
    /// Nothing was recording for this tab
    Untracked,
}

/// Dispatcher state and operations
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    registry: RwLock<TabRegistry>,
    debugger: Arc<dyn DebuggerPort>,
    indicator: Arc<dyn RecordingIndicator>,
    store: Arc<dyn KeyValueStore>,
    /// Serializes attach/command/detach sequences per tab
    capture_locks: SyncMutex<HashMap<TabId, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(
        debugger: Arc<dyn DebuggerPort>,
        indicator: Arc<dyn RecordingIndicator>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(TabRegistry::new()),
                debugger,
                indicator,
                store,
                capture_locks: SyncMutex::new(HashMap::new()),
            }),
        }
    }

    /// Set the recording flag and badge for a tab. Idempotent.
    ///
    /// Clearing the flag releases an idle debugger attachment, waiting for
    /// any capture in progress on that tab first.
    pub async fn set_recording(&self, tab: TabId, recording: bool) -> bool {
        let (changed, attached) = {
            let mut registry = self.inner.registry.write().await;
            let changed = registry.set_recording(tab, recording);
            (changed, registry.debugger_state(tab).is_attached())
        };

        if changed {
            info!("Tab {} recording={}", tab, recording);
        }
        self.inner.indicator.update(tab, Badge::for_state(recording));

        if !recording && attached {
            self.release_idle_attachment(tab).await;
        }

        recording
    }

    pub async fn recording_state(&self, tab: TabId) -> bool {
        self.inner.registry.read().await.is_recording(tab)
    }

    pub async fn debugger_state(&self, tab: TabId) -> DebuggerState {
        self.inner.registry.read().await.debugger_state(tab)
    }

    pub async fn recording_tabs(&self) -> Vec<TabId> {
        self.inner.registry.read().await.recording_tabs()
    }

    /// Clear the recording flag on behalf of `from`
    ///
    /// `None` is the control surface or the dispatcher itself; that ends the
    /// run and retires its recorder. A recorder tab may only stop the run it
    /// owns: a stop from a retired recorder, or from one that has since been
    /// replaced, leaves the flag alone. Returns the flag afterwards.
    pub async fn stop_recording(&self, tab: TabId, from: Option<TabId>) -> bool {
        let accepted = {
            let mut registry = self.inner.registry.write().await;
            match from {
                Some(recorder) => {
                    let replaced = registry
                        .recorder_for_target(tab)
                        .is_some_and(|current| current != recorder);
                    if registry.is_retired(recorder) || replaced {
                        false
                    } else {
                        registry.retire_recorder(recorder);
                        true
                    }
                }
                None => {
                    if let Some(recorder) = registry.recorder_for_target(tab) {
                        registry.retire_recorder(recorder);
                    }
                    true
                }
            }
        };

        if accepted {
            self.set_recording(tab, false).await
        } else {
            debug!("Ignoring stale stop for tab {} from recorder tab {:?}", tab, from);
            self.recording_state(tab).await
        }
    }

    /// Install the recorder -> target mapping
    ///
    /// Returns false, leaving the registry untouched, when the recorder has
    /// already finished.
    pub async fn register_recorder_tab(&self, recorder: TabId, target: TabId) -> bool {
        let evicted = {
            let mut registry = self.inner.registry.write().await;
            if registry.is_retired(recorder) {
                warn!(
                    "Recorder tab {} already finished, not registering it for tab {}",
                    recorder, target
                );
                return false;
            }
            registry.register_recorder(recorder, target)
        };
        if let Some(evicted) = evicted {
            warn!(
                "Recorder tab {} replaced tab {} for target tab {}",
                recorder, evicted, target
            );
        }
        info!("Registered recorder tab {} for target tab {}", recorder, target);
        true
    }

    pub async fn recorder_target(&self, recorder: TabId) -> Option<TabId> {
        self.inner.registry.read().await.target_of(recorder)
    }

    /// Capture the visible contents of a tab as a PNG data URL
    ///
    /// Attaches the debugger lazily; an existing attachment is reused. Calls
    /// for the same tab run one at a time.
    pub async fn capture_screenshot(
        &self,
        tab: TabId,
        viewport: Option<Viewport>,
    ) -> Result<String, DebuggerError> {
        let lock = self.capture_lock(tab);
        let _serial = lock.lock().await;

        self.ensure_attached(tab).await?;

        let capturing = self
            .inner
            .registry
            .write()
            .await
            .transition_debugger(tab, DebuggerState::Attached, DebuggerState::Capturing);
        if !capturing {
            return Err(DebuggerError::Detached {
                tab,
                reason: "detached before capture".to_string(),
            });
        }

        match self.issue_capture(tab, viewport).await {
            Ok(data_url) => {
                let release = {
                    let mut registry = self.inner.registry.write().await;
                    registry.transition_debugger(
                        tab,
                        DebuggerState::Capturing,
                        DebuggerState::Attached,
                    );
                    !registry.is_recording(tab)
                        && registry.debugger_state(tab) == DebuggerState::Attached
                };
                if release {
                    self.detach(tab).await;
                }
                Ok(data_url)
            }
            Err(e) => {
                warn!("Screenshot of tab {} failed: {}", tab, e);
                self.abandon_attachment(tab).await;
                Err(e)
            }
        }
    }

    /// The host tore down an attachment (devtools opened, tab crashed, ...)
    pub async fn on_debugger_detached(&self, tab: TabId, reason: &str) {
        let mut registry = self.inner.registry.write().await;
        if registry.debugger_state(tab) != DebuggerState::Detached {
            registry.set_debugger_state(tab, DebuggerState::Detached);
            warn!("Debugger detached from tab {}: {}", tab, reason);
        }
    }

    /// React to a closed tab
    pub async fn on_tab_removed(&self, tab: TabId) -> TabRemoval {
        // Whatever the tab was, it can no longer own a run
        let target = self.inner.registry.write().await.retire_recorder(tab);
        if let Some(target) = target {
            info!(
                "Recorder tab {} closed, stopping recording for target tab {}",
                tab, target
            );
            self.set_recording(target, false).await;
            self.inner.registry.write().await.forget_tab(tab);
            return TabRemoval::Recorder { target };
        }

        let removal = {
            let mut registry = self.inner.registry.write().await;
            let was_recording = registry.is_recording(tab);
            let recorder = registry.recorder_for_target(tab);
            if let Some(recorder) = recorder {
                registry.retire_recorder(recorder);
            }
            registry.forget_tab(tab);

            if was_recording {
                TabRemoval::Target { recorder }
            } else {
                TabRemoval::Untracked
            }
        };
        self.inner.capture_locks.lock().remove(&tab);

        if let TabRemoval::Target { recorder } = removal {
            warn!(
                "Target tab {} closed while recording (recorder tab {:?})",
                tab, recorder
            );
        }

        removal
    }

    /// Answer one bus message
    pub async fn handle(&self, sender: Sender, message: Message) -> Reply {
        debug!("dispatcher received {:?} from {:?}", message, sender.tab);

        match message {
            Message::UpdateConfig { config } => {
                match self.inner.store.set_typed(CONFIG_KEY, &config.normalized()).await {
                    Ok(()) => Reply::ok(),
                    Err(e) => {
                        error!("Failed to persist config: {}", e);
                        Reply::error(e.to_string())
                    }
                }
            }
            Message::StartRecording { tab_id } => Reply::Recording {
                recording: self.set_recording(tab_id, true).await,
            },
            Message::StopRecording { tab_id } => Reply::Recording {
                recording: self.stop_recording(tab_id, sender.tab).await,
            },
            Message::GetRecordingState { tab_id } => Reply::Recording {
                recording: self.recording_state(tab_id).await,
            },
            Message::TakeScreenshot { tab_id } => {
                match self.capture_screenshot(tab_id, sender.viewport).await {
                    Ok(data_url) => Reply::Screenshot { data_url },
                    Err(e) => Reply::error(e.to_string()),
                }
            }
            Message::RegisterRecorderTab {
                recorder_tab_id,
                target_tab_id,
            } => {
                if self.register_recorder_tab(recorder_tab_id, target_tab_id).await {
                    Reply::ok()
                } else {
                    Reply::error(format!("Recorder tab {} is closed", recorder_tab_id))
                }
            }
            Message::RequestTabCapture { tab_id, capture_audio } => {
                // Acknowledgement only; the stream is acquired by the recorder surface
                info!(
                    "Tab capture requested for tab {} (audio={})",
                    tab_id, capture_audio
                );
                Reply::ok()
            }
        }
    }

    fn capture_lock(&self, tab: TabId) -> Arc<Mutex<()>> {
        Arc::clone(self.inner.capture_locks.lock().entry(tab).or_default())
    }

    async fn ensure_attached(&self, tab: TabId) -> Result<(), DebuggerError> {
        {
            let mut registry = self.inner.registry.write().await;
            if registry.debugger_state(tab).is_attached() {
                return Ok(());
            }
            registry.set_debugger_state(tab, DebuggerState::Attaching);
        }

        debug!("Attaching debugger to tab {}", tab);
        match self.inner.debugger.attach(tab).await {
            Ok(()) => {
                let attached = self
                    .inner
                    .registry
                    .write()
                    .await
                    .transition_debugger(tab, DebuggerState::Attaching, DebuggerState::Attached);
                if attached {
                    Ok(())
                } else {
                    Err(DebuggerError::Detached {
                        tab,
                        reason: "detached while attaching".to_string(),
                    })
                }
            }
            Err(e) => {
                self.inner
                    .registry
                    .write()
                    .await
                    .transition_debugger(tab, DebuggerState::Attaching, DebuggerState::Detached);
                Err(e)
            }
        }
    }

    async fn issue_capture(
        &self,
        tab: TabId,
        viewport: Option<Viewport>,
    ) -> Result<String, DebuggerError> {
        let debugger = &self.inner.debugger;
        debugger
            .send_command(tab, "Page.enable", serde_json::json!({}))
            .await?;
        let result = debugger
            .send_command(tab, "Page.captureScreenshot", debugger::capture_params(viewport))
            .await?;
        debugger::data_url_from_capture(&result)
    }

    /// Drop whatever attachment a failed capture left behind
    async fn abandon_attachment(&self, tab: TabId) {
        let attached = self.inner.registry.read().await.debugger_state(tab).is_attached();
        if attached {
            if let Err(e) = self.inner.debugger.detach(tab).await {
                debug!("Detach after failed capture of tab {}: {}", tab, e);
            }
        }
        self.inner
            .registry
            .write()
            .await
            .set_debugger_state(tab, DebuggerState::Detached);
    }

    async fn release_idle_attachment(&self, tab: TabId) {
        let lock = self.capture_lock(tab);
        let _serial = lock.lock().await;

        let idle = {
            let registry = self.inner.registry.read().await;
            !registry.is_recording(tab) && registry.debugger_state(tab) == DebuggerState::Attached
        };
        if idle {
            self.detach(tab).await;
        }
    }

    async fn detach(&self, tab: TabId) {
        if let Err(e) = self.inner.debugger.detach(tab).await {
            warn!("Failed to detach debugger from tab {}: {}", tab, e);
        }
        self.inner
            .registry
            .write()
            .await
            .set_debugger_state(tab, DebuggerState::Detached);
        debug!("Detached debugger from tab {}", tab);
    }
}

/// Event loop driving a `Dispatcher`
pub struct DispatcherService {
    dispatcher: Dispatcher,
    publisher: Publisher,
    requests: mpsc::Receiver<Envelope>,
    host_events: broadcast::Receiver<HostEvent>,
}

impl DispatcherService {
    pub fn new(
        dispatcher: Dispatcher,
        publisher: Publisher,
        requests: mpsc::Receiver<Envelope>,
        host_events: broadcast::Receiver<HostEvent>,
    ) -> Self {
        Self {
            dispatcher,
            publisher,
            requests,
            host_events,
        }
    }

    /// Serve requests and host events until every bus client is gone
    pub async fn run(mut self) {
        info!("Dispatcher started");
        let mut host_open = true;

        loop {
            tokio::select! {
                envelope = self.requests.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope),
                    None => break,
                },
                event = self.host_events.recv(), if host_open => match event {
                    Ok(event) => self.on_host_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Dispatcher missed {} host events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => host_open = false,
                },
            }
        }

        info!("Dispatcher stopped");
    }

    fn dispatch(&self, envelope: Envelope) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let Envelope { sender, message, reply } = envelope;
            let response = dispatcher.handle(sender, message).await;
            if let Some(reply) = reply {
                // The requester may have gone away; nothing to do then
                let _ = reply.send(response);
            }
        });
    }

    async fn on_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::TabRemoved(tab) => {
                if let TabRemoval::Target { .. } = self.dispatcher.on_tab_removed(tab).await {
                    // Let the recorder surface finalize the run
                    let stop = Message::StopRecording { tab_id: tab };
                    self.publisher.publish(Sender::default(), &stop);
                }
            }
            HostEvent::DebuggerDetached { tab, reason } => {
                self.dispatcher.on_debugger_detached(tab, &reason).await;
            }
        }
    }
}

/// Start a dispatcher on its own task and return the bus surfaces use to
/// reach it
pub fn spawn(dispatcher: Dispatcher, host_events: &HostEvents) -> (BusClient, JoinHandle<()>) {
    let (bus, requests) = bus::channel(256);
    let service = DispatcherService::new(
        dispatcher,
        bus.publisher(),
        requests,
        host_events.subscribe(),
    );
    let handle = tokio::spawn(service.run());
    (bus, handle)
}
