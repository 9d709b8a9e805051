use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::buffer::AudioChunkBuffer;
use super::capture::{CaptureOptions, MediaStream, TabCapture, AUDIO_MIME_TYPE};
use super::delivery::{AudioBatch, Delivery, ScreenshotArtifact};
use super::error::RecordingError;
use super::naming::FALLBACK_TITLE;
use crate::bus::{Broadcast, BusClient, Message, Reply, Sender};
use crate::host::{ArtifactSink, TabHost, TabId, Viewport};
use crate::server::ServerClient;
use crate::session::{DeliveryMode, RecordingSession, SessionDescriptor, SessionStats};
use crate::store::{KeyValueStore, KeyValueStoreExt};

/// Shown when the user tries to leave a recorder tab that is still recording
pub const UNLOAD_WARNING: &str = "Are you sure you want to leave? The recording will be lost.";

/// How long stop waits for the capture stream to hand over its last chunk
const FINAL_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// What the recorder tab shows the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderStatus {
    Starting,
    /// The collaborator server could not open a session; delivering locally
    ServerUnavailable,
    Recording { audio: bool },
    Stopping,
    Stopped { delivery_mode: DeliveryMode },
    Failed { error: String },
}

impl RecorderStatus {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }
}

impl fmt::Display for RecorderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("Requesting tab audio capture..."),
            Self::ServerUnavailable => {
                f.write_str("Server unavailable, falling back to local recording.")
            }
            Self::Recording { audio: true } => f.write_str("Recording..."),
            Self::Recording { audio: false } => f.write_str("Recording... (screenshots only)"),
            Self::Stopping => f.write_str("Stopping..."),
            Self::Stopped {
                delivery_mode: DeliveryMode::Streaming,
            } => f.write_str("Recording stopped and sent to server."),
            Self::Stopped {
                delivery_mode: DeliveryMode::Local,
            } => f.write_str("Recording stopped and downloaded."),
            Self::Failed { error } => f.write_str(error),
        }
    }
}

/// Host services a recorder surface runs against
#[derive(Clone)]
pub struct RecorderDeps {
    pub bus: BusClient,
    pub store: Arc<dyn KeyValueStore>,
    pub tabs: Arc<dyn TabHost>,
    pub capture: Arc<dyn TabCapture>,
    pub sink: Arc<dyn ArtifactSink>,
}

#[derive(Debug, Default)]
struct DeliveryCounters {
    screenshots: AtomicUsize,
    audio_batches: AtomicUsize,
    failed: AtomicUsize,
}

/// Everything startup settles before the loops run
struct Prepared {
    session: RecordingSession,
    viewport: Option<Viewport>,
    delivery: Delivery,
    stream: Option<(Box<dyn MediaStream>, mpsc::Receiver<Vec<u8>>)>,
}

/// The ephemeral context that owns one recording run
///
/// Cheap to clone; clones share the same run.
#[derive(Clone)]
pub struct RecorderSurface {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    session: RecordingSession,
    viewport: Option<Viewport>,
    bus: BusClient,
    tabs: Arc<dyn TabHost>,
    delivery: Delivery,
    buffer: AudioChunkBuffer,
    audio_mime: String,
    counters: DeliveryCounters,
    started_at: DateTime<Utc>,
    started: Instant,
    status: watch::Sender<RecorderStatus>,
    /// Flipped once by stop; every loop exits on it
    shutdown: watch::Sender<bool>,
    stream: Mutex<Option<Box<dyn MediaStream>>>,
    pump: SyncMutex<Option<JoinHandle<()>>>,
    loops: SyncMutex<Vec<JoinHandle<()>>>,
    stopping: AtomicBool,
    stopped: watch::Sender<Option<SessionStats>>,
}

impl RecorderSurface {
    /// Run the startup protocol in the recorder tab `recorder_tab`
    ///
    /// Reads the pending session from the store, settles the delivery mode,
    /// acquires the capture stream and starts both delivery loops. Fatal
    /// errors are rendered on `status` before they are returned.
    pub async fn open(
        recorder_tab: TabId,
        deps: RecorderDeps,
        status: watch::Sender<RecorderStatus>,
    ) -> Result<Self, RecordingError> {
        status.send_replace(RecorderStatus::Starting);
        let messages = deps.bus.subscribe();

        let pending = deps
            .store
            .pending_session()
            .await
            .map_err(RecordingError::from)
            .and_then(|pending| pending.ok_or(RecordingError::NoTargetTab));
        let descriptor = match pending {
            Ok(descriptor) => descriptor,
            Err(e) => return Err(Self::failed(recorder_tab, &status, e)),
        };
        Self::start(recorder_tab, descriptor, deps, status, messages).await
    }

    /// Like `open`, for a session whose descriptor came with the launch
    ///
    /// The shared store only holds the most recent descriptor, so a later
    /// start for another tab may already have replaced it.
    pub async fn open_with(
        recorder_tab: TabId,
        descriptor: SessionDescriptor,
        deps: RecorderDeps,
        status: watch::Sender<RecorderStatus>,
    ) -> Result<Self, RecordingError> {
        status.send_replace(RecorderStatus::Starting);
        let messages = deps.bus.subscribe();

        match deps.store.pending_session().await {
            Ok(Some(pending)) if pending.recording_id != descriptor.recording_id => debug!(
                "Pending session is now recording {}; recorder tab {} keeps recording {}",
                pending.recording_id, recorder_tab, descriptor.recording_id
            ),
            Ok(_) => {}
            Err(e) => warn!("Could not read the pending session: {}", e),
        }
        Self::start(recorder_tab, descriptor, deps, status, messages).await
    }

    fn failed(
        recorder_tab: TabId,
        status: &watch::Sender<RecorderStatus>,
        e: RecordingError,
    ) -> RecordingError {
        error!("Recorder tab {} failed to start: {}", recorder_tab, e);
        status.send_replace(RecorderStatus::Failed {
            error: e.to_string(),
        });
        e
    }

    async fn start(
        recorder_tab: TabId,
        descriptor: SessionDescriptor,
        deps: RecorderDeps,
        status: watch::Sender<RecorderStatus>,
        // Subscribed before startup so a stop sent meanwhile is not missed
        messages: broadcast::Receiver<Broadcast>,
    ) -> Result<Self, RecordingError> {
        let prepared = match Self::prepare(recorder_tab, descriptor, &deps, &status).await {
            Ok(prepared) => prepared,
            Err(e) => return Err(Self::failed(recorder_tab, &status, e)),
        };

        let Prepared {
            session,
            viewport,
            delivery,
            stream,
        } = prepared;
        let capture_audio = stream.is_some();
        let (shutdown, _) = watch::channel(false);
        let (stopped, _) = watch::channel(None);

        let audio_mime = stream
            .as_ref()
            .map(|(stream, _)| stream.mime_type().to_string())
            .filter(|mime| !mime.is_empty())
            .unwrap_or_else(|| AUDIO_MIME_TYPE.to_string());
        let (stream, chunks) = match stream {
            Some((stream, chunks)) => (Some(stream), Some(chunks)),
            None => (None, None),
        };

        let surface = Self {
            inner: Arc::new(SurfaceInner {
                session,
                viewport,
                bus: deps.bus,
                tabs: deps.tabs,
                delivery,
                buffer: AudioChunkBuffer::new(),
                audio_mime,
                counters: DeliveryCounters::default(),
                started_at: Utc::now(),
                started: Instant::now(),
                status,
                shutdown,
                stream: Mutex::new(stream),
                pump: SyncMutex::new(None),
                loops: SyncMutex::new(Vec::new()),
                stopping: AtomicBool::new(false),
                stopped,
            }),
        };

        if let Some(chunks) = chunks {
            let pump = tokio::spawn(surface.clone().pump(chunks));
            *surface.inner.pump.lock() = Some(pump);

            let shutdown = surface.inner.shutdown.subscribe();
            let audio_loop = tokio::spawn(surface.clone().audio_loop(shutdown));
            surface.inner.loops.lock().push(audio_loop);
        }
        if surface.inner.session.config.capture_screenshots {
            let shutdown = surface.inner.shutdown.subscribe();
            let screenshot_loop = tokio::spawn(surface.clone().screenshot_loop(shutdown));
            surface.inner.loops.lock().push(screenshot_loop);
        }
        let shutdown = surface.inner.shutdown.subscribe();
        tokio::spawn(surface.clone().stop_listener(messages, shutdown));

        let session = &surface.inner.session;
        info!(
            "Recording {} started: target tab {}, recorder tab {}, {} delivery",
            session.recording_id,
            session.target_tab_id,
            session.recorder_tab_id,
            session.delivery_mode
        );
        surface
            .inner
            .status
            .send_replace(RecorderStatus::Recording { audio: capture_audio });

        Ok(surface)
    }

    async fn prepare(
        recorder_tab: TabId,
        mut descriptor: SessionDescriptor,
        deps: &RecorderDeps,
        status: &watch::Sender<RecorderStatus>,
    ) -> Result<Prepared, RecordingError> {
        descriptor.config = descriptor.config.normalized();
        let target = descriptor.tab_id;
        let config = &descriptor.config;

        let tab = match deps.tabs.get(target).await {
            Ok(tab) => tab,
            Err(e) => {
                warn!("Could not look up target tab {}: {}", target, e);
                None
            }
        };
        let title = tab
            .as_ref()
            .map(|tab| tab.title.clone())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());
        let viewport = tab.and_then(|tab| tab.viewport);

        // The delivery mode is settled here and never revisited
        let local = || Delivery::Local {
            sink: Arc::clone(&deps.sink),
            title: title.clone(),
        };
        let (session, delivery) = if config.stream_to_server {
            match Self::open_server_session(&config.server_url, &title).await {
                Ok((server, session_id)) => (
                    RecordingSession::streaming(&descriptor, recorder_tab, session_id.clone()),
                    Delivery::Streaming { server, session_id },
                ),
                Err(e) => {
                    warn!("{}; falling back to local recording", e);
                    status.send_replace(RecorderStatus::ServerUnavailable);
                    (RecordingSession::local(&descriptor, recorder_tab), local())
                }
            }
        } else {
            (RecordingSession::local(&descriptor, recorder_tab), local())
        };

        match Self::acquire_stream(recorder_tab, target, config.capture_audio, deps).await {
            Ok(stream) => Ok(Prepared {
                session,
                viewport,
                delivery,
                stream,
            }),
            Err(e) => {
                // Leave nothing behind: no open server session, no recording flag
                if let Err(end) = delivery.finish().await {
                    warn!("Could not end server session after failed start: {}", end);
                }
                let stop = Message::StopRecording { tab_id: target };
                if let Err(notify) = deps.bus.notify(Sender::tab(recorder_tab), stop).await {
                    warn!("Could not clear recording flag for tab {}: {}", target, notify);
                }
                Err(e)
            }
        }
    }

    async fn open_server_session(
        server_url: &str,
        title: &str,
    ) -> Result<(ServerClient, String), RecordingError> {
        let server = ServerClient::new(server_url)?;
        let session_id = server.start_session(title).await?;
        info!("Streaming to {} as session {}", server.base_url(), session_id);
        Ok((server, session_id))
    }

    /// Two-phase capture handshake: dispatcher ack, then the capture call
    async fn acquire_stream(
        recorder_tab: TabId,
        target: TabId,
        capture_audio: bool,
        deps: &RecorderDeps,
    ) -> Result<Option<(Box<dyn MediaStream>, mpsc::Receiver<Vec<u8>>)>, RecordingError> {
        let ack = deps
            .bus
            .request(
                Sender::tab(recorder_tab),
                Message::RequestTabCapture {
                    tab_id: target,
                    capture_audio,
                },
            )
            .await
            .map_err(|e| RecordingError::CaptureGrantDenied(e.to_string()))?;
        match ack {
            Reply::Success { success: true } => {}
            Reply::Error { error } => return Err(RecordingError::CaptureGrantDenied(error)),
            _ => {
                return Err(RecordingError::CaptureGrantDenied(
                    "Unknown error".to_string(),
                ))
            }
        }

        let granted = deps
            .capture
            .capture(target, CaptureOptions::audio_only(capture_audio))
            .await;
        let mut stream = match granted {
            Ok(Some(stream)) if capture_audio => stream,
            Ok(Some(mut stream)) => {
                stream.release_tracks();
                return Ok(None);
            }
            Ok(None) if capture_audio => {
                return Err(RecordingError::CaptureGrantDenied(
                    "no audio stream granted".to_string(),
                ));
            }
            Ok(None) => return Ok(None),
            Err(e) if capture_audio => {
                return Err(RecordingError::CaptureGrantDenied(e.to_string()));
            }
            Err(e) => {
                debug!("Capture call failed without audio requested: {}", e);
                return Ok(None);
            }
        };

        match stream.start().await {
            Ok(chunks) => {
                info!("Capturing audio from {}", stream.name());
                Ok(Some((stream, chunks)))
            }
            Err(e) => {
                stream.release_tracks();
                Err(RecordingError::CaptureGrantDenied(e.to_string()))
            }
        }
    }

    pub fn recorder_tab(&self) -> TabId {
        self.inner.session.recorder_tab_id
    }

    pub fn target_tab(&self) -> TabId {
        self.inner.session.target_tab_id
    }

    pub fn session(&self) -> &RecordingSession {
        &self.inner.session
    }

    pub fn status(&self) -> watch::Receiver<RecorderStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.borrow().is_some()
    }

    /// Warning to show when the page is about to unload, while recording
    pub fn before_unload(&self) -> Option<&'static str> {
        if self.inner.stopping.load(Ordering::SeqCst) {
            None
        } else {
            Some(UNLOAD_WARNING)
        }
    }

    pub fn stats(&self) -> SessionStats {
        let counters = &self.inner.counters;
        SessionStats {
            is_recording: !self.inner.stopping.load(Ordering::SeqCst),
            delivery_mode: self.inner.delivery.mode(),
            server_session_id: self.inner.session.server_session_id.clone(),
            started_at: self.inner.started_at,
            duration_secs: self.inner.started.elapsed().as_secs_f64(),
            screenshots_delivered: counters.screenshots.load(Ordering::SeqCst),
            audio_batches_delivered: counters.audio_batches.load(Ordering::SeqCst),
            deliveries_failed: counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Stop the run and close the recorder tab
    ///
    /// Idempotent: a second caller waits for the first and gets the same
    /// stats.
    pub async fn stop(&self) -> SessionStats {
        self.finalize(true).await
    }

    /// Page-unload signal: the recorder tab is already going away
    pub async fn unload(&self) -> SessionStats {
        self.finalize(false).await
    }

    /// Resolve once the run has been finalized
    pub async fn wait_stopped(&self) -> SessionStats {
        let mut stopped = self.inner.stopped.subscribe();
        loop {
            if let Some(stats) = stopped.borrow_and_update().clone() {
                return stats;
            }
            if stopped.changed().await.is_err() {
                return self.stats();
            }
        }
    }

    async fn finalize(&self, close_surface: bool) -> SessionStats {
        let inner = &self.inner;
        if inner
            .stopping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self.wait_stopped().await;
        }

        let target = self.target_tab();
        info!("Stopping recording {} for tab {}", inner.session.recording_id, target);
        inner.status.send_replace(RecorderStatus::Stopping);

        // 1. Timers; a delivery already in flight completes first
        inner.shutdown.send_replace(true);
        let loops = std::mem::take(&mut *inner.loops.lock());
        for handle in loops {
            if let Err(e) = handle.await {
                warn!("Recorder loop ended abnormally: {}", e);
            }
        }

        // 2. Stop the recorder and deliver its final flush; 3. release tracks
        let stream = inner.stream.lock().await.take();
        if let Some(mut stream) = stream {
            if stream.is_capturing() {
                if let Err(e) = stream.stop().await {
                    warn!("Stopping {} failed: {}", stream.name(), e);
                    stream.release_tracks();
                }
            }
            self.drain_pump().await;
            if inner.buffer.is_empty() {
                debug!("No audio left to flush for tab {}", target);
            } else {
                self.deliver_audio_batch().await;
            }
            stream.release_tracks();
        }

        // 4. Last screenshot
        if inner.session.config.capture_screenshots {
            match inner.tabs.get(target).await {
                Ok(None) => warn!(
                    "{}; skipping final screenshot",
                    RecordingError::TabClosedUnexpectedly(target)
                ),
                _ => self.take_screenshot().await,
            }
        }

        // 5. Remote session
        if let Err(e) = inner.delivery.finish().await {
            warn!("Could not end session on server: {}", e);
        }

        // 6. Dispatcher flag
        let stop = Message::StopRecording { tab_id: target };
        if let Err(e) = inner.bus.notify(Sender::tab(self.recorder_tab()), stop).await {
            warn!("Could not notify dispatcher of stop for tab {}: {}", target, e);
        }

        // 7. Surface
        if close_surface {
            if let Err(e) = inner.tabs.close_tab(self.recorder_tab()).await {
                debug!("Recorder tab {} already gone: {}", self.recorder_tab(), e);
            }
        }

        let stats = self.stats();
        info!(
            "Recording {} stopped: {} screenshots, {} audio batches, {} failed deliveries",
            inner.session.recording_id,
            stats.screenshots_delivered,
            stats.audio_batches_delivered,
            stats.deliveries_failed
        );
        inner.status.send_replace(RecorderStatus::Stopped {
            delivery_mode: stats.delivery_mode,
        });
        inner.stopped.send_replace(Some(stats.clone()));
        stats
    }

    async fn drain_pump(&self) {
        let pump = self.inner.pump.lock().take();
        if let Some(pump) = pump {
            let abort = pump.abort_handle();
            if time::timeout(FINAL_FLUSH_TIMEOUT, pump).await.is_err() {
                warn!("Capture stream did not close after stop; dropping its tail");
                abort.abort();
            }
        }
    }

    async fn pump(self, mut chunks: mpsc::Receiver<Vec<u8>>) {
        while let Some(chunk) = chunks.recv().await {
            self.inner.buffer.push(chunk);
        }
        debug!("Audio stream for tab {} closed", self.target_tab());
    }

    async fn screenshot_loop(self, mut shutdown: watch::Receiver<bool>) {
        // First tick fires immediately
        let mut ticker = time::interval(self.inner.session.config.screenshot_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.take_screenshot().await,
            }
        }
    }

    async fn audio_loop(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.inner.session.config.audio_batch_interval();
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.deliver_audio_batch().await,
            }
        }
    }

    /// Finalize when the control surface or the dispatcher stops the target
    ///
    /// Stops sent by recorder surfaces only report their own run ending, and
    /// may belong to an earlier run for the same tab.
    async fn stop_listener(
        self,
        mut messages: broadcast::Receiver<Broadcast>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let target = self.target_tab();
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                received = messages.recv() => received,
            };

            match received {
                Ok(Broadcast {
                    sender,
                    message: Message::StopRecording { tab_id },
                }) if tab_id == target && sender.tab.is_none() => {
                    info!("Stop requested for tab {}", target);
                    // Stop waits on this task's siblings, so run it elsewhere
                    let surface = self.clone();
                    tokio::spawn(async move {
                        surface.stop().await;
                    });
                    return;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(
                        "Recorder tab {} missed {} bus messages",
                        self.recorder_tab(),
                        missed
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn take_screenshot(&self) {
        match self.capture_and_deliver_screenshot().await {
            Ok(()) => {
                self.inner.counters.screenshots.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!("Dropped screenshot of tab {}: {}", self.target_tab(), e);
                self.inner.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn capture_and_deliver_screenshot(&self) -> Result<(), RecordingError> {
        let sender = Sender::tab(self.recorder_tab()).with_viewport(self.inner.viewport);
        let reply = self
            .inner
            .bus
            .request(
                sender,
                Message::TakeScreenshot {
                    tab_id: self.target_tab(),
                },
            )
            .await?;

        let data_url = match reply {
            Reply::Screenshot { data_url } => data_url,
            Reply::Error { error } => return Err(RecordingError::Screenshot(error)),
            _ => return Err(RecordingError::Screenshot("No screenshot data".to_string())),
        };

        let screenshot = ScreenshotArtifact::from_data_url(&data_url)?;
        self.inner.delivery.deliver_screenshot(screenshot).await?;
        Ok(())
    }

    /// Drain the buffer and deliver it as one batch; empty drains do nothing
    async fn deliver_audio_batch(&self) {
        let Some(data) = self.inner.buffer.drain_batch() else {
            return;
        };
        let size = data.len();

        match self
            .inner
            .delivery
            .deliver_audio(AudioBatch::new(data, &self.inner.audio_mime))
            .await
        {
            Ok(()) => {
                self.inner.counters.audio_batches.fetch_add(1, Ordering::SeqCst);
                debug!("Delivered audio batch of {} bytes", size);
            }
            Err(e) => {
                warn!("Dropped audio batch of {} bytes: {}", size, e);
                self.inner.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
