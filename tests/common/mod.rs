// Shared fakes for integration tests
//
// Every host trait gets an in-memory stand-in, plus a mock collaborator
// server bound to an ephemeral port.

#![allow(dead_code)]

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tab_recorder::bus::BusClient;
use tab_recorder::dispatcher::{
    self, Badge, DebuggerError, DebuggerPort, Dispatcher, RecordingIndicator,
};
use tab_recorder::host::{
    self, ArtifactSink, HostError, HostEvent, HostEvents, TabHost, TabId, TabInfo, Viewport,
};
use tab_recorder::recorder::{
    CaptureError, CaptureOptions, MediaStream, RecorderDeps, TabCapture,
};
use tab_recorder::session::{RecordingConfig, SessionDescriptor};
use tab_recorder::store::{KeyValueStoreExt, MemoryStore, ACTIVE_RECORDING_KEY};
use tokio::sync::mpsc;

/// Bytes the fake debugger returns as a screenshot
pub const PNG_BYTES: &[u8] = b"\x89PNG fake image";

// ============================================================================
// Debugger
// ============================================================================

#[derive(Default)]
pub struct FakeDebugger {
    pub attaches: AtomicUsize,
    pub detaches: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
    pub fail_attach: AtomicBool,
    pub fail_capture: AtomicBool,
    busy: AtomicBool,
    /// Set if two operations ever ran at the same time
    pub overlapped: AtomicBool,
}

impl FakeDebugger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    fn exit(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl DebuggerPort for FakeDebugger {
    async fn attach(&self, tab: TabId) -> Result<(), DebuggerError> {
        self.enter().await;
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.exit();

        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(DebuggerError::Attach {
                tab,
                message: "Cannot access a chrome:// URL".to_string(),
            });
        }
        Ok(())
    }

    async fn detach(&self, _tab: TabId) -> Result<(), DebuggerError> {
        self.enter().await;
        self.detaches.fetch_add(1, Ordering::SeqCst);
        self.exit();
        Ok(())
    }

    async fn send_command(
        &self,
        _tab: TabId,
        method: &str,
        _params: Value,
    ) -> Result<Value, DebuggerError> {
        self.enter().await;
        self.commands.lock().push(method.to_string());
        self.exit();

        match method {
            "Page.captureScreenshot" if self.fail_capture.load(Ordering::SeqCst) => {
                Err(DebuggerError::Command {
                    method: method.to_string(),
                    message: "Target closed".to_string(),
                })
            }
            "Page.captureScreenshot" => Ok(json!({
                "data": base64::engine::general_purpose::STANDARD.encode(PNG_BYTES),
            })),
            _ => Ok(json!({})),
        }
    }
}

// ============================================================================
// Indicator
// ============================================================================

#[derive(Default)]
pub struct BadgeSpy {
    pub badges: Mutex<Vec<(TabId, Badge)>>,
}

impl BadgeSpy {
    pub fn last(&self, tab: TabId) -> Option<Badge> {
        self.badges
            .lock()
            .iter()
            .rev()
            .find(|(t, _)| *t == tab)
            .map(|(_, badge)| *badge)
    }
}

impl RecordingIndicator for BadgeSpy {
    fn update(&self, tab: TabId, badge: Badge) {
        self.badges.lock().push((tab, badge));
    }
}

// ============================================================================
// Tabs
// ============================================================================

pub struct FakeTabs {
    tabs: Mutex<HashMap<TabId, TabInfo>>,
    next_id: AtomicU32,
    pub closed: Mutex<Vec<TabId>>,
    events: Option<HostEvents>,
}

impl FakeTabs {
    pub fn new(events: Option<HostEvents>) -> Arc<Self> {
        Arc::new(Self {
            tabs: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(100),
            closed: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn add(&self, tab: TabId, title: &str) {
        self.tabs.lock().insert(
            tab,
            TabInfo {
                id: tab,
                title: title.to_string(),
                url: "https://example.com/".to_string(),
                viewport: Some(Viewport {
                    width: 1280,
                    height: 720,
                }),
            },
        );
    }

    /// Simulate the user closing a tab
    pub fn remove(&self, tab: TabId) {
        self.tabs.lock().remove(&tab);
        if let Some(events) = &self.events {
            let _ = events.send(HostEvent::TabRemoved(tab));
        }
    }

    pub fn was_closed(&self, tab: TabId) -> bool {
        self.closed.lock().contains(&tab)
    }
}

#[async_trait::async_trait]
impl TabHost for FakeTabs {
    async fn get(&self, tab: TabId) -> Result<Option<TabInfo>, HostError> {
        Ok(self.tabs.lock().get(&tab).cloned())
    }

    async fn open_tab(&self, url: &str) -> Result<TabId, HostError> {
        let tab = TabId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.tabs.lock().insert(
            tab,
            TabInfo {
                id: tab,
                title: "Recorder".to_string(),
                url: url.to_string(),
                viewport: None,
            },
        );
        Ok(tab)
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
        self.closed.lock().push(tab);
        if self.tabs.lock().remove(&tab).is_none() {
            return Err(HostError::TabNotFound(tab));
        }
        if let Some(events) = &self.events {
            let _ = events.send(HostEvent::TabRemoved(tab));
        }
        Ok(())
    }
}

// ============================================================================
// Capture
// ============================================================================

/// Tab capture whose stream is fed by the test
#[derive(Default)]
pub struct FakeCapture {
    pub deny: AtomicBool,
    /// Chunk the recorder flushes when stopped
    pub final_chunk: Mutex<Vec<u8>>,
    feed: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    pub stopped: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_final_chunk(chunk: &[u8]) -> Arc<Self> {
        let capture = Self::default();
        *capture.final_chunk.lock() = chunk.to_vec();
        Arc::new(capture)
    }

    pub fn denying() -> Arc<Self> {
        let capture = Self::default();
        capture.deny.store(true, Ordering::SeqCst);
        Arc::new(capture)
    }

    /// Push an encoded chunk as if the recorder produced it
    pub async fn push(&self, chunk: &[u8]) -> Result<()> {
        let feed = self.feed.lock().clone();
        let feed = feed.ok_or_else(|| anyhow::anyhow!("stream not started"))?;
        feed.send(chunk.to_vec()).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TabCapture for FakeCapture {
    async fn capture(
        &self,
        _tab: TabId,
        options: CaptureOptions,
    ) -> Result<Option<Box<dyn MediaStream>>, CaptureError> {
        if self.deny.load(Ordering::SeqCst) || !options.audio {
            return Ok(None);
        }
        Ok(Some(Box::new(FakeStream {
            tx: None,
            feed: Arc::clone(&self.feed),
            final_chunk: self.final_chunk.lock().clone(),
            stopped: Arc::clone(&self.stopped),
            released: Arc::clone(&self.released),
            capturing: false,
        })))
    }
}

struct FakeStream {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    feed: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    final_chunk: Vec<u8>,
    stopped: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    capturing: bool,
}

#[async_trait::async_trait]
impl MediaStream for FakeStream {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, CaptureError> {
        let (tx, rx) = mpsc::channel(64);
        *self.feed.lock() = Some(tx.clone());
        self.tx = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.feed.lock().take();
        if let Some(tx) = self.tx.take() {
            if !self.final_chunk.is_empty() {
                let _ = tx.send(self.final_chunk.clone()).await;
            }
        }
        self.capturing = false;
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_tracks(&mut self) {
        self.feed.lock().take();
        self.tx = None;
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn mime_type(&self) -> &str {
        "audio/webm;codecs=opus"
    }

    fn name(&self) -> &str {
        "fake stream"
    }
}

// ============================================================================
// Downloads
// ============================================================================

#[derive(Default)]
pub struct MemorySink {
    pub saved: Mutex<Vec<(String, String, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn names(&self) -> Vec<String> {
        self.saved.lock().iter().map(|(name, _, _)| name.clone()).collect()
    }

    pub fn count_with_extension(&self, extension: &str) -> usize {
        let suffix = format!(".{}", extension);
        self.saved
            .lock()
            .iter()
            .filter(|(name, _, _)| name.ends_with(&suffix))
            .count()
    }
}

#[async_trait::async_trait]
impl ArtifactSink for MemorySink {
    async fn save(
        &self,
        filename: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<String, HostError> {
        self.saved
            .lock()
            .push((filename.to_string(), mime_type.to_string(), data.to_vec()));
        Ok(filename.to_string())
    }
}

// ============================================================================
// Mock collaborator server
// ============================================================================

#[derive(Default)]
pub struct MockServerState {
    pub session_id: String,
    pub starts: Mutex<Vec<String>>,
    pub ends: Mutex<Vec<String>>,
    /// (session id, mime_type header, body)
    pub screenshots: Mutex<Vec<(String, String, Bytes)>>,
    pub chunks: Mutex<Vec<(String, String, Bytes)>>,
    /// Reject uploads with a 500, as a server that broke mid-session would
    pub fail_uploads: AtomicBool,
}

pub struct MockServer {
    pub url: String,
    pub state: Arc<MockServerState>,
}

impl MockServer {
    pub async fn start(session_id: &str) -> Result<Self> {
        let state = Arc::new(MockServerState {
            session_id: session_id.to_string(),
            ..Default::default()
        });

        let app = Router::new()
            .route("/sessions/start", post(start_session))
            .route("/sessions/:id/end", post(end_session))
            .route("/sessions/:id/screenshot", post(upload_screenshot))
            .route("/sessions/:id/chunk", post(upload_chunk))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { url, state })
    }

    pub fn end_calls(&self) -> Vec<String> {
        self.state.ends.lock().clone()
    }

    pub fn screenshot_count(&self) -> usize {
        self.state.screenshots.lock().len()
    }

    pub fn chunk_count(&self) -> usize {
        self.state.chunks.lock().len()
    }

    pub fn fail_uploads(&self) {
        self.state.fail_uploads.store(true, Ordering::SeqCst);
    }
}

async fn start_session(
    State(state): State<Arc<MockServerState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let title = body.get("title").and_then(Value::as_str).unwrap_or_default();
    state.starts.lock().push(title.to_string());
    Json(json!({ "session_id": state.session_id }))
}

async fn end_session(
    State(state): State<Arc<MockServerState>>,
    Path(id): Path<String>,
) -> StatusCode {
    state.ends.lock().push(id);
    StatusCode::OK
}

async fn upload_screenshot(
    State(state): State<Arc<MockServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if state.fail_uploads.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.screenshots.lock().push((id, mime_header(&headers), body));
    StatusCode::OK
}

async fn upload_chunk(
    State(state): State<Arc<MockServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if state.fail_uploads.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.chunks.lock().push((id, mime_header(&headers), body));
    StatusCode::OK
}

fn mime_header(headers: &HeaderMap) -> String {
    headers
        .get("mime_type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// URL of a port nothing listens on
pub async fn unreachable_url() -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    drop(listener);
    Ok(url)
}

// ============================================================================
// Harness
// ============================================================================

/// Tab the recorder sessions in tests record
pub const TARGET_TAB: TabId = TabId(1);

/// Recorder tab id used when a test opens a surface directly
pub const RECORDER_TAB: TabId = TabId(50);

/// A running dispatcher with fake host services around it
pub struct Harness {
    pub dispatcher: Dispatcher,
    pub bus: BusClient,
    pub events: HostEvents,
    pub debugger: Arc<FakeDebugger>,
    pub badges: Arc<BadgeSpy>,
    pub store: Arc<MemoryStore>,
    pub tabs: Arc<FakeTabs>,
    pub capture: Arc<FakeCapture>,
    pub sink: Arc<MemorySink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_capture(FakeCapture::new())
    }

    pub fn with_capture(capture: Arc<FakeCapture>) -> Self {
        let events = host::host_events();
        let debugger = FakeDebugger::new();
        let badges = Arc::new(BadgeSpy::default());
        let store = Arc::new(MemoryStore::new());
        let tabs = FakeTabs::new(Some(events.clone()));
        tabs.add(TARGET_TAB, "My Tab! #1");
        tabs.add(RECORDER_TAB, "Recorder");

        let dispatcher = Dispatcher::new(debugger.clone(), badges.clone(), store.clone());
        let (bus, _task) = dispatcher::spawn(dispatcher.clone(), &events);

        Self {
            dispatcher,
            bus,
            events,
            debugger,
            badges,
            store,
            tabs,
            capture,
            sink: MemorySink::new(),
        }
    }

    pub fn deps(&self) -> RecorderDeps {
        RecorderDeps {
            bus: self.bus.clone(),
            store: self.store.clone(),
            tabs: self.tabs.clone(),
            capture: self.capture.clone(),
            sink: self.sink.clone(),
        }
    }

    /// Persist a pending session for `TARGET_TAB` and raise its flag
    pub async fn pending_session(&self, config: RecordingConfig) -> Result<SessionDescriptor> {
        let descriptor = SessionDescriptor::new(TARGET_TAB, config);
        self.store.set_typed(ACTIVE_RECORDING_KEY, &descriptor).await?;
        self.dispatcher.set_recording(TARGET_TAB, true).await;
        self.dispatcher.register_recorder_tab(RECORDER_TAB, TARGET_TAB).await;
        Ok(descriptor)
    }
}

/// Config with short intervals and the given delivery
pub fn fast_config(stream_to_server: bool, server_url: &str) -> RecordingConfig {
    RecordingConfig {
        capture_screenshots: true,
        capture_audio: true,
        screenshot_interval_sec: 1,
        audio_batch_interval_sec: 1,
        stream_to_server,
        server_url: server_url.to_string(),
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
