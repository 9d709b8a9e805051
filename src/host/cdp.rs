//! Chrome DevTools Protocol host
//!
//! Talks to a browser started with `--remote-debugging-port`:
//! - `GET /json/list`, `PUT /json/new?<url>`, `GET /json/close/<id>` for tabs
//! - one websocket per attached tab for debugger commands
//!
//! Targets are identified by opaque strings; they are mapped to small
//! numeric `TabId`s the first time they are seen.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{HostError, HostEvent, HostEvents, TabHost, TabId, TabInfo};
use crate::dispatcher::debugger::PROTOCOL_VERSION;
use crate::dispatcher::{DebuggerError, DebuggerPort};

/// How long a debugger command may take before it is abandoned
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Entry of `/json/list`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDescription {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    web_socket_debugger_url: Option<String>,
}

impl TargetDescription {
    fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

/// Stable numeric ids for target id strings
#[derive(Debug, Default)]
struct TargetTable {
    next_id: u32,
    by_tab: HashMap<TabId, String>,
    by_target: HashMap<String, TabId>,
}

impl TargetTable {
    fn tab_for(&mut self, target: &str) -> TabId {
        if let Some(tab) = self.by_target.get(target) {
            return *tab;
        }
        self.next_id += 1;
        let tab = TabId(self.next_id);
        self.by_tab.insert(tab, target.to_string());
        self.by_target.insert(target.to_string(), tab);
        tab
    }

    fn target_of(&self, tab: TabId) -> Option<String> {
        self.by_tab.get(&tab).cloned()
    }

    fn forget(&mut self, tab: TabId) {
        if let Some(target) = self.by_tab.remove(&tab) {
            self.by_target.remove(&target);
        }
    }
}

/// One debugger attachment
struct CdpSession {
    tab: TabId,
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    pending: SyncMutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_id: AtomicU64,
    /// Set when we close the socket ourselves
    closing: AtomicBool,
    reader: SyncMutex<Option<JoinHandle<()>>>,
}

impl CdpSession {
    async fn call(&self, method: &str, params: Value) -> Result<Value, DebuggerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = json!({ "id": id, "method": method, "params": params });
        let sent = self
            .sink
            .lock()
            .await
            .send(WsMessage::Text(request.to_string().into()))
            .await;
        if let Err(e) = sent {
            self.pending.lock().remove(&id);
            return Err(DebuggerError::Command {
                method: method.to_string(),
                message: e.to_string(),
            });
        }

        let response = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(DebuggerError::Detached {
                    tab: self.tab,
                    reason: "connection closed".to_string(),
                })
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(DebuggerError::Command {
                    method: method.to_string(),
                    message: "timed out".to_string(),
                });
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(DebuggerError::Command {
                method: method.to_string(),
                message,
            });
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        // The browser may already have dropped the socket
        let _ = self.sink.lock().await.close().await;
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.pending.lock().clear();
    }
}

/// Browser reached over the DevTools remote-debugging endpoint
#[derive(Clone)]
pub struct CdpBrowser {
    inner: Arc<CdpInner>,
}

struct CdpInner {
    endpoint: String,
    http: reqwest::Client,
    events: HostEvents,
    targets: SyncMutex<TargetTable>,
    sessions: SyncMutex<HashMap<TabId, Arc<CdpSession>>>,
}

impl CdpBrowser {
    /// `endpoint` is the HTTP base of the debugging port, e.g.
    /// `http://127.0.0.1:9222`
    pub fn new(endpoint: &str, events: HostEvents) -> Result<Self, HostError> {
        let http = reqwest::Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .map_err(|e| HostError::Request(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(CdpInner {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                http,
                events,
                targets: SyncMutex::new(TargetTable::default()),
                sessions: SyncMutex::new(HashMap::new()),
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Page targets currently open, with their tab ids
    pub async fn tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        let targets = self.list_targets().await?;
        let mut table = self.inner.targets.lock();
        Ok(targets
            .iter()
            .filter(|target| target.is_page())
            .map(|target| TabInfo {
                id: table.tab_for(&target.id),
                title: target.title.clone(),
                url: target.url.clone(),
                viewport: None,
            })
            .collect())
    }

    /// Poll the target list and raise `TabRemoved` for tabs that vanished
    pub fn watch_tabs(&self, period: Duration) -> JoinHandle<()> {
        let browser = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("Watching tabs at {} every {:?}", browser.endpoint(), period);

            loop {
                ticker.tick().await;
                if browser.inner.events.receiver_count() == 0 {
                    debug!("No host event subscribers left, stopping tab watch");
                    break;
                }
                if let Err(e) = browser.poll_removed().await {
                    warn!("Tab poll failed: {}", e);
                }
            }
        })
    }

    async fn poll_removed(&self) -> Result<(), HostError> {
        let open: HashSet<String> = self
            .list_targets()
            .await?
            .into_iter()
            .filter(TargetDescription::is_page)
            .map(|target| target.id)
            .collect();

        let removed: Vec<TabId> = {
            let mut table = self.inner.targets.lock();
            for target in &open {
                table.tab_for(target);
            }
            let removed: Vec<TabId> = table
                .by_tab
                .iter()
                .filter(|(_, target)| !open.contains(*target))
                .map(|(tab, _)| *tab)
                .collect();
            for tab in &removed {
                table.forget(*tab);
            }
            removed
        };

        for tab in removed {
            debug!("Tab {} is gone", tab);
            let session = self.inner.sessions.lock().remove(&tab);
            if let Some(session) = session {
                session.close().await;
            }
            let _ = self.inner.events.send(HostEvent::TabRemoved(tab));
        }
        Ok(())
    }

    async fn list_targets(&self) -> Result<Vec<TargetDescription>, HostError> {
        let url = format!("{}/json/list", self.inner.endpoint);
        let response = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| HostError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| HostError::Request(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| HostError::Request(e.to_string()))
    }

    async fn target(&self, tab: TabId) -> Result<Option<TargetDescription>, HostError> {
        let target_id = self.inner.targets.lock().target_of(tab);
        let Some(target_id) = target_id else {
            return Ok(None);
        };
        Ok(self
            .list_targets()
            .await?
            .into_iter()
            .find(|target| target.id == target_id))
    }

    fn session(&self, tab: TabId) -> Option<Arc<CdpSession>> {
        self.inner.sessions.lock().get(&tab).cloned()
    }

    fn spawn_reader(
        &self,
        session: Arc<CdpSession>,
        mut stream: SplitStream<WsStream>,
    ) -> JoinHandle<()> {
        let browser = self.clone();
        tokio::spawn(async move {
            let tab = session.tab;
            let mut reason = "connection closed".to_string();

            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(frame)) => {
                        if let Some(frame) = frame {
                            reason = frame.reason.as_str().to_string();
                        }
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        reason = e.to_string();
                        break;
                    }
                };

                let Ok(message) = serde_json::from_str::<Value>(text.as_str()) else {
                    debug!("Ignoring malformed debugger frame from tab {}", tab);
                    continue;
                };

                if let Some(id) = message.get("id").and_then(Value::as_u64) {
                    if let Some(reply) = session.pending.lock().remove(&id) {
                        let _ = reply.send(message);
                    }
                } else if message.get("method").and_then(Value::as_str)
                    == Some("Inspector.detached")
                {
                    reason = message
                        .pointer("/params/reason")
                        .and_then(Value::as_str)
                        .unwrap_or("detached")
                        .to_string();
                    break;
                }
            }

            // Fail every call still waiting
            session.pending.lock().clear();
            if !session.closing.load(Ordering::SeqCst) {
                let mut sessions = browser.inner.sessions.lock();
                if sessions.get(&tab).is_some_and(|current| Arc::ptr_eq(current, &session)) {
                    sessions.remove(&tab);
                }
                drop(sessions);
                let _ = browser.inner.events.send(HostEvent::DebuggerDetached { tab, reason });
            }
        })
    }
}

#[async_trait::async_trait]
impl TabHost for CdpBrowser {
    async fn get(&self, tab: TabId) -> Result<Option<TabInfo>, HostError> {
        Ok(self.target(tab).await?.map(|target| TabInfo {
            id: tab,
            title: target.title,
            url: target.url,
            viewport: None,
        }))
    }

    async fn open_tab(&self, url: &str) -> Result<TabId, HostError> {
        let endpoint = format!("{}/json/new?{}", self.inner.endpoint, url);
        let target: TargetDescription = self
            .inner
            .http
            .put(&endpoint)
            .send()
            .await
            .map_err(|e| HostError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| HostError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| HostError::Request(e.to_string()))?;

        let tab = self.inner.targets.lock().tab_for(&target.id);
        info!("Opened tab {} ({})", tab, target.id);
        Ok(tab)
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
        let target_id = self
            .inner
            .targets
            .lock()
            .target_of(tab)
            .ok_or(HostError::TabNotFound(tab))?;

        let endpoint = format!("{}/json/close/{}", self.inner.endpoint, target_id);
        self.inner
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| HostError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| HostError::Request(e.to_string()))?;

        debug!("Closed tab {}", tab);
        Ok(())
    }
}

#[async_trait::async_trait]
impl DebuggerPort for CdpBrowser {
    async fn attach(&self, tab: TabId) -> Result<(), DebuggerError> {
        if self.session(tab).is_some() {
            return Ok(());
        }

        let attach_error = |message: String| DebuggerError::Attach { tab, message };
        let target = self
            .target(tab)
            .await
            .map_err(|e| attach_error(e.to_string()))?
            .ok_or_else(|| attach_error("no such tab".to_string()))?;
        let ws_url = target
            .web_socket_debugger_url
            .ok_or_else(|| attach_error("another debugger is already attached".to_string()))?;

        let (socket, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| attach_error(e.to_string()))?;
        let (sink, stream) = socket.split();

        let session = Arc::new(CdpSession {
            tab,
            sink: Mutex::new(sink),
            pending: SyncMutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            reader: SyncMutex::new(None),
        });
        let reader = self.spawn_reader(Arc::clone(&session), stream);
        *session.reader.lock() = Some(reader);
        self.inner.sessions.lock().insert(tab, session);

        debug!("Debugger attached to tab {} (protocol {})", tab, PROTOCOL_VERSION);
        Ok(())
    }

    async fn detach(&self, tab: TabId) -> Result<(), DebuggerError> {
        let session = self.inner.sessions.lock().remove(&tab);
        match session {
            Some(session) => {
                session.close().await;
                Ok(())
            }
            None => Err(DebuggerError::NotAttached(tab)),
        }
    }

    async fn send_command(
        &self,
        tab: TabId,
        method: &str,
        params: Value,
    ) -> Result<Value, DebuggerError> {
        let session = self.session(tab).ok_or(DebuggerError::NotAttached(tab))?;
        session.call(method, params).await
    }
}
