use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::host::TabId;

/// Container reported for audio when the stream does not say otherwise
pub const AUDIO_MIME_TYPE: &str = "audio/webm;codecs=opus";

/// Placeholder in capture arguments replaced by the target tab id
pub const TAB_PLACEHOLDER: &str = "{tab}";

/// How long an encoder gets to write its trailer after SIGTERM
const ENCODER_EXIT_TIMEOUT: Duration = Duration::from_secs(3);

/// What to capture from a tab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub audio: bool,
    pub video: bool,
}

impl CaptureOptions {
    pub fn audio_only(audio: bool) -> Self {
        Self { audio, video: false }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to start capture: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Capture already started")]
    AlreadyStarted,

    #[error("Capture stream was released")]
    Released,

    #[error("Capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform tab-capture primitive
#[async_trait::async_trait]
pub trait TabCapture: Send + Sync {
    /// Acquire a media stream for a tab
    ///
    /// `Ok(None)` means the host granted nothing, which is only acceptable
    /// when audio was not requested.
    async fn capture(
        &self,
        tab: TabId,
        options: CaptureOptions,
    ) -> Result<Option<Box<dyn MediaStream>>, CaptureError>;
}

/// A live capture stream plus the recorder encoding it
///
/// Lifecycle: `start` once, `stop` to flush the last buffered data and close
/// the chunk channel, then `release_tracks` to let go of the source.
#[async_trait::async_trait]
pub trait MediaStream: Send {
    /// Start recording; encoded chunks arrive on the returned channel
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, CaptureError>;

    /// Stop recording. The final partial chunk is delivered before the
    /// channel closes.
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Release the underlying tracks. Safe to call more than once.
    fn release_tracks(&mut self);

    fn is_capturing(&self) -> bool;

    fn mime_type(&self) -> &str;

    /// Stream name for logging
    fn name(&self) -> &str;
}

/// Process-backed capture settings
#[derive(Debug, Clone)]
pub struct ProcessCaptureConfig {
    /// Program that writes encoded audio of a tab to stdout
    pub command: String,
    /// Arguments; `{tab}` is replaced by the tab id
    pub args: Vec<String>,
    /// Size of the chunks handed to the recorder
    pub chunk_bytes: usize,
    pub mime_type: String,
}

impl Default for ProcessCaptureConfig {
    fn default() -> Self {
        Self {
            command: "ffmpeg".to_string(),
            args: [
                "-loglevel",
                "error",
                "-f",
                "pulse",
                "-i",
                "tab-{tab}.monitor",
                "-c:a",
                "libopus",
                "-f",
                "webm",
                "-",
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect(),
            chunk_bytes: 16 * 1024,
            mime_type: AUDIO_MIME_TYPE.to_string(),
        }
    }
}

/// Tab capture that runs an external encoder per stream
pub struct ProcessCapture {
    config: ProcessCaptureConfig,
}

impl ProcessCapture {
    pub fn new(config: ProcessCaptureConfig) -> Self {
        Self { config }
    }

    fn args_for(&self, tab: TabId) -> Vec<String> {
        let tab = tab.to_string();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace(TAB_PLACEHOLDER, &tab))
            .collect()
    }
}

#[async_trait::async_trait]
impl TabCapture for ProcessCapture {
    async fn capture(
        &self,
        tab: TabId,
        options: CaptureOptions,
    ) -> Result<Option<Box<dyn MediaStream>>, CaptureError> {
        if !options.audio {
            return Ok(None);
        }
        if options.video {
            warn!("Video capture is not supported, capturing audio only");
        }

        let child = Command::new(&self.config.command)
            .args(self.args_for(tab))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(CaptureError::Spawn)?;

        info!("Audio capture for tab {} started ({})", tab, self.config.command);

        Ok(Some(Box::new(ProcessStream {
            name: format!("{} (tab {})", self.config.command, tab),
            child: Some(child),
            reader: None,
            chunk_bytes: self.config.chunk_bytes.max(1),
            mime_type: self.config.mime_type.clone(),
            capturing: false,
        })))
    }
}

/// Ask the encoder to finish its output and exit. Returns false if the
/// request could not be delivered.
#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; `pid` is our own
    // child, which has not been reaped yet since `id()` returned it.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

/// Stream whose encoded bytes come from a child process's stdout
pub struct ProcessStream {
    name: String,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    chunk_bytes: usize,
    mime_type: String,
    capturing: bool,
}

#[async_trait::async_trait]
impl MediaStream for ProcessStream {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, CaptureError> {
        if self.reader.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }
        let child = self.child.as_mut().ok_or(CaptureError::Released)?;
        let mut stdout = child.stdout.take().ok_or(CaptureError::Released)?;

        let (tx, rx) = mpsc::channel(64);
        let chunk_bytes = self.chunk_bytes;
        let name = self.name.clone();

        self.reader = Some(tokio::spawn(async move {
            let mut pending = Vec::with_capacity(chunk_bytes);
            let mut buf = vec![0u8; chunk_bytes];

            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        pending.extend_from_slice(&buf[..n]);
                        while pending.len() >= chunk_bytes {
                            let rest = pending.split_off(chunk_bytes);
                            let chunk = std::mem::replace(&mut pending, rest);
                            if tx.send(chunk).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Reading {} failed: {}", name, e);
                        break;
                    }
                }
            }

            // Final flush
            if !pending.is_empty() {
                let _ = tx.send(pending).await;
            }
            debug!("{} reached end of stream", name);
        }));
        self.capturing = true;

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.capturing {
            return Ok(());
        }
        info!("Stopping {}", self.name);

        if let Some(child) = self.child.as_mut() {
            if !request_exit(child) {
                // Already exited is fine
                let _ = child.start_kill();
            }
            match time::timeout(ENCODER_EXIT_TIMEOUT, child.wait()).await {
                Ok(status) => {
                    debug!("{} exited with {}", self.name, status?);
                }
                Err(_) => {
                    warn!("{} ignored SIGTERM, killing it", self.name);
                    let _ = child.start_kill();
                    child.wait().await?;
                }
            }
        }
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!("{} reader task failed: {}", self.name, e);
            }
        }

        self.capturing = false;
        Ok(())
    }

    fn release_tracks(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            debug!("Released {}", self.name);
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.capturing = false;
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn name(&self) -> &str {
        &self.name
    }
}
