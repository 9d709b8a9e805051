use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Local};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::naming;
use crate::host::{ArtifactSink, HostError};
use crate::server::{ServerClient, ServerError};
use crate::session::DeliveryMode;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid screenshot data URL")]
    InvalidDataUrl,

    #[error("Invalid screenshot payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// One captured frame
#[derive(Debug, Clone)]
pub struct ScreenshotArtifact {
    pub timestamp: DateTime<Local>,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ScreenshotArtifact {
    /// Decode a `data:<mime>;base64,<payload>` URL
    pub fn from_data_url(data_url: &str) -> Result<Self, DeliveryError> {
        let rest = data_url.strip_prefix("data:").ok_or(DeliveryError::InvalidDataUrl)?;
        let (header, payload) = rest.split_once(',').ok_or(DeliveryError::InvalidDataUrl)?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or(DeliveryError::InvalidDataUrl)?;

        Ok(Self {
            timestamp: Local::now(),
            mime_type: if mime_type.is_empty() {
                "image/png".to_string()
            } else {
                mime_type.to_string()
            },
            data: BASE64.decode(payload)?,
        })
    }

    pub fn extension(&self) -> &'static str {
        "png"
    }
}

/// One drained batch of encoded audio
#[derive(Debug, Clone)]
pub struct AudioBatch {
    pub timestamp: DateTime<Local>,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl AudioBatch {
    pub fn new(data: Vec<u8>, mime_type: &str) -> Self {
        Self {
            timestamp: Local::now(),
            mime_type: mime_type.to_string(),
            data,
        }
    }

    pub fn extension(&self) -> &'static str {
        "webm"
    }
}

/// Where a session's artifacts go, fixed once at startup
pub enum Delivery {
    /// Upload to a confirmed collaborator session
    Streaming { server: ServerClient, session_id: String },
    /// Save every artifact as its own download
    Local { sink: Arc<dyn ArtifactSink>, title: String },
}

impl Delivery {
    pub fn mode(&self) -> DeliveryMode {
        match self {
            Self::Streaming { .. } => DeliveryMode::Streaming,
            Self::Local { .. } => DeliveryMode::Local,
        }
    }

    pub async fn deliver_screenshot(
        &self,
        screenshot: ScreenshotArtifact,
    ) -> Result<(), DeliveryError> {
        match self {
            Self::Streaming { server, session_id } => {
                server
                    .send_screenshot(session_id, screenshot.data, &screenshot.mime_type)
                    .await?;
            }
            Self::Local { sink, title } => {
                let filename =
                    naming::artifact_filename(title, screenshot.timestamp, screenshot.extension());
                let saved = sink.save(&filename, &screenshot.mime_type, &screenshot.data).await?;
                info!("Screenshot downloaded as {}", saved);
            }
        }
        Ok(())
    }

    pub async fn deliver_audio(&self, batch: AudioBatch) -> Result<(), DeliveryError> {
        match self {
            Self::Streaming { server, session_id } => {
                server.send_audio(session_id, batch.data, &batch.mime_type).await?;
            }
            Self::Local { sink, title } => {
                let filename = naming::artifact_filename(title, batch.timestamp, batch.extension());
                let saved = sink.save(&filename, &batch.mime_type, &batch.data).await?;
                info!("Audio batch downloaded as {}", saved);
            }
        }
        Ok(())
    }

    /// Close the collaborator session, if there is one
    pub async fn finish(&self) -> Result<(), DeliveryError> {
        if let Self::Streaming { server, session_id } = self {
            server.end_session(session_id).await?;
        }
        Ok(())
    }
}
