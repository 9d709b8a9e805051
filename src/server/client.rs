use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use super::messages::{SessionStartRequest, SessionStartResponse};

/// Per-request timeout for collaborator calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not connect to server ({0})")]
    Unreachable(#[from] reqwest::Error),

    #[error("Server answered {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Server did not return a session id")]
    MissingSessionId,
}

/// HTTP client for the collaborator server
///
/// Every call is fire-once: no retries, the caller decides what a failure
/// means.
#[derive(Clone)]
pub struct ServerClient {
    http: Client,
    base_url: String,
}

impl ServerClient {
    pub fn new(base_url: &str) -> Result<Self, ServerError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST /sessions/start
    pub async fn start_session(&self, title: &str) -> Result<String, ServerError> {
        let endpoint = format!("{}/sessions/start", self.base_url);
        info!("Starting server session for {:?}", title);

        let response = self
            .http
            .post(&endpoint)
            .json(&SessionStartRequest {
                title: title.to_string(),
            })
            .send()
            .await?;
        let response = Self::check(response, &endpoint)?;

        let body: SessionStartResponse = response.json().await?;
        let session_id = body
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or(ServerError::MissingSessionId)?;

        info!("Server session started: {}", session_id);
        Ok(session_id)
    }

    /// POST /sessions/{id}/end
    pub async fn end_session(&self, session_id: &str) -> Result<(), ServerError> {
        let endpoint = format!("{}/sessions/{}/end", self.base_url, session_id);
        let response = self.http.post(&endpoint).send().await?;
        Self::check(response, &endpoint)?;

        info!("Server session ended: {}", session_id);
        Ok(())
    }

    /// POST /sessions/{id}/screenshot
    pub async fn send_screenshot(
        &self,
        session_id: &str,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<(), ServerError> {
        let endpoint = format!("{}/sessions/{}/screenshot", self.base_url, session_id);
        self.upload(&endpoint, data, "screenshot.png", mime_type).await
    }

    /// POST /sessions/{id}/chunk
    pub async fn send_audio(
        &self,
        session_id: &str,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<(), ServerError> {
        let endpoint = format!("{}/sessions/{}/chunk", self.base_url, session_id);
        self.upload(&endpoint, data, "audio.webm", mime_type).await
    }

    async fn upload(
        &self,
        endpoint: &str,
        data: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<(), ServerError> {
        let size = data.len();
        let part = Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str(mime_type)?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(endpoint)
            .header("mime_type", mime_type)
            .multipart(form)
            .send()
            .await?;
        Self::check(response, endpoint)?;

        info!("Uploaded {} ({} bytes) to {}", filename, size, endpoint);
        Ok(())
    }

    fn check(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<reqwest::Response, ServerError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ServerError::Status {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            })
        }
    }
}
