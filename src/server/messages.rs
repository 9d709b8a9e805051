use serde::{Deserialize, Serialize};

/// Body of `POST /sessions/start`
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStartRequest {
    pub title: String,
}

/// Response of `POST /sessions/start`
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStartResponse {
    #[serde(default)]
    pub session_id: Option<String>,
}
