//! Collaborator server client
//!
//! - POST /sessions/start - open a streaming session
//! - POST /sessions/:id/end - close it
//! - POST /sessions/:id/screenshot - multipart screenshot upload
//! - POST /sessions/:id/chunk - multipart audio batch upload

pub mod client;
pub mod messages;

pub use client::{ServerClient, ServerError};
pub use messages::{SessionStartRequest, SessionStartResponse};
