// Integration tests for the collaborator server client

mod common;

use anyhow::Result;
use axum::{http::StatusCode, Router};
use common::*;
use tab_recorder::server::{ServerClient, ServerError};

/// Server that answers every call with `status`
async fn failing_server(status: StatusCode) -> Result<String> {
    let app = Router::new().fallback(move || async move { status });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(url)
}

#[tokio::test]
async fn test_start_session_returns_id() -> Result<()> {
    let server = MockServer::start("abc").await?;
    let client = ServerClient::new(&format!("{}/", server.url))?;

    assert_eq!(client.base_url(), server.url);
    assert_eq!(client.start_session("Standup").await?, "abc");
    assert_eq!(server.state.starts.lock().clone(), vec!["Standup".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_empty_session_id_is_rejected() -> Result<()> {
    let server = MockServer::start("").await?;
    let client = ServerClient::new(&server.url)?;

    let result = client.start_session("Standup").await;
    assert!(matches!(result, Err(ServerError::MissingSessionId)));

    Ok(())
}

#[tokio::test]
async fn test_unreachable_server() -> Result<()> {
    let client = ServerClient::new(&unreachable_url().await?)?;

    let result = client.start_session("Standup").await;
    match result {
        Err(e @ ServerError::Unreachable(_)) => {
            assert!(e.to_string().starts_with("Could not connect to server"));
        }
        other => panic!("expected an unreachable error, got {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn test_error_status_is_reported() -> Result<()> {
    let url = failing_server(StatusCode::INTERNAL_SERVER_ERROR).await?;
    let client = ServerClient::new(&url)?;

    match client.start_session("Standup").await {
        Err(ServerError::Status { status, endpoint }) => {
            assert_eq!(status, 500);
            assert!(endpoint.ends_with("/sessions/start"));
        }
        other => panic!("expected a status error, got {:?}", other),
    }
    assert!(matches!(
        client.end_session("abc").await,
        Err(ServerError::Status { status: 500, .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_uploads_are_multipart_with_mime_header() -> Result<()> {
    let server = MockServer::start("abc").await?;
    let client = ServerClient::new(&server.url)?;

    client.send_screenshot("abc", b"png-bytes".to_vec(), "image/png").await?;
    client
        .send_audio("abc", b"webm-bytes".to_vec(), "audio/webm;codecs=opus")
        .await?;
    client.end_session("abc").await?;

    let screenshots = server.state.screenshots.lock().clone();
    assert_eq!(screenshots.len(), 1);
    let (session, mime, body) = &screenshots[0];
    assert_eq!(session, "abc");
    assert_eq!(mime, "image/png");
    let body = String::from_utf8_lossy(body);
    assert!(body.contains("name=\"file\""));
    assert!(body.contains("filename=\"screenshot.png\""));
    assert!(body.contains("png-bytes"));

    let chunks = server.state.chunks.lock().clone();
    assert_eq!(chunks.len(), 1);
    let (_, mime, body) = &chunks[0];
    assert_eq!(mime, "audio/webm;codecs=opus");
    let body = String::from_utf8_lossy(body);
    assert!(body.contains("filename=\"audio.webm\""));
    assert!(body.contains("webm-bytes"));

    assert_eq!(server.end_calls(), vec!["abc".to_string()]);

    Ok(())
}
