// Integration tests for process-backed tab capture
//
// `sh` plays the encoder: whatever it writes to stdout is the encoded audio.

#![cfg(unix)]

use anyhow::Result;
use std::time::Duration;
use tab_recorder::host::TabId;
use tab_recorder::recorder::{
    CaptureError, CaptureOptions, MediaStream, ProcessCapture, ProcessCaptureConfig, TabCapture,
};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn shell(script: &str, chunk_bytes: usize) -> ProcessCapture {
    ProcessCapture::new(ProcessCaptureConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        chunk_bytes,
        ..ProcessCaptureConfig::default()
    })
}

async fn open_stream(capture: &ProcessCapture, tab: TabId) -> Result<Box<dyn MediaStream>> {
    capture
        .capture(tab, CaptureOptions::audio_only(true))
        .await?
        .ok_or_else(|| anyhow::anyhow!("no stream granted"))
}

async fn collect(chunks: &mut mpsc::Receiver<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
    let mut collected = Vec::new();
    while let Some(chunk) = tokio::time::timeout(WAIT, chunks.recv()).await? {
        collected.push(chunk);
    }
    Ok(collected)
}

#[tokio::test]
async fn test_output_is_split_into_fixed_chunks() -> Result<()> {
    let capture = shell("printf abcdefghij", 4);
    let mut stream = open_stream(&capture, TabId(1)).await?;
    assert_eq!(stream.mime_type(), "audio/webm;codecs=opus");

    let mut chunks = stream.start().await?;
    assert!(stream.is_capturing());

    // The short tail is flushed once the encoder exits
    let collected = collect(&mut chunks).await?;
    assert_eq!(
        collected,
        vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]
    );

    stream.stop().await?;
    assert!(!stream.is_capturing());
    stream.release_tracks();

    Ok(())
}

#[tokio::test]
async fn test_tab_placeholder_is_substituted() -> Result<()> {
    let capture = shell("printf tab-{tab}.monitor", 1024);
    let mut stream = open_stream(&capture, TabId(42)).await?;
    assert!(stream.name().contains("tab 42"));

    let mut chunks = stream.start().await?;
    let collected = collect(&mut chunks).await?.concat();
    assert_eq!(collected, b"tab-42.monitor".to_vec());

    Ok(())
}

#[tokio::test]
async fn test_stop_lets_encoder_write_its_trailer() -> Result<()> {
    // Writes a header, then the trailer only when asked to terminate
    let capture = shell(
        "trap 'printf TAIL; exit 0' TERM; printf HEAD; while :; do sleep 0.05; done",
        4,
    );
    let mut stream = open_stream(&capture, TabId(1)).await?;
    let mut chunks = stream.start().await?;

    let head = tokio::time::timeout(WAIT, chunks.recv()).await?;
    assert_eq!(head, Some(b"HEAD".to_vec()));

    tokio::time::timeout(WAIT, stream.stop()).await??;
    let rest = collect(&mut chunks).await?.concat();
    assert_eq!(rest, b"TAIL".to_vec());

    Ok(())
}

#[tokio::test]
async fn test_no_stream_without_audio() -> Result<()> {
    let capture = shell("printf unused", 4);
    let stream = capture.capture(TabId(1), CaptureOptions::audio_only(false)).await?;
    assert!(stream.is_none());
    Ok(())
}

#[tokio::test]
async fn test_missing_encoder_fails_to_spawn() {
    let capture = ProcessCapture::new(ProcessCaptureConfig {
        command: "/nonexistent/encoder".to_string(),
        ..ProcessCaptureConfig::default()
    });

    let result = capture.capture(TabId(1), CaptureOptions::audio_only(true)).await;
    assert!(matches!(result, Err(CaptureError::Spawn(_))));
}

#[tokio::test]
async fn test_start_twice_is_rejected() -> Result<()> {
    let capture = shell("sleep 5", 4);
    let mut stream = open_stream(&capture, TabId(1)).await?;

    let _chunks = stream.start().await?;
    assert!(matches!(stream.start().await, Err(CaptureError::AlreadyStarted)));

    stream.release_tracks();
    assert!(!stream.is_capturing());

    Ok(())
}
