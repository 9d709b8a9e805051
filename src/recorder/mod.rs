//! Recorder surface
//!
//! One ephemeral surface per active session. It owns the audio capture
//! stream, runs the screenshot and audio-batch loops, and decides once at
//! startup whether artifacts stream to the collaborator server or land in
//! local downloads.

pub mod buffer;
pub mod capture;
pub mod delivery;
pub mod error;
pub mod launcher;
pub mod naming;
pub mod surface;

pub use buffer::AudioChunkBuffer;
pub use capture::{
    CaptureError, CaptureOptions, MediaStream, ProcessCapture, ProcessCaptureConfig, TabCapture,
    AUDIO_MIME_TYPE,
};
pub use delivery::{AudioBatch, Delivery, DeliveryError, ScreenshotArtifact};
pub use error::RecordingError;
pub use launcher::{RecorderLauncher, SurfaceLauncher, DEFAULT_RECORDER_URL};
pub use naming::{artifact_filename, normalize_title};
pub use surface::{RecorderDeps, RecorderStatus, RecorderSurface, UNLOAD_WARNING};
