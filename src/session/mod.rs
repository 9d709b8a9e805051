//! Recording session data model
//!
//! - `RecordingConfig` - persisted user configuration with defaults
//! - `SessionDescriptor` - pending session handed to a recorder surface
//! - `RecordingSession` - one run as owned by its recorder surface
//! - `SessionStats` - counters returned when a session stops

mod config;
mod session;
mod stats;

pub use config::{
    RecordingConfig, DEFAULT_AUDIO_BATCH_INTERVAL_SECS, DEFAULT_SCREENSHOT_INTERVAL_SECS,
    DEFAULT_SERVER_URL,
};
pub use session::{DeliveryMode, RecordingSession, SessionDescriptor};
pub use stats::SessionStats;
