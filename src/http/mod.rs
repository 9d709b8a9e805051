//! HTTP API for driving the control surface
//!
//! - GET /health - Health check
//! - GET /config, PUT /config - Read or replace the recording configuration
//! - GET /tabs/:tab_id/recording - Recording flag and affordance of a tab
//! - POST /tabs/:tab_id/recording/start - Start recording a tab
//! - POST /tabs/:tab_id/recording/stop - Stop recording a tab
//! - POST /tabs/:tab_id/screenshot - One-off screenshot as a data URL

mod handlers;
mod routes;
mod state;

pub use handlers::{
    ErrorResponse, RecordingStateResponse, ScreenshotResponse, StartRecordingResponse,
    StopRecordingResponse,
};
pub use routes::create_router;
pub use state::AppState;
