use thiserror::Error;

use super::capture::CaptureError;
use super::delivery::DeliveryError;
use crate::bus::BusError;
use crate::host::{HostError, TabId};
use crate::server::ServerError;
use crate::store::StoreError;

/// Errors of a recorder surface
///
/// `CaptureGrantDenied` and `NoTargetTab` end the session before it starts.
/// Everything raised by a periodic delivery is logged and counted instead.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("No target tab specified.")]
    NoTargetTab,

    #[error("Tab capture failed: {0}")]
    CaptureGrantDenied(String),

    #[error("Could not connect to server: {0}")]
    ServerUnreachable(#[from] ServerError),

    #[error("Tab {0} closed while recording")]
    TabClosedUnexpectedly(TabId),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}
