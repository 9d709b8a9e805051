use crate::control::ControlSurface;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Start/stop entry point; reaches the dispatcher over the bus
    pub control: ControlSurface,
}

impl AppState {
    pub fn new(control: ControlSurface) -> Self {
        Self { control }
    }
}
