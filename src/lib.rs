pub mod bus;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod host;
pub mod http;
pub mod recorder;
pub mod server;
pub mod session;
pub mod store;

pub use bus::{BusClient, Message, Reply};
pub use config::Config;
pub use control::{Affordance, ControlError, ControlSurface};
pub use dispatcher::{Dispatcher, DispatcherService};
pub use host::{CdpBrowser, LocalDownloads, TabId};
pub use http::{create_router, AppState};
pub use recorder::{RecorderStatus, RecorderSurface, RecordingError, SurfaceLauncher};
pub use server::{ServerClient, ServerError};
pub use session::{DeliveryMode, RecordingConfig, RecordingSession, SessionDescriptor, SessionStats};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
