//! Shared persisted key-value store
//!
//! The only state shared between contexts besides messages. Last writer
//! wins; there is no locking primitive across contexts.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::session::{RecordingConfig, SessionDescriptor};

/// Key of the persisted recording configuration
pub const CONFIG_KEY: &str = "config";

/// Key of the pending session descriptor
pub const ACTIVE_RECORDING_KEY: &str = "activeRecording";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed helpers on top of any store
#[async_trait::async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_typed<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_typed<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.set(key, serde_json::to_value(value)?).await
    }

    /// Stored configuration merged over the defaults
    async fn recording_config(&self) -> Result<RecordingConfig, StoreError> {
        let config: Option<RecordingConfig> = self.get_typed(CONFIG_KEY).await?;
        Ok(config.unwrap_or_default().normalized())
    }

    async fn pending_session(&self) -> Result<Option<SessionDescriptor>, StoreError> {
        self.get_typed(ACTIVE_RECORDING_KEY).await
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
