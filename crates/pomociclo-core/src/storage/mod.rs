mod config;
pub mod database;
mod memory;

pub use config::{ApiConfig, Config, TimerConfig};
pub use database::Database;
pub use memory::MemoryStore;

use std::path::PathBuf;

use crate::error::StorageError;

/// Keys of the independent blobs persisted by the study cycle.
///
/// Each blob is serialized on its own; there is no cross-blob transaction.
pub mod keys {
    pub const TIMER: &str = "pomociclo_timer";
    pub const BLOCK_HISTORY: &str = "pomociclo_block_history";
    pub const LOCAL_PROGRESS: &str = "pomociclo_local_progress";
    pub const CYCLE_STATE: &str = "pomociclo_cycle_state";
    pub const SUBJECTS: &str = "pomociclo_subjects";
}

/// Durable string-keyed blob store shared by every persisted component.
///
/// Implementations must be cheap to call from the tick loop; writes are
/// last-write-wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Returns `~/.config/pomociclo[-dev]/` based on POMOCICLO_ENV.
///
/// Set POMOCICLO_ENV=dev to use development data directory.
/// POMOCICLO_HOME points the data directory somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> Result<PathBuf, StorageError> {
    let dir = match std::env::var_os("POMOCICLO_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("POMOCICLO_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("pomociclo-dev")
            } else {
                base_dir.join("pomociclo")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|e| StorageError::DataDir(e.to_string()))?;
    Ok(dir)
}
