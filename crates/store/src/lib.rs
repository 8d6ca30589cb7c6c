//! Context store implementations for the context relay.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use contextrelay_config::{StoreBackendKind, StoreConfig};
use contextrelay_core::error::StoreError;
use contextrelay_core::ContextStore;
use std::sync::Arc;

/// Build the configured store.
pub async fn build_from_config(config: &StoreConfig) -> Result<Arc<dyn ContextStore>, StoreError> {
    match config.backend {
        StoreBackendKind::Memory => {
            tracing::info!("Using in-memory context store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        #[cfg(feature = "sqlite")]
        StoreBackendKind::Sqlite => {
            let path = config.sqlite_path.as_deref().ok_or_else(|| {
                StoreError::Storage("store.sqlite_path is required for the sqlite backend".into())
            })?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Storage(format!("Cannot create {}: {e}", parent.display())))?;
            }
            Ok(Arc::new(SqliteStore::open(path).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        StoreBackendKind::Sqlite => Err(StoreError::Storage(
            "built without the `sqlite` feature".into(),
        )),
    }
}
