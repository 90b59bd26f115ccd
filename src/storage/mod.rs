//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;
use crate::error::{EngineError, Result};
use crate::interfaces::CommissionStore;

pub mod memory;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod schema;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCommissionStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresCommissionStore;

/// Initialize storage based on configuration.
///
/// Returns a `CommissionStore` implementation with its schema in place.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn CommissionStore>> {
    info!("Storage: {} at {}", config.storage_type, config.url);

    match config.storage_type.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.url).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::StorageInit(e.to_string()))?;
            }

            let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.url))
                .await
                .map_err(|e| EngineError::from(crate::interfaces::StorageError::from(e)))?;

            let store = SqliteCommissionStore::new(pool);
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        "postgres" => {
            let pool = sqlx::PgPool::connect(&config.url)
                .await
                .map_err(|e| EngineError::from(crate::interfaces::StorageError::from(e)))?;

            let store = PostgresCommissionStore::new(pool);
            store.init().await?;
            Ok(Arc::new(store))
        }
        other => Err(EngineError::UnsupportedStorage(other.to_string())),
    }
}
