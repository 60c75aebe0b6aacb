//! Query history ("rich history") storage.
//!
//! Persists the data-source queries a user has run, keeps them unique,
//! enforces a retention period and an item cap, and reads back legacy
//! on-disk formats. Two backends share the [`history::HistoryStorage`] trait:
//!
//! - [`history::local::LocalHistoryStorage`] over an injected [`kv::KeyValueStore`]
//! - [`history::remote::RemoteHistoryStorage`] over the query history HTTP API
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use query_history::history::{HistoryStorage, NewHistoryEntry, SearchFilters};
//! # use query_history::history::datasource::StaticDatasourceDirectory;
//! # use query_history::history::local::LocalHistoryStorage;
//! # use query_history::kv::MemoryKeyValueStore;
//! # #[tokio::main]
//! # async fn main() -> query_history::Result<()> {
//! let directory = StaticDatasourceDirectory::new([("Prometheus", "prom-1")]);
//! let storage = LocalHistoryStorage::new(
//!     Arc::new(MemoryKeyValueStore::new()),
//!     Arc::new(directory),
//! );
//!
//! let query = serde_json::json!({ "expr": "up", "refId": "A" });
//! let query = query.as_object().cloned().unwrap_or_default();
//! storage
//!     .add_to_rich_history(NewHistoryEntry::new("prom-1", "Prometheus", vec![query]))
//!     .await?;
//!
//! let page = storage.get_rich_history(&SearchFilters::default()).await?;
//! assert_eq!(page.total, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod history;
pub mod kv;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export commonly used types
pub use config::Config;
pub use error::{HistoryError, HistoryWarning, Result, WarningKind};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default directory for storing history data
pub fn default_data_dir() -> std::path::PathBuf {
    directories::ProjectDirs::from("", "", "query-history")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| {
            // Fallback to home directory if project dirs not available
            dirs::home_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join(".query-history")
        })
}

/// Initialize the data directory if it doesn't exist
pub fn ensure_data_dir() -> Result<std::path::PathBuf> {
    let data_dir = default_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
    }
    Ok(data_dir)
}
