//! Query history storage and search
//!
//! This module handles:
//! - The history entry model shared by every backend
//! - Search filters, sort orders and settings
//! - The `HistoryStorage` contract implemented by the local and remote stores
//! - One-shot import of local history into the remote backend

pub mod clock;
pub mod datasource;
pub mod filter;
pub mod local;
pub mod migration;
pub mod remote;
pub mod retention;



use crate::error::{HistoryWarning, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Hard cap on the number of locally stored entries
pub const MAX_HISTORY_ITEMS: usize = 10000;

/// Retention period used until the user picks one
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// One data-source query. The shape is owned by the data source.
pub type DataQuery = serde_json::Map<String, serde_json::Value>;

/// A saved query history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    /// Epoch milliseconds; unique within a store
    pub created_at: i64,
    /// Epoch milliseconds of the latest re-run, if tracked
    pub last_executed_at: Option<i64>,
    pub datasource_uid: String,
    /// Name at save time; empty when the data source no longer exists
    pub datasource_name: String,
    pub starred: bool,
    pub comment: String,
    pub queries: Vec<DataQuery>,
}

impl HistoryEntry {
    /// Timestamp retention is measured against
    pub fn last_activity(&self) -> i64 {
        self.last_executed_at.unwrap_or(self.created_at)
    }
}

/// A query about to be saved; identity is assigned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHistoryEntry {
    pub datasource_uid: String,
    pub datasource_name: String,
    pub queries: Vec<DataQuery>,
    pub starred: bool,
    pub comment: String,
}

impl NewHistoryEntry {
    /// Create an unstarred, uncommented candidate
    pub fn new(
        datasource_uid: impl Into<String>,
        datasource_name: impl Into<String>,
        queries: Vec<DataQuery>,
    ) -> Self {
        Self {
            datasource_uid: datasource_uid.into(),
            datasource_name: datasource_name.into(),
            queries,
            starred: false,
            comment: String::new(),
        }
    }

    /// Mark the candidate as starred
    pub fn with_starred(mut self, starred: bool) -> Self {
        self.starred = starred;
        self
    }

    /// Attach a comment to the candidate
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// Sort orders offered by the history views
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Newest first
    #[default]
    Descending,
    /// Oldest first
    Ascending,
    /// Data source name A to Z
    DatasourceAZ,
    /// Data source name Z to A
    DatasourceZA,
}

/// Criteria for reading history back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Substring searched in comments and query fields; empty matches all
    pub search: String,
    pub sort_order: SortOrder,
    /// Data source names; empty keeps every data source
    pub datasource_filters: Vec<String>,
    /// Near bound of the time window, in days ago
    pub from: Option<u32>,
    /// Far bound of the time window, in days ago
    pub to: Option<u32>,
    /// Only return starred entries
    pub starred: bool,
    /// 1-based page; only the remote backend paginates
    pub page: Option<u32>,
}

impl SearchFilters {
    /// The `[from, to]` window, when both bounds are set
    pub fn time_window(&self) -> Option<(u32, u32)> {
        match (self.from, self.to) {
            (Some(from), Some(to)) => Some((from, to)),
            _ => None,
        }
    }
}

/// Result of a history read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub total: usize,
}

/// Result of a successful add
#[derive(Debug, Clone, PartialEq)]
pub struct AddOutcome {
    pub entry: HistoryEntry,
    pub warning: Option<HistoryWarning>,
}

/// User facing history settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySettings {
    /// Days unstarred entries are kept
    pub retention_period: u32,
    pub starred_tab_as_first_tab: bool,
    pub active_datasources_only: bool,
    pub last_used_datasource_filters: Vec<String>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            retention_period: DEFAULT_RETENTION_DAYS,
            starred_tab_as_first_tab: false,
            active_datasources_only: false,
            last_used_datasource_filters: Vec::new(),
        }
    }
}

/// Query history tab opened first, as stored in remote user preferences
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HomeTab {
    /// Server default (`""`)
    #[default]
    Default,
    Query,
    Starred,
}

impl HomeTab {
    /// Parse a preference value; unknown values fall back to the default tab
    pub fn from_preference(value: &str) -> Self {
        match value {
            "query" => Self::Query,
            "starred" => Self::Starred,
            _ => Self::Default,
        }
    }

    pub fn as_preference(&self) -> &'static str {
        match self {
            Self::Default => "",
            Self::Query => "query",
            Self::Starred => "starred",
        }
    }
}

/// Capabilities a backend exposes to the front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedFeatures {
    pub available_filters: bool,
    pub last_used_datasources_available: bool,
    pub clear_history: bool,
    pub only_active_datasource: bool,
    pub change_retention: bool,
    pub query_history_available: bool,
}

/// Contract shared by the local and remote history stores
#[async_trait]
pub trait HistoryStorage: Send + Sync {
    /// Read entries matching `filters`, with the number of matches
    async fn get_rich_history(&self, filters: &SearchFilters) -> Result<HistoryPage>;

    /// Save a query, deduplicating against existing entries
    async fn add_to_rich_history(&self, entry: NewHistoryEntry) -> Result<AddOutcome>;

    /// Remove every entry
    async fn delete_all(&self) -> Result<()>;

    /// Remove one entry by id
    async fn delete_rich_history(&self, id: &str) -> Result<()>;

    async fn update_starred(&self, id: &str, starred: bool) -> Result<HistoryEntry>;

    async fn update_comment(&self, id: &str, comment: &str) -> Result<HistoryEntry>;

    async fn get_settings(&self) -> Result<HistorySettings>;

    async fn update_settings(&self, settings: &HistorySettings) -> Result<()>;

    fn supported_features(&self) -> SupportedFeatures;
}

/// Copy every local entry into the remote backend once.
///
/// Returns the number of imported entries; `0` when the local store was
/// already migrated.
pub async fn migrate_local_to_remote(
    local: &local::LocalHistoryStorage,
    remote: &remote::RemoteHistoryStorage,
) -> Result<usize> {
    if local.is_migrated()? {
        return Ok(0);
    }

    let entries = local.all_entries()?;
    let count = entries.len();
    if count > 0 {
        remote.import(&entries).await?;
    }
    local.mark_migrated()?;

    info!(count, "migrated local query history to remote storage");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_entry_builders() {
        let query = json!({ "expr": "up" }).as_object().cloned().unwrap();
        let entry = NewHistoryEntry::new("uid-1", "Prometheus", vec![query.clone()])
            .with_starred(true)
            .with_comment("note");

        assert_eq!(entry.datasource_uid, "uid-1");
        assert_eq!(entry.datasource_name, "Prometheus");
        assert_eq!(entry.queries, vec![query]);
        assert!(entry.starred);
        assert_eq!(entry.comment, "note");

        let plain = NewHistoryEntry::new("uid-1", "Prometheus", Vec::new());
        assert!(!plain.starred);
        assert!(plain.comment.is_empty());
    }

    #[test]
    fn test_last_activity_falls_back_to_created_at() {
        let mut entry = HistoryEntry {
            id: "100".to_string(),
            created_at: 100,
            last_executed_at: None,
            datasource_uid: String::new(),
            datasource_name: String::new(),
            starred: false,
            comment: String::new(),
            queries: Vec::new(),
        };
        assert_eq!(entry.last_activity(), 100);

        entry.last_executed_at = Some(250);
        assert_eq!(entry.last_activity(), 250);
    }

    #[test]
    fn test_search_filters_defaults() {
        let filters = SearchFilters::default();
        assert!(filters.search.is_empty());
        assert_eq!(filters.sort_order, SortOrder::Descending);
        assert!(filters.datasource_filters.is_empty());
        assert_eq!(filters.time_window(), None);
        assert!(!filters.starred);

        let windowed = SearchFilters {
            from: Some(0),
            to: Some(7),
            ..Default::default()
        };
        assert_eq!(windowed.time_window(), Some((0, 7)));
    }

    #[test]
    fn test_settings_default() {
        let settings = HistorySettings::default();
        assert_eq!(settings.retention_period, 7);
        assert!(!settings.starred_tab_as_first_tab);
        assert!(!settings.active_datasources_only);
        assert!(settings.last_used_datasource_filters.is_empty());
    }

    #[test]
    fn test_home_tab_preference_values() {
        assert_eq!(HomeTab::from_preference("starred"), HomeTab::Starred);
        assert_eq!(HomeTab::from_preference("query"), HomeTab::Query);
        assert_eq!(HomeTab::from_preference(""), HomeTab::Default);
        assert_eq!(HomeTab::from_preference("bogus"), HomeTab::Default);
        assert_eq!(HomeTab::Starred.as_preference(), "starred");
        assert_eq!(HomeTab::Default.as_preference(), "");
    }
}
