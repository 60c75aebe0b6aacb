//! Query history persisted in a key/value store
//!
//! Every write is a read-modify-write cycle over one JSON array:
//! load -> migrate -> dedup -> prepend -> evict -> retention cleanup -> persist.
//! Reads never write back; legacy records are migrated in memory only.

use super::clock::{Clock, SystemClock};
use super::datasource::DatasourceDirectory;
use super::filter::filter_and_sort;
use super::migration::{decode_local_collection, entity_to_local, local_to_entity, LocalHistoryDto};
use super::retention::{apply_retention, evict_to_capacity, is_retained, DayBoundaries, DayEdge};
use super::{
    AddOutcome, DataQuery, HistoryEntry, HistoryPage, HistorySettings, HistoryStorage,
    NewHistoryEntry, SearchFilters, SupportedFeatures,
};
use crate::config::{DuplicatePolicy, LocalConfig};
use crate::error::{HistoryError, HistoryWarning, Result};
use crate::kv::{KeyValueStore, KeyValueStoreExt};
use async_trait::async_trait;
use chrono::FixedOffset;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key holding the JSON array of history records
pub const RICH_HISTORY_KEY: &str = "grafana.explore.richHistory";

/// Keys of the individually stored settings
pub mod setting_keys {
    pub const RETENTION_PERIOD: &str = "grafana.explore.richHistory.retentionPeriod";
    pub const STARRED_TAB: &str = "grafana.explore.richHistory.starredTab";
    pub const ACTIVE_DATASOURCE_ONLY: &str = "grafana.explore.richHistory.activeDatasourceOnly";
    pub const DATASOURCE_FILTERS: &str = "grafana.explore.richHistory.datasourceFilters";
    pub const MIGRATED: &str = "grafana.explore.richHistory.migrated";
}

/// Query fields that differ between otherwise identical runs
pub const TRANSIENT_QUERY_FIELDS: [&str; 2] = ["key", "refId"];

/// History store over a [`KeyValueStore`].
///
/// Writes are serialized within one instance. Separate processes sharing the
/// same backing store are not coordinated; the last write wins.
pub struct LocalHistoryStorage {
    store: Arc<dyn KeyValueStore>,
    directory: Arc<dyn DatasourceDirectory>,
    clock: Arc<dyn Clock>,
    config: LocalConfig,
    utc_offset: Option<FixedOffset>,
    write_lock: Mutex<()>,
}

impl LocalHistoryStorage {
    /// Create a store with default limits and the system clock
    pub fn new(store: Arc<dyn KeyValueStore>, directory: Arc<dyn DatasourceDirectory>) -> Self {
        Self {
            store,
            directory,
            clock: Arc::new(SystemClock),
            config: LocalConfig::default(),
            utc_offset: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store from configuration
    pub fn from_config(
        store: Arc<dyn KeyValueStore>,
        directory: Arc<dyn DatasourceDirectory>,
        config: &LocalConfig,
    ) -> Result<Self> {
        let utc_offset = config.utc_offset()?;
        let mut storage = Self::new(store, directory);
        storage.config = config.clone();
        storage.utc_offset = utc_offset;
        Ok(storage)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.config.max_items = max_items;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.duplicate_policy = policy;
        self
    }

    /// Pin day boundaries to a fixed offset instead of the host timezone
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = Some(offset);
        self
    }

    pub fn max_items(&self) -> usize {
        self.config.max_items
    }

    /// Every entry still inside the retention period, in stored order
    pub fn all_entries(&self) -> Result<Vec<HistoryEntry>> {
        let boundary = self.retention_boundary()?;
        let mut entries = self.load_entries()?;
        entries.retain(|entry| is_retained(entry, boundary));
        Ok(entries)
    }

    /// Whether this history was already imported into the remote backend
    pub fn is_migrated(&self) -> Result<bool> {
        self.store.get_bool(setting_keys::MIGRATED, false)
    }

    pub fn mark_migrated(&self) -> Result<()> {
        self.store.set_object(setting_keys::MIGRATED, &true)
    }

    fn day_boundaries(&self) -> DayBoundaries {
        DayBoundaries::new(self.clock.now(), self.utc_offset)
    }

    fn retention_period(&self) -> Result<u32> {
        self.store
            .get_object(setting_keys::RETENTION_PERIOD, self.config.default_retention_days)
    }

    fn retention_boundary(&self) -> Result<i64> {
        let period = self.retention_period()?;
        Ok(self.day_boundaries().boundary(period, DayEdge::Start))
    }

    fn load_records(&self) -> Result<Vec<LocalHistoryDto>> {
        match self.store.get(RICH_HISTORY_KEY)? {
            Some(raw) if !raw.trim().is_empty() => decode_local_collection(&raw),
            _ => Ok(Vec::new()),
        }
    }

    fn load_entries(&self) -> Result<Vec<HistoryEntry>> {
        let records = self.load_records()?;
        Ok(records
            .iter()
            .map(|record| local_to_entity(record, self.directory.as_ref()))
            .collect())
    }

    /// Run the retention cleanup and persist
    fn commit(&self, entries: &mut Vec<HistoryEntry>) -> Result<()> {
        let expired = apply_retention(entries, self.retention_boundary()?);
        if expired > 0 {
            info!(expired, "dropped query history entries past retention");
        }

        let records: Vec<LocalHistoryDto> = entries.iter().map(entity_to_local).collect();
        self.store.set_object(RICH_HISTORY_KEY, &records)?;
        debug!(count = records.len(), "persisted query history");
        Ok(())
    }

    fn update_entry<F>(&self, id: &str, mutate: F) -> Result<HistoryEntry>
    where
        F: FnOnce(&mut HistoryEntry),
    {
        let _guard = self.write_lock.lock();
        let created_at = parse_id(id)?;
        let mut entries = self.load_entries()?;

        let entry = entries
            .iter_mut()
            .find(|entry| entry.created_at == created_at)
            .ok_or_else(|| HistoryError::not_found(id))?;
        mutate(entry);
        let updated = entry.clone();

        self.commit(&mut entries)?;
        Ok(updated)
    }

    /// Put back the settings written before a failed update.
    ///
    /// Shrinking keys are restored first so the store never grows past the
    /// size it had before the update.
    fn restore_settings(&self, written: &[(&str, String)], previous: &[Option<String>]) {
        let mut restores: Vec<(&str, Option<&String>, i64)> = written
            .iter()
            .zip(previous)
            .map(|((key, new), old)| {
                let old_len = old.as_ref().map_or(0, |v| v.len() as i64);
                (*key, old.as_ref(), old_len - new.len() as i64)
            })
            .collect();
        restores.sort_by_key(|(_, _, growth)| *growth);

        for (key, old, _) in restores {
            let restored = match old {
                Some(value) => self.store.set(key, value),
                None => self.store.delete(key),
            };
            if let Err(e) = restored {
                warn!(key, error = %e, "failed to restore setting after a failed update");
            }
        }
    }
}

#[async_trait]
impl HistoryStorage for LocalHistoryStorage {
    async fn get_rich_history(&self, filters: &SearchFilters) -> Result<HistoryPage> {
        let days = self.day_boundaries();
        let boundary = days.boundary(self.retention_period()?, DayEdge::Start);

        let mut entries = self.load_entries()?;
        entries.retain(|entry| is_retained(entry, boundary));
        if filters.starred {
            entries.retain(|entry| entry.starred);
        }

        let entries = filter_and_sort(entries, filters, &days);
        debug!(count = entries.len(), "read query history");
        Ok(HistoryPage {
            total: entries.len(),
            entries,
        })
    }

    async fn add_to_rich_history(&self, candidate: NewHistoryEntry) -> Result<AddOutcome> {
        let _guard = self.write_lock.lock();
        let mut entries = self.load_entries()?;

        let existing = entries.iter().position(|entry| {
            entry.datasource_name == candidate.datasource_name
                && queries_equivalent(&entry.queries, &candidate.queries)
        });

        let entry = match existing {
            Some(_) if self.config.duplicate_policy == DuplicatePolicy::Reject => {
                return Err(HistoryError::DuplicatedEntry);
            }
            Some(index) => {
                let prior = entries.remove(index);
                let ts = next_timestamp(self.clock.now_millis(), &entries);
                debug!(previous = prior.created_at, ts, "refreshing repeated query");
                HistoryEntry {
                    id: ts.to_string(),
                    created_at: ts,
                    last_executed_at: Some(ts),
                    ..prior
                }
            }
            None => {
                let ts = next_timestamp(self.clock.now_millis(), &entries);
                HistoryEntry {
                    id: ts.to_string(),
                    created_at: ts,
                    last_executed_at: Some(ts),
                    datasource_uid: candidate.datasource_uid,
                    datasource_name: candidate.datasource_name,
                    starred: candidate.starred,
                    comment: candidate.comment,
                    queries: candidate.queries,
                }
            }
        };

        entries.insert(0, entry.clone());
        let evicted = evict_to_capacity(&mut entries, self.config.max_items);
        if evicted > 0 {
            info!(evicted, max_items = self.config.max_items, "evicted oldest unstarred queries");
        }

        // A failed write leaves the stored collection untouched
        self.commit(&mut entries)?;

        let warning = (evicted > 0).then(|| HistoryWarning::limit_exceeded(self.config.max_items));
        Ok(AddOutcome { entry, warning })
    }

    async fn delete_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.delete(RICH_HISTORY_KEY)?;
        info!("cleared query history");
        Ok(())
    }

    async fn delete_rich_history(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let created_at = parse_id(id)?;
        let mut entries = self.load_entries()?;

        let before = entries.len();
        entries.retain(|entry| entry.created_at != created_at);
        if entries.len() == before {
            return Err(HistoryError::not_found(id));
        }

        self.commit(&mut entries)
    }

    async fn update_starred(&self, id: &str, starred: bool) -> Result<HistoryEntry> {
        self.update_entry(id, |entry| entry.starred = starred)
    }

    async fn update_comment(&self, id: &str, comment: &str) -> Result<HistoryEntry> {
        self.update_entry(id, |entry| entry.comment = comment.to_string())
    }

    async fn get_settings(&self) -> Result<HistorySettings> {
        Ok(HistorySettings {
            retention_period: self.retention_period()?,
            starred_tab_as_first_tab: self.store.get_bool(setting_keys::STARRED_TAB, false)?,
            active_datasources_only: self
                .store
                .get_object(setting_keys::ACTIVE_DATASOURCE_ONLY, false)?,
            last_used_datasource_filters: self
                .store
                .get_object(setting_keys::DATASOURCE_FILTERS, Vec::new())?,
        })
    }

    async fn update_settings(&self, settings: &HistorySettings) -> Result<()> {
        let _guard = self.write_lock.lock();
        let values = [
            (
                setting_keys::RETENTION_PERIOD,
                serde_json::to_string(&settings.retention_period)?,
            ),
            (
                setting_keys::STARRED_TAB,
                serde_json::to_string(&settings.starred_tab_as_first_tab)?,
            ),
            (
                setting_keys::ACTIVE_DATASOURCE_ONLY,
                serde_json::to_string(&settings.active_datasources_only)?,
            ),
            (
                setting_keys::DATASOURCE_FILTERS,
                serde_json::to_string(&settings.last_used_datasource_filters)?,
            ),
        ];
        let previous = values
            .iter()
            .map(|(key, _)| self.store.get(key))
            .collect::<Result<Vec<_>>>()?;

        for (written, (key, value)) in values.iter().enumerate() {
            if let Err(err) = self.store.set(key, value) {
                self.restore_settings(&values[..written], &previous[..written]);
                return Err(err);
            }
        }
        Ok(())
    }

    fn supported_features(&self) -> SupportedFeatures {
        SupportedFeatures {
            available_filters: true,
            last_used_datasources_available: true,
            clear_history: true,
            only_active_datasource: true,
            change_retention: true,
            query_history_available: true,
        }
    }
}

/// Local ids are creation timestamps
fn parse_id(id: &str) -> Result<i64> {
    id.parse::<i64>().map_err(|_| HistoryError::not_found(id))
}

/// `now`, bumped past the newest stored timestamp to keep ids unique
fn next_timestamp(now: i64, entries: &[HistoryEntry]) -> i64 {
    match entries.iter().map(|entry| entry.created_at).max() {
        Some(newest) if newest >= now => newest + 1,
        _ => now,
    }
}


/// Structural equality of two query lists, ignoring transient fields
pub fn queries_equivalent(left: &[DataQuery], right: &[DataQuery]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(a, b)| query_equivalent(a, b))
}

fn query_equivalent(a: &DataQuery, b: &DataQuery) -> bool {
    let significant = |query: &DataQuery| {
        query
            .keys()
            .filter(|field| !TRANSIENT_QUERY_FIELDS.contains(&field.as_str()))
            .count()
    };

    significant(a) == significant(b)
        && a
            .iter()
            .filter(|(field, _)| !TRANSIENT_QUERY_FIELDS.contains(&field.as_str()))
            .all(|(field, value)| b.get(field) == Some(value))
}
