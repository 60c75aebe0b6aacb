//! Filter & sort engine
//!
//! Pure functions over entry lists, applied in order: data source, search
//! text, time window, sort.

use super::retention::{DayBoundaries, DayEdge};
use super::{HistoryEntry, SearchFilters, SortOrder};
use serde_json::Value;

/// Query fields that never take part in text search
pub const SEARCH_EXCLUDED_FIELDS: [&str; 5] = ["datasource", "key", "refId", "hide", "queryType"];

/// Apply every filter in `filters` and sort the result.
///
/// `filters.starred` and `filters.page` are not handled here.
pub fn filter_and_sort(
    mut entries: Vec<HistoryEntry>,
    filters: &SearchFilters,
    days: &DayBoundaries,
) -> Vec<HistoryEntry> {
    filter_by_datasource(&mut entries, &filters.datasource_filters);
    filter_by_search(&mut entries, &filters.search);
    if let Some(window) = filters.time_window() {
        filter_by_time(&mut entries, window, days);
    }
    sort_entries(&mut entries, filters.sort_order);
    entries
}

/// Keep entries whose data source name is listed; an empty list keeps all
pub fn filter_by_datasource(entries: &mut Vec<HistoryEntry>, names: &[String]) {
    if names.is_empty() {
        return;
    }
    entries.retain(|entry| names.iter().any(|name| *name == entry.datasource_name));
}

/// Keep entries whose comment or query fields contain `search`
pub fn filter_by_search(entries: &mut Vec<HistoryEntry>, search: &str) {
    if search.is_empty() {
        return;
    }
    entries.retain(|entry| matches_search(entry, search));
}

/// Whether `entry` matches the search text
pub fn matches_search(entry: &HistoryEntry, search: &str) -> bool {
    if entry.comment.contains(search) {
        return true;
    }

    entry.queries.iter().any(|query| {
        query
            .iter()
            .filter(|(field, _)| !SEARCH_EXCLUDED_FIELDS.contains(&field.as_str()))
            .any(|(_, value)| value_contains(value, search))
    })
}

fn value_contains(value: &Value, search: &str) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => text.contains(search),
        // Numbers, booleans and nested structures match on their JSON text
        other => other.to_string().contains(search),
    }
}

/// Keep entries created strictly inside the `[from, to]` days-ago window.
///
/// The near edge is the end of the `from` day, the far edge the start of
/// the `to` day.
pub fn filter_by_time(entries: &mut Vec<HistoryEntry>, window: (u32, u32), days: &DayBoundaries) {
    let (from, to) = window;
    let near = days.boundary(from, DayEdge::End);
    let far = days.boundary(to, DayEdge::Start);
    entries.retain(|entry| entry.created_at < near && entry.created_at > far);
}

/// Stable sort by the requested order
pub fn sort_entries(entries: &mut [HistoryEntry], order: SortOrder) {
    match order {
        SortOrder::Ascending => entries.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortOrder::Descending => entries.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortOrder::DatasourceAZ => {
            entries.sort_by(|a, b| a.datasource_name.cmp(&b.datasource_name))
        }
        SortOrder::DatasourceZA => {
            entries.sort_by(|a, b| b.datasource_name.cmp(&a.datasource_name))
        }
    }
}
