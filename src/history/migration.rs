//! On-disk and wire record shapes, and their conversion to `HistoryEntry`
//!
//! Local records written by older versions may carry queries as:
//! - structured objects (current format), passed through
//! - JSON encoded objects, parsed
//! - bare query-language strings, wrapped as `{ "expr": .., "refId": .. }`
//!
//! Conversion is pure; nothing here writes back to storage.

use super::datasource::DatasourceDirectory;
use super::{DataQuery, HistoryEntry};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Field bare legacy query strings are stored under
pub const LEGACY_QUERY_FIELD: &str = "expr";

const REF_ID_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Record shape persisted by the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalHistoryDto {
    /// Creation time in epoch milliseconds; doubles as the record id
    pub ts: i64,
    #[serde(default)]
    pub datasource_name: String,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub queries: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<i64>,
}

/// Record shape exchanged with the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHistoryDto {
    pub uid: String,
    /// Creation time in epoch seconds
    pub created_at: i64,
    #[serde(default)]
    pub datasource_uid: String,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub queries: Vec<Value>,
}

/// Convert raw stored queries into structured queries.
///
/// Bare strings get the `refId` letter matching their position, or the next
/// letter not already taken by a structured query of the same record.
pub fn migrate_queries(raw: &[Value]) -> Vec<DataQuery> {
    let mut migrated: Vec<Option<DataQuery>> = Vec::with_capacity(raw.len());
    let mut used: HashSet<String> = HashSet::new();

    for value in raw {
        let structured = structured_query(value);
        if let Some(ref_id) = structured
            .as_ref()
            .and_then(|q| q.get("refId"))
            .and_then(Value::as_str)
        {
            used.insert(ref_id.to_string());
        }
        migrated.push(structured);
    }

    migrated
        .into_iter()
        .zip(raw)
        .enumerate()
        .map(|(index, (structured, value))| match structured {
            Some(query) => query,
            None => {
                let ref_id = next_ref_id(index, &used);
                used.insert(ref_id.clone());
                legacy_query(value, ref_id)
            }
        })
        .collect()
}

fn structured_query(value: &Value) -> Option<DataQuery> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn legacy_query(value: &Value, ref_id: String) -> DataQuery {
    let expr = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let mut query = DataQuery::new();
    query.insert(LEGACY_QUERY_FIELD.to_string(), Value::String(expr));
    query.insert("refId".to_string(), Value::String(ref_id));
    query
}

fn next_ref_id(position: usize, used: &HashSet<String>) -> String {
    let letters = REF_ID_LETTERS.len();
    (0..letters)
        .map(|offset| (REF_ID_LETTERS[(position + offset) % letters] as char).to_string())
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| format!("Q{}", position))
}

/// Parse the persisted local collection, skipping records that cannot be decoded
pub fn decode_local_collection(raw: &str) -> Result<Vec<LocalHistoryDto>> {
    let values: Vec<Value> = serde_json::from_str(raw)?;
    let mut records = Vec::with_capacity(values.len());

    for value in values {
        match serde_json::from_value::<LocalHistoryDto>(value) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "skipping undecodable query history record"),
        }
    }

    Ok(records)
}

/// Local record to entity; the uid is looked up by name
pub fn local_to_entity(dto: &LocalHistoryDto, directory: &dyn DatasourceDirectory) -> HistoryEntry {
    HistoryEntry {
        id: dto.ts.to_string(),
        created_at: dto.ts,
        last_executed_at: dto.last_executed_at,
        // Empty uid marks a removed data source
        datasource_uid: directory
            .uid_for_name(&dto.datasource_name)
            .unwrap_or_default(),
        datasource_name: dto.datasource_name.clone(),
        starred: dto.starred,
        comment: dto.comment.clone(),
        queries: migrate_queries(&dto.queries),
    }
}

/// Entity to local record
pub fn entity_to_local(entry: &HistoryEntry) -> LocalHistoryDto {
    LocalHistoryDto {
        ts: entry.created_at,
        datasource_name: entry.datasource_name.clone(),
        starred: entry.starred,
        comment: entry.comment.clone(),
        queries: entry.queries.iter().cloned().map(Value::Object).collect(),
        last_executed_at: entry.last_executed_at,
    }
}

/// Remote record to entity; the name is looked up by uid
pub fn remote_to_entity(dto: &RemoteHistoryDto, directory: &dyn DatasourceDirectory) -> HistoryEntry {
    HistoryEntry {
        id: dto.uid.clone(),
        created_at: dto.created_at * 1000,
        last_executed_at: None,
        datasource_uid: dto.datasource_uid.clone(),
        datasource_name: directory
            .name_for_uid(&dto.datasource_uid)
            .unwrap_or_default(),
        starred: dto.starred,
        comment: dto.comment.clone(),
        queries: migrate_queries(&dto.queries),
    }
}

/// Entity to remote record, used when importing local history
pub fn entity_to_remote(entry: &HistoryEntry, directory: &dyn DatasourceDirectory) -> RemoteHistoryDto {
    let datasource_uid = if entry.datasource_uid.is_empty() {
        directory
            .uid_for_name(&entry.datasource_name)
            .unwrap_or_default()
    } else {
        entry.datasource_uid.clone()
    };

    RemoteHistoryDto {
        uid: entry.id.clone(),
        created_at: entry.created_at.div_euclid(1000),
        datasource_uid,
        starred: entry.starred,
        comment: entry.comment.clone(),
        queries: entry.queries.iter().cloned().map(Value::Object).collect(),
    }
}
