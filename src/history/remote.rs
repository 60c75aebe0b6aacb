//! Query history backed by the HTTP query history API
//!
//! Reads are last-request-wins: a newer read with the same request key
//! supersedes an in-flight one, which resolves to `HistoryError::Cancelled`.

use super::datasource::DatasourceDirectory;
use super::migration::{entity_to_remote, remote_to_entity, RemoteHistoryDto};
use super::{
    AddOutcome, DataQuery, HistoryEntry, HistoryPage, HistorySettings, HistoryStorage, HomeTab,
    NewHistoryEntry, SearchFilters, SortOrder, SupportedFeatures,
};
use crate::config::RemoteConfig;
use crate::error::{HistoryError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

/// Request key of unfiltered history reads
pub const GET_ALL_REQUEST_KEY: &str = "query-history-get-all";

/// Request key of starred-only reads
pub const GET_STARRED_REQUEST_KEY: &str = "query-history-get-starred";

/// Retention reported by the server; not configurable
pub const REMOTE_RETENTION_DAYS: u32 = 14;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Full,
    Minimal,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    #[serde(default)]
    query_history: Vec<RemoteHistoryDto>,
    #[serde(default)]
    total_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueryCommand<'a> {
    datasource_uid: &'a str,
    queries: &'a [DataQuery],
}

#[derive(Serialize)]
struct PatchCommentCommand<'a> {
    comment: &'a str,
}

#[derive(Serialize)]
struct MigrateCommand {
    queries: Vec<RemoteHistoryDto>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Preferences {
    #[serde(default)]
    query_history: QueryHistoryPreference,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QueryHistoryPreference {
    #[serde(default)]
    home_tab: String,
}

/// In-flight reads by request key
#[derive(Default)]
struct InFlight {
    next_ticket: AtomicU64,
    slots: Mutex<HashMap<&'static str, (u64, oneshot::Sender<()>)>>,
}

impl InFlight {
    /// Register a read, superseding any previous one with the same key
    fn begin(&self, key: &'static str) -> (u64, oneshot::Receiver<()>) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        if let Some((previous, superseded)) = self.slots.lock().insert(key, (ticket, cancel)) {
            debug!(key, previous, "superseding in-flight query history request");
            let _ = superseded.send(());
        }
        (ticket, cancelled)
    }

    fn finish(&self, key: &'static str, ticket: u64) {
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|(current, _)| *current == ticket) {
            slots.remove(key);
        }
    }
}

/// History store talking to the query history HTTP API
pub struct RemoteHistoryStorage {
    client: Client,
    base_url: Url,
    directory: Arc<dyn DatasourceDirectory>,
    page_size: u32,
    variant: Variant,
    in_flight: InFlight,
}

impl RemoteHistoryStorage {
    /// Create a store for the API rooted at `base_url` (e.g. `http://host:3000/api`)
    pub fn new(base_url: &str, directory: Arc<dyn DatasourceDirectory>) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(HistoryError::Configuration(format!(
                "'{}' cannot be used as an API base URL",
                base_url
            )));
        }

        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            base_url,
            directory,
            page_size: DEFAULT_PAGE_SIZE,
            variant: Variant::Full,
            in_flight: InFlight::default(),
        })
    }

    /// Create a store that only reads, adds and stars.
    ///
    /// Deleting, commenting and changing settings fail with `NotSupported`.
    pub fn minimal(base_url: &str, directory: Arc<dyn DatasourceDirectory>) -> Result<Self> {
        let mut storage = Self::new(base_url, directory)?;
        storage.variant = Variant::Minimal;
        Ok(storage)
    }

    /// Create a store from configuration
    pub fn from_config(config: &RemoteConfig, directory: Arc<dyn DatasourceDirectory>) -> Result<Self> {
        Self::new(&config.base_url, directory)?
            .page_size(config.page_size)
            .timeout(Duration::from_secs(config.timeout_secs))
    }

    /// Results per page, sent as `limit`
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Bulk import entries, e.g. when moving local history to the server
    pub async fn import(&self, entries: &[HistoryEntry]) -> Result<()> {
        let command = MigrateCommand {
            queries: entries
                .iter()
                .map(|entry| entity_to_remote(entry, self.directory.as_ref()))
                .collect(),
        };

        let url = self.endpoint(&["query-history", "migrate"])?;
        let request = self.client.post(url).json(&command);
        self.execute(request, "query-history/migrate").await?;
        info!(count = entries.len(), "imported query history");
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                HistoryError::Configuration(format!("'{}' cannot be used as an API base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn require_full(&self, operation: &str) -> Result<()> {
        match self.variant {
            Variant::Full => Ok(()),
            Variant::Minimal => Err(HistoryError::not_supported(operation)),
        }
    }

    /// Send a request and map non-success statuses
    async fn execute(&self, request: RequestBuilder, resource: &str) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(resource, status = status.as_u16(), "query history API response");

        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(HistoryError::not_found(resource));
        }

        let body = response.text().await.unwrap_or_default();
        Err(HistoryError::Api {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder, resource: &str) -> Result<T> {
        let response = self.execute(request, resource).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn entry_request(&self, method: Method, segments: &[&str], id: &str) -> Result<HistoryEntry> {
        let url = self.endpoint(segments)?;
        let response: ApiResponse<RemoteHistoryDto> =
            self.fetch(self.client.request(method, url), id).await?;
        Ok(remote_to_entity(&response.result, self.directory.as_ref()))
    }

    async fn search(&self, params: &[(String, String)]) -> Result<HistoryPage> {
        let url = self.endpoint(&["query-history"])?;
        let response: ApiResponse<SearchResult> = self
            .fetch(self.client.get(url).query(params), "query-history")
            .await?;

        let entries: Vec<HistoryEntry> = response
            .result
            .query_history
            .iter()
            .map(|dto| remote_to_entity(dto, self.directory.as_ref()))
            .collect();
        debug!(count = entries.len(), total = response.result.total_count, "read remote query history");

        Ok(HistoryPage {
            total: response.result.total_count,
            entries,
        })
    }
}

#[async_trait]
impl HistoryStorage for RemoteHistoryStorage {
    async fn get_rich_history(&self, filters: &SearchFilters) -> Result<HistoryPage> {
        let params = build_query_params(filters, self.directory.as_ref(), self.page_size);
        let key = if filters.starred {
            GET_STARRED_REQUEST_KEY
        } else {
            GET_ALL_REQUEST_KEY
        };

        let (ticket, superseded) = self.in_flight.begin(key);
        let result = tokio::select! {
            result = self.search(&params) => result,
            _ = superseded => Err(HistoryError::Cancelled(key.to_string())),
        };
        self.in_flight.finish(key, ticket);
        result
    }

    async fn add_to_rich_history(&self, entry: NewHistoryEntry) -> Result<AddOutcome> {
        let command = CreateQueryCommand {
            datasource_uid: &entry.datasource_uid,
            queries: &entry.queries,
        };
        let url = self.endpoint(&["query-history"])?;
        let response: ApiResponse<RemoteHistoryDto> = self
            .fetch(self.client.post(url).json(&command), "query-history")
            .await?;

        Ok(AddOutcome {
            entry: remote_to_entity(&response.result, self.directory.as_ref()),
            warning: None,
        })
    }

    async fn delete_all(&self) -> Result<()> {
        Err(HistoryError::not_supported("deleteAll"))
    }

    async fn delete_rich_history(&self, id: &str) -> Result<()> {
        self.require_full("deleteRichHistory")?;
        let url = self.endpoint(&["query-history", id])?;
        self.execute(self.client.delete(url), id).await?;
        Ok(())
    }

    async fn update_starred(&self, id: &str, starred: bool) -> Result<HistoryEntry> {
        let method = if starred { Method::POST } else { Method::DELETE };
        self.entry_request(method, &["query-history", "star", id], id)
            .await
    }

    async fn update_comment(&self, id: &str, comment: &str) -> Result<HistoryEntry> {
        self.require_full("updateComment")?;
        let url = self.endpoint(&["query-history", id])?;
        let request = self
            .client
            .patch(url)
            .json(&PatchCommentCommand { comment });
        let response: ApiResponse<RemoteHistoryDto> = self.fetch(request, id).await?;
        Ok(remote_to_entity(&response.result, self.directory.as_ref()))
    }

    async fn get_settings(&self) -> Result<HistorySettings> {
        let url = self.endpoint(&["user", "preferences"])?;
        let preferences: Preferences = self.fetch(self.client.get(url), "user/preferences").await?;
        let home_tab = HomeTab::from_preference(&preferences.query_history.home_tab);

        Ok(HistorySettings {
            retention_period: REMOTE_RETENTION_DAYS,
            starred_tab_as_first_tab: home_tab == HomeTab::Starred,
            active_datasources_only: false,
            last_used_datasource_filters: Vec::new(),
        })
    }

    async fn update_settings(&self, settings: &HistorySettings) -> Result<()> {
        self.require_full("updateSettings")?;
        let home_tab = if settings.starred_tab_as_first_tab {
            HomeTab::Starred
        } else {
            HomeTab::Query
        };
        let preferences = Preferences {
            query_history: QueryHistoryPreference {
                home_tab: home_tab.as_preference().to_string(),
            },
        };

        let url = self.endpoint(&["user", "preferences"])?;
        self.execute(self.client.patch(url).json(&preferences), "user/preferences")
            .await?;
        Ok(())
    }

    fn supported_features(&self) -> SupportedFeatures {
        SupportedFeatures {
            available_filters: true,
            last_used_datasources_available: false,
            clear_history: false,
            only_active_datasource: false,
            change_retention: false,
            query_history_available: true,
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Prefer the `message` field of a JSON error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn relative_days(days: u32) -> String {
    if days == 0 {
        "now".to_string()
    } else {
        format!("now-{}d", days)
    }
}

/// Translate search filters into query history API parameters.
///
/// The API reads `from`/`to` the other way around from `SearchFilters`: the
/// near bound goes out as `to` and the far bound as `from`.
pub fn build_query_params(
    filters: &SearchFilters,
    directory: &dyn DatasourceDirectory,
    page_size: u32,
) -> Vec<(String, String)> {
    let mut params = Vec::new();

    for name in &filters.datasource_filters {
        match directory.uid_for_name(name) {
            Some(uid) => params.push(("datasourceUid".to_string(), uid)),
            None => warn!(datasource = %name, "no uid for data source filter, skipping"),
        }
    }

    if !filters.search.is_empty() {
        params.push(("searchString".to_string(), filters.search.clone()));
    }

    let sort = match filters.sort_order {
        SortOrder::Ascending => "time-asc",
        _ => "time-desc",
    };
    params.push(("sort".to_string(), sort.to_string()));

    if !filters.starred {
        if let Some((from, to)) = filters.time_window() {
            params.push(("to".to_string(), relative_days(from)));
            params.push(("from".to_string(), relative_days(to)));
        }
    }

    params.push(("limit".to_string(), page_size.to_string()));
    params.push(("page".to_string(), filters.page.unwrap_or(1).to_string()));

    if filters.starred {
        params.push(("onlyStarred".to_string(), "true".to_string()));
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::datasource::StaticDatasourceDirectory;

    fn directory() -> StaticDatasourceDirectory {
        StaticDatasourceDirectory::new([("Prometheus", "prom-1"), ("Loki", "loki-1")])
    }

    fn param<'a>(params: &'a [(String, String)], name: &str) -> Vec<&'a str> {
        params
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    #[test]
    fn test_params_swap_time_bounds() {
        let filters = SearchFilters {
            from: Some(0),
            to: Some(7),
            ..Default::default()
        };
        let params = build_query_params(&filters, &directory(), 100);

        assert_eq!(param(&params, "to"), vec!["now"]);
        assert_eq!(param(&params, "from"), vec!["now-7d"]);
        assert_eq!(param(&params, "sort"), vec!["time-desc"]);
        assert_eq!(param(&params, "limit"), vec!["100"]);
        assert_eq!(param(&params, "page"), vec!["1"]);
        assert!(param(&params, "onlyStarred").is_empty());
    }

    #[test]
    fn test_params_resolve_datasources_and_search() {
        let filters = SearchFilters {
            search: "rate".to_string(),
            datasource_filters: vec!["Loki".to_string(), "Gone".to_string(), "Prometheus".to_string()],
            sort_order: SortOrder::Ascending,
            page: Some(3),
            ..Default::default()
        };
        let params = build_query_params(&filters, &directory(), 25);

        assert_eq!(param(&params, "datasourceUid"), vec!["loki-1", "prom-1"]);
        assert_eq!(param(&params, "searchString"), vec!["rate"]);
        assert_eq!(param(&params, "sort"), vec!["time-asc"]);
        assert_eq!(param(&params, "limit"), vec!["25"]);
        assert_eq!(param(&params, "page"), vec!["3"]);
    }

    #[test]
    fn test_params_for_starred_skip_time_window() {
        let filters = SearchFilters {
            starred: true,
            from: Some(1),
            to: Some(2),
            sort_order: SortOrder::DatasourceAZ,
            ..Default::default()
        };
        let params = build_query_params(&filters, &directory(), 100);

        assert!(param(&params, "to").is_empty());
        assert!(param(&params, "from").is_empty());
        assert_eq!(param(&params, "onlyStarred"), vec!["true"]);
        assert_eq!(param(&params, "sort"), vec!["time-desc"]);
    }

    #[test]
    fn test_error_message_prefers_json_field() {
        assert_eq!(error_message(r#"{"message":"bad uid"}"#), "bad uid");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let directory: Arc<dyn DatasourceDirectory> = Arc::new(directory());
        let storage = RemoteHistoryStorage::new("http://localhost:3000/api/", directory).unwrap();
        let url = storage.endpoint(&["query-history", "star", "abc"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/query-history/star/abc");
    }

    #[test]
    fn test_invalid_base_url() {
        let directory: Arc<dyn DatasourceDirectory> = Arc::new(directory());
        let err = RemoteHistoryStorage::new("not a url", directory.clone()).err().unwrap();
        assert_eq!(err.name(), "Url");

        let err = RemoteHistoryStorage::new("mailto:someone@example.com", directory)
            .err()
            .unwrap();
        assert_eq!(err.name(), "Configuration");
    }
}
