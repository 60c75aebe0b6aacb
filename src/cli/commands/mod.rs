//! Subcommand arguments and their execution against a history backend

use crate::cli::output;
use crate::error::{HistoryError, Result};
use crate::history::datasource::DatasourceDirectory;
use crate::history::local::LocalHistoryStorage;
use crate::history::migration::LEGACY_QUERY_FIELD;
use crate::history::remote::RemoteHistoryStorage;
use crate::history::{migrate_local_to_remote, DataQuery, HistoryStorage, NewHistoryEntry, SearchFilters, SortOrder};
use clap::{Args, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::Value;

/// Sort orders accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Newest,
    Oldest,
    DatasourceAsc,
    DatasourceDesc,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Newest => SortOrder::Descending,
            SortArg::Oldest => SortOrder::Ascending,
            SortArg::DatasourceAsc => SortOrder::DatasourceAZ,
            SortArg::DatasourceDesc => SortOrder::DatasourceZA,
        }
    }
}

/// Show saved queries
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Text to search for in queries and comments
    #[arg(short, long)]
    pub search: Option<String>,

    /// Only show queries for these data sources (repeatable)
    #[arg(short, long = "datasource")]
    pub datasources: Vec<String>,

    #[arg(long, value_enum, default_value_t = SortArg::Newest)]
    pub sort: SortArg,

    /// Near end of the time window, in days ago
    #[arg(long, requires = "to")]
    pub from: Option<u32>,

    /// Far end of the time window, in days ago
    #[arg(long, requires = "from")]
    pub to: Option<u32>,

    /// Only show starred queries
    #[arg(long)]
    pub starred: bool,

    /// Page to fetch from the remote backend
    #[arg(long)]
    pub page: Option<u32>,

    /// Maximum number of entries to print
    #[arg(short, long)]
    pub limit: Option<usize>,
}

impl ListCommand {
    pub fn filters(&self) -> SearchFilters {
        SearchFilters {
            search: self.search.clone().unwrap_or_default(),
            sort_order: self.sort.into(),
            datasource_filters: self.datasources.clone(),
            from: self.from,
            to: self.to,
            starred: self.starred,
            page: self.page,
        }
    }

    pub async fn execute(&self, storage: &dyn HistoryStorage) -> Result<()> {
        let page = storage.get_rich_history(&self.filters()).await?;
        output::print_page(&page, self.limit);
        Ok(())
    }
}

/// Save a query
#[derive(Debug, Args)]
pub struct AddCommand {
    /// Data source name
    #[arg(short, long)]
    pub datasource: String,

    /// Data source uid; looked up by name when omitted
    #[arg(long)]
    pub uid: Option<String>,

    /// Queries, as JSON objects or bare query strings
    #[arg(required = true)]
    pub queries: Vec<String>,

    /// Star the query
    #[arg(long)]
    pub star: bool,

    #[arg(short, long)]
    pub comment: Option<String>,
}

impl AddCommand {
    pub async fn execute(&self, storage: &dyn HistoryStorage, directory: &dyn DatasourceDirectory) -> Result<()> {
        let uid = self
            .uid
            .clone()
            .or_else(|| directory.uid_for_name(&self.datasource))
            .unwrap_or_default();
        let queries = self
            .queries
            .iter()
            .map(|raw| parse_query(raw))
            .collect::<Result<Vec<_>>>()?;

        let candidate = NewHistoryEntry::new(uid, self.datasource.clone(), queries)
            .with_starred(self.star)
            .with_comment(self.comment.clone().unwrap_or_default());

        let outcome = storage.add_to_rich_history(candidate).await?;
        if let Some(warning) = &outcome.warning {
            output::print_warning(warning);
        }
        println!("{} {}", "Saved".green(), outcome.entry.id.bold());
        Ok(())
    }
}

/// Parse a query argument; anything that is not a JSON object is a bare query string
pub fn parse_query(raw: &str) -> Result<DataQuery> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HistoryError::invalid_input("query must not be empty"));
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(query)) => Ok(query),
        _ => {
            let mut query = DataQuery::new();
            query.insert(LEGACY_QUERY_FIELD.to_string(), Value::String(raw.to_string()));
            Ok(query)
        }
    }
}

/// Star or unstar a query
#[derive(Debug, Args)]
pub struct StarCommand {
    pub id: String,
}

impl StarCommand {
    pub async fn execute(&self, storage: &dyn HistoryStorage, starred: bool) -> Result<()> {
        let entry = storage.update_starred(&self.id, starred).await?;
        let verb = if entry.starred { "Starred" } else { "Unstarred" };
        println!("{} {}", verb.green(), entry.id.bold());
        Ok(())
    }
}

/// Set the comment of a query
#[derive(Debug, Args)]
pub struct CommentCommand {
    pub id: String,

    /// New comment; empty clears it
    pub comment: String,
}

impl CommentCommand {
    pub async fn execute(&self, storage: &dyn HistoryStorage) -> Result<()> {
        let entry = storage.update_comment(&self.id, &self.comment).await?;
        println!("{} {}", "Updated comment of".green(), entry.id.bold());
        Ok(())
    }
}

/// Delete one query
#[derive(Debug, Args)]
pub struct DeleteCommand {
    pub id: String,
}

impl DeleteCommand {
    pub async fn execute(&self, storage: &dyn HistoryStorage) -> Result<()> {
        storage.delete_rich_history(&self.id).await?;
        println!("{} {}", "Deleted".green(), self.id.bold());
        Ok(())
    }
}

/// Delete every query
#[derive(Debug, Args)]
pub struct ClearCommand {
    /// Required confirmation
    #[arg(long)]
    pub yes: bool,
}

impl ClearCommand {
    pub async fn execute(&self, storage: &dyn HistoryStorage) -> Result<()> {
        if !self.yes {
            return Err(HistoryError::invalid_input(
                "refusing to clear history without --yes",
            ));
        }
        storage.delete_all().await?;
        println!("{}", "Query history cleared".green());
        Ok(())
    }
}

#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Show current settings
    Show,

    /// Change settings; omitted options keep their value
    Set {
        /// Days to keep unstarred queries
        #[arg(long)]
        retention: Option<u32>,

        /// Open the starred tab first
        #[arg(long)]
        starred_first: Option<bool>,

        /// Only show queries of the active data source
        #[arg(long)]
        active_only: Option<bool>,

        /// Remembered data source filters (repeatable)
        #[arg(long = "filter")]
        filters: Option<Vec<String>>,
    },
}

impl SettingsAction {
    pub async fn execute(&self, storage: &dyn HistoryStorage) -> Result<()> {
        let features = storage.supported_features();
        match self {
            Self::Show => {
                let settings = storage.get_settings().await?;
                println!("{}", output::format_settings(&settings, &features));
            }
            Self::Set {
                retention,
                starred_first,
                active_only,
                filters,
            } => {
                let mut settings = storage.get_settings().await?;
                if let Some(days) = retention {
                    if !features.change_retention {
                        return Err(HistoryError::not_supported("changeRetention"));
                    }
                    settings.retention_period = *days;
                }
                if let Some(value) = starred_first {
                    settings.starred_tab_as_first_tab = *value;
                }
                if let Some(value) = active_only {
                    settings.active_datasources_only = *value;
                }
                if let Some(names) = filters {
                    settings.last_used_datasource_filters = names.clone();
                }

                storage.update_settings(&settings).await?;
                println!("{}", output::format_settings(&settings, &features));
            }
        }
        Ok(())
    }
}

/// Import local history into the remote backend once
pub async fn migrate(local: &LocalHistoryStorage, remote: &RemoteHistoryStorage) -> Result<()> {
    let count = migrate_local_to_remote(local, remote).await?;
    if count == 0 {
        println!("{}", "Nothing to migrate".dimmed());
    } else {
        println!(
            "{} {} queries to {}",
            "Migrated".green(),
            count,
            remote.base_url()
        );
    }
    Ok(())
}
