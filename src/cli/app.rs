use crate::cli::commands::*;
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::history::datasource::StaticDatasourceDirectory;
use crate::history::local::LocalHistoryStorage;
use crate::history::remote::RemoteHistoryStorage;
use crate::history::HistoryStorage;
use crate::kv::FileKeyValueStore;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File holding the local key/value store inside the data directory
pub const STORE_FILE_NAME: &str = "rich-history.json";

/// Browse and manage saved data source queries
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (overrides verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Custom data directory path
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Config file path
    #[arg(long, global = true, env = "QUERY_HISTORY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the configured backend
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Local,
    Remote,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Local => BackendKind::Local,
            BackendArg::Remote => BackendKind::Remote,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List saved queries
    List(ListCommand),

    /// Save a query
    Add(AddCommand),

    /// Star a query so it is never evicted or expired
    Star(StarCommand),

    /// Remove the star from a query
    Unstar(StarCommand),

    /// Set the comment of a query
    Comment(CommentCommand),

    /// Delete one query
    Delete(DeleteCommand),

    /// Delete every query
    Clear(ClearCommand),

    /// Show or change history settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Copy local history to the remote backend once
    Migrate,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Log filter implied by the verbosity flags
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => Config::load_from_file(path)?,
            None => Config::load_default().unwrap_or_default(),
        };

        // Prefer CLI arg, then config, then default
        let data_dir = match self.data_dir.clone().or_else(|| config.data_dir.clone()) {
            Some(dir) => {
                if !dir.exists() {
                    std::fs::create_dir_all(&dir)?;
                }
                dir
            }
            None => crate::ensure_data_dir()?,
        };
        debug!(data_dir = %data_dir.display(), "using data directory");

        let directory = Arc::new(StaticDatasourceDirectory::from(config.datasources.as_slice()));
        let backend = self.backend.map(BackendKind::from).unwrap_or(config.backend);

        match self.command {
            Commands::Completion { shell } => {
                generate_completion(shell);
                Ok(())
            }
            Commands::Migrate => {
                let local = open_local(&data_dir, &config, directory.clone())?;
                let remote = RemoteHistoryStorage::from_config(&config.remote, directory)?;
                migrate(&local, &remote).await
            }
            command => {
                let storage: Box<dyn HistoryStorage> = match backend {
                    BackendKind::Local => Box::new(open_local(&data_dir, &config, directory.clone())?),
                    BackendKind::Remote => Box::new(RemoteHistoryStorage::from_config(
                        &config.remote,
                        directory.clone(),
                    )?),
                };
                run(command, storage.as_ref(), directory.as_ref()).await
            }
        }
    }
}

async fn run(
    command: Commands,
    storage: &dyn HistoryStorage,
    directory: &StaticDatasourceDirectory,
) -> Result<()> {
    match command {
        Commands::List(cmd) => cmd.execute(storage).await,
        Commands::Add(cmd) => cmd.execute(storage, directory).await,
        Commands::Star(cmd) => cmd.execute(storage, true).await,
        Commands::Unstar(cmd) => cmd.execute(storage, false).await,
        Commands::Comment(cmd) => cmd.execute(storage).await,
        Commands::Delete(cmd) => cmd.execute(storage).await,
        Commands::Clear(cmd) => cmd.execute(storage).await,
        Commands::Settings { action } => action.execute(storage).await,
        Commands::Migrate | Commands::Completion { .. } => Ok(()),
    }
}

/// Open the file backed local store in `data_dir`
pub fn open_local(
    data_dir: &Path,
    config: &Config,
    directory: Arc<StaticDatasourceDirectory>,
) -> Result<LocalHistoryStorage> {
    let store = FileKeyValueStore::open_with_quota(
        data_dir.join(STORE_FILE_NAME),
        config.local.storage_quota_bytes,
    )?;
    LocalHistoryStorage::from_config(Arc::new(store), directory, &config.local)
}

/// Generate shell completion script
fn generate_completion(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
