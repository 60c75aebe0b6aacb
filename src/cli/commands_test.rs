use super::app::{Cli, Commands, STORE_FILE_NAME};
use super::commands::*;
use crate::config::Config;
use crate::error::Result;
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;

/// Temporary data directory with a config file pointing at it
pub struct MockCliEnvironment {
    pub temp_dir: TempDir,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
}

impl MockCliEnvironment {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let data_dir = temp_dir.path().join("data");
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.data_dir = Some(data_dir.clone());
        config.datasources = vec![crate::config::DatasourceConfig {
            name: "Prometheus".to_string(),
            uid: "prom-1".to_string(),
        }];
        config.save_to_file(&config_path)?;

        Ok(Self {
            temp_dir,
            data_dir,
            config_path,
        })
    }

    /// Parse and run a command line against this environment
    pub async fn run(&self, args: &[&str]) -> Result<()> {
        let config = self.config_path.to_string_lossy().to_string();
        let mut argv = vec!["query-history", "--quiet", "--config", config.as_str()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().execute().await
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }

    /// Records persisted by the local backend
    pub fn records(&self) -> Vec<Value> {
        let raw = std::fs::read_to_string(self.store_path()).unwrap();
        let map: serde_json::Map<String, Value> = serde_json::from_str(&raw).unwrap();
        map.get(crate::history::local::RICH_HISTORY_KEY)
            .and_then(Value::as_str)
            .map(|history| serde_json::from_str(history).unwrap())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod parsing_tests {
    use super::*;

    #[test]
    fn test_list_arguments() {
        let cli = Cli::try_parse_from([
            "query-history",
            "list",
            "--search",
            "rate",
            "-d",
            "Prometheus",
            "-d",
            "Loki",
            "--sort",
            "oldest",
            "--from",
            "1",
            "--to",
            "7",
        ])
        .unwrap();

        match cli.command {
            Commands::List(cmd) => {
                assert_eq!(cmd.search.as_deref(), Some("rate"));
                assert_eq!(cmd.datasources, vec!["Prometheus", "Loki"]);
                assert_eq!(cmd.sort, SortArg::Oldest);
                assert_eq!(cmd.filters().time_window(), Some((1, 7)));
            }
            _ => panic!("Expected list command"),
        }
    }

    #[test]
    fn test_time_window_needs_both_bounds() {
        assert!(Cli::try_parse_from(["query-history", "list", "--from", "1"]).is_err());
    }

    #[test]
    fn test_add_requires_a_query() {
        assert!(Cli::try_parse_from(["query-history", "add", "-d", "Prometheus"]).is_err());

        let cli = Cli::try_parse_from([
            "query-history",
            "add",
            "-d",
            "Prometheus",
            "up",
            "{\"expr\":\"down\"}",
            "--star",
        ])
        .unwrap();
        match cli.command {
            Commands::Add(cmd) => {
                assert_eq!(cmd.queries.len(), 2);
                assert!(cmd.star);
            }
            _ => panic!("Expected add command"),
        }
    }

    #[test]
    fn test_log_level_flags() {
        let quiet = Cli::try_parse_from(["query-history", "-q", "-v", "list"]).unwrap();
        assert_eq!(quiet.log_level(), "warn");
        let verbose = Cli::try_parse_from(["query-history", "-v", "list"]).unwrap();
        assert_eq!(verbose.log_level(), "debug");
        let default = Cli::try_parse_from(["query-history", "list"]).unwrap();
        assert_eq!(default.log_level(), "info");
    }
}

#[cfg(test)]
mod execution_tests {
    use super::*;

    #[tokio::test]
    async fn test_add_star_comment_delete_flow() {
        let env = MockCliEnvironment::new().unwrap();

        env.run(&["add", "-d", "Prometheus", "up"]).await.unwrap();
        let records = env.records();
        assert_eq!(records.len(), 1);
        let id = records[0]["ts"].as_i64().unwrap().to_string();

        env.run(&["star", id.as_str()]).await.unwrap();
        env.run(&["comment", id.as_str(), "baseline"]).await.unwrap();
        let records = env.records();
        assert_eq!(records[0]["starred"], Value::Bool(true));
        assert_eq!(records[0]["comment"], Value::String("baseline".to_string()));

        env.run(&["list", "--starred"]).await.unwrap();

        env.run(&["delete", id.as_str()]).await.unwrap();
        assert!(env.records().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_fails() {
        let env = MockCliEnvironment::new().unwrap();
        env.run(&["add", "-d", "Prometheus", "up"]).await.unwrap();

        let err = env.run(&["star", "123"]).await.unwrap_err();
        assert_eq!(err.name(), "NotFound");
    }

    #[tokio::test]
    async fn test_clear_needs_confirmation() {
        let env = MockCliEnvironment::new().unwrap();
        env.run(&["add", "-d", "Prometheus", "up"]).await.unwrap();

        let err = env.run(&["clear"]).await.unwrap_err();
        assert_eq!(err.name(), "InvalidInput");
        assert_eq!(env.records().len(), 1);

        env.run(&["clear", "--yes"]).await.unwrap();
        assert!(env.records().is_empty());
    }

    #[tokio::test]
    async fn test_settings_set_and_show() {
        let env = MockCliEnvironment::new().unwrap();
        env.run(&["settings", "set", "--retention", "14", "--starred-first", "true"])
            .await
            .unwrap();
        env.run(&["settings", "show"]).await.unwrap();

        let raw = std::fs::read_to_string(env.store_path()).unwrap();
        let map: serde_json::Map<String, Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            map["grafana.explore.richHistory.retentionPeriod"],
            Value::String("14".to_string())
        );
    }
}
