//! Terminal formatting for history entries and settings

use crate::error::HistoryWarning;
use crate::history::{HistoryEntry, HistoryPage, HistorySettings, SupportedFeatures};
use chrono::{Local, TimeZone};
use colored::Colorize;

/// Render an epoch-millisecond timestamp in the local timezone
pub fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}

/// Compact one-line rendering of an entry's queries
pub fn format_queries(entry: &HistoryEntry) -> String {
    entry
        .queries
        .iter()
        .map(|query| match query.get("expr").and_then(|expr| expr.as_str()) {
            Some(expr) => expr.to_string(),
            None => serde_json::Value::Object(query.clone()).to_string(),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

pub fn format_entry(entry: &HistoryEntry) -> String {
    let star = if entry.starred {
        "★".yellow().to_string()
    } else {
        " ".to_string()
    };
    let datasource = if entry.datasource_name.is_empty() {
        "(removed data source)".dimmed().to_string()
    } else {
        entry.datasource_name.cyan().to_string()
    };

    let mut line = format!(
        "{} {} {} {}\n    {}",
        star,
        entry.id.bold(),
        format_timestamp(entry.last_activity()).dimmed(),
        datasource,
        format_queries(entry)
    );
    if !entry.comment.is_empty() {
        line.push_str(&format!("\n    # {}", entry.comment.italic()));
    }
    line
}

pub fn print_page(page: &HistoryPage, limit: Option<usize>) {
    if page.entries.is_empty() {
        println!("{}", "No queries in history".dimmed());
        return;
    }

    let shown = limit.unwrap_or(page.entries.len()).min(page.entries.len());
    for entry in &page.entries[..shown] {
        println!("{}", format_entry(entry));
    }
    println!(
        "\n{}",
        format!("Showing {} of {} queries", shown, page.total).dimmed()
    );
}

pub fn print_warning(warning: &HistoryWarning) {
    eprintln!("{} {}", "Warning:".yellow().bold(), warning.message);
}

pub fn format_settings(settings: &HistorySettings, features: &SupportedFeatures) -> String {
    let mut lines = Vec::new();
    let retention = format!("{} days", settings.retention_period);
    lines.push(format!(
        "{:<28}{}{}",
        "Retention period:",
        retention,
        if features.change_retention { "" } else { " (server defined)" }
    ));
    lines.push(format!(
        "{:<28}{}",
        "Starred tab first:", settings.starred_tab_as_first_tab
    ));
    if features.only_active_datasource {
        lines.push(format!(
            "{:<28}{}",
            "Active data source only:", settings.active_datasources_only
        ));
    }
    if features.last_used_datasources_available {
        let filters = if settings.last_used_datasource_filters.is_empty() {
            "-".to_string()
        } else {
            settings.last_used_datasource_filters.join(", ")
        };
        lines.push(format!("{:<28}{}", "Last used filters:", filters));
    }
    lines.join("\n")
}
