//! Command line front-end for the query history store.
//! ## Usage
//!
//! ```bash
//! # Save a query
//! query-history add --datasource Prometheus 'rate(http_requests_total[5m])'
//!
//! # Search saved queries from the last three days
//! query-history list --search http --from 0 --to 3
//!
//! # Keep a query forever
//! query-history star 1710072000000
//!
//! # Use the remote query history API instead of the local file
//! query-history --backend remote list --starred
//! ```

pub mod app;
pub mod commands;
pub mod output;

#[cfg(test)]
mod commands_test;

pub use app::Cli;
