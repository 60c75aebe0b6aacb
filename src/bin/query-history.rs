use anyhow::Result;
use clap::Parser;
use query_history::cli::Cli;
use tracing::{debug, error};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Environment filter wins over the verbosity flags
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Starting query-history CLI");

    if let Err(e) = cli.execute().await {
        error!("Command execution failed: {:?}", e);
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }

    Ok(())
}
