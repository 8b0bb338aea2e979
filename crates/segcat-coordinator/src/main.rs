mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use segcat_metadata::{create_sqlite_pool_with, SqliteSegmentRepository};
use segcat_service::{Config, SegmentManager};
use tracing_subscriber::EnvFilter;

/// Segment catalog coordinator.
#[derive(Debug, Parser)]
#[command(name = "segcat-coordinator", version, about)]
struct Cli {
    /// Path to a TOML configuration file (defaults to ./segcat.toml when present)
    #[arg(long, short, global = true, env = "SEGCAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Keep the inventory in sync until SIGINT/SIGTERM
    Serve,
    /// Poll once and print the inventory as JSON
    List,
    /// Mark every visible segment of a datasource used
    EnableDatasource { name: String },
    /// Mark one segment used
    EnableSegment { segment_id: String },
    /// Mark every segment of a datasource unused
    RemoveDatasource { name: String },
    /// Mark one segment unused
    RemoveSegment {
        data_source: String,
        segment_id: String,
    },
    /// Insert segment payloads from JSON files or directories
    Publish {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Insert the rows flagged unused
        #[arg(long)]
        unused: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.clone()).context("failed to load configuration")?;
    config.validate()?;

    init_tracing(&config);

    tracing::info!(database = %config.database.path, "Connecting to metadata store");
    let pool = create_sqlite_pool_with(
        &config.database.path,
        config.database.max_connections,
        Duration::from_secs(config.database.connection_timeout_seconds),
    )
    .await
    .context("failed to create SQLite pool")?;

    let repository = SqliteSegmentRepository::new(pool);
    repository
        .create_segment_table(&config.segments.table)
        .await
        .context("failed to prepare segment table")?;

    let manager = SegmentManager::new(Arc::new(repository.clone()), config.segment_manager());

    match cli.command {
        Command::Serve => commands::serve::run(&manager, shutdown_signal()).await,
        Command::List => commands::list::run(&manager).await,
        Command::EnableDatasource { name } => {
            commands::admin::enable_data_source(&manager, &name).await
        }
        Command::EnableSegment { segment_id } => {
            commands::admin::enable_segment(&manager, &segment_id).await
        }
        Command::RemoveDatasource { name } => {
            commands::admin::remove_data_source(&manager, &name).await
        }
        Command::RemoveSegment {
            data_source,
            segment_id,
        } => commands::admin::remove_segment(&manager, &data_source, &segment_id).await,
        Command::Publish { paths, unused } => {
            let published = commands::publish::publish_segments(
                &repository,
                &config.segments.table,
                &paths,
                !unused,
            )
            .await?;
            println!("published {published} segment(s)");
            Ok(())
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = log_filter(std::env::var("RUST_LOG").ok(), &config.logging.level);
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// `RUST_LOG` directives win over the configured level; unparsable ones are ignored.
fn log_filter(rust_log: Option<String>, level: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
