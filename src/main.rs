//! db-toolkit - Main entry point.
//!
//! Runs migrations from a directory of SQL files against one database.

use clap::Parser;
use db_toolkit::config::{Command, Config};
use db_toolkit::migrate::{Migrator, SqlDirectory};
use db_toolkit::Database;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    let db_config = config.database_config()?;
    info!(
        db_type = %db_config.db_type,
        migrations_dir = %config.migrations_dir.display(),
        "Starting db-toolkit v{}",
        env!("CARGO_PKG_VERSION")
    );

    let database = Database::connect(&db_config).await?;
    let migrator = Migrator::with_config(
        database,
        SqlDirectory::new(&config.migrations_dir),
        config.migrator_config(),
    );

    let result = match config.command {
        Command::Migrate => migrator.migrate().await.map(|applied| {
            if applied.is_empty() {
                println!("Already up to date");
            }
            for record in applied {
                println!("Applied {} (batch {})", record.name, record.batch);
            }
        }),
        Command::Rollback => migrator.rollback().await.map(|reverted| {
            if reverted.is_empty() {
                println!("Nothing to roll back");
            }
            for record in reverted {
                println!("Reverted {} (batch {})", record.name, record.batch);
            }
        }),
        Command::Status => migrator.status().await.map(|status| {
            for record in &status.applied {
                println!("applied  {} (batch {})", record.name, record.batch);
            }
            for name in &status.pending {
                println!("pending  {}", name);
            }
        }),
    };

    if let Err(e) = result {
        error!(error = %e, code = e.code(), "Command failed");
        return Err(e.into());
    }
    Ok(())
}
