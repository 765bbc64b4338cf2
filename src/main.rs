//! Regex warden entry point.
//!
//! Loads the registry from SQLite and serves line commands from stdin until
//! EOF or Ctrl-C, then flushes the registry back to storage.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use regex_warden::commands::CommandHandler;
use regex_warden::config::WardenConfig;
use regex_warden::database::Database;
use regex_warden::error::{Result, WardenError};
use regex_warden::publish::{LogTransport, SnapshotPublisher};
use regex_warden::registry::CategoryRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // RUST_LOG controls verbosity, e.g. RUST_LOG=regex_warden=debug
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT"),
        built = env!("BUILD_TIMESTAMP"),
        "Regex warden starting"
    );

    let config = WardenConfig::from_env()?;
    tracing::info!(
        categories = config.enabled_categories.len(),
        update_mode = config.update_mode.as_str(),
        "Configuration loaded"
    );

    let db = Arc::new(Database::new(&config.database_path).await?);
    tracing::info!(path = %config.database_path, "Database initialized");

    let registry = CategoryRegistry::new(&config.enabled_categories, db.clone())?
        .with_detector(config.overlap_detector())
        .with_pending_store(config.pending_store())
        .with_page_size(config.page_size)
        .with_matcher_size_limit(config.matcher_size_limit);
    let loaded = registry.load(&config.seed_patterns).await?;
    tracing::info!(
        patterns = loaded.values().sum::<usize>(),
        "Registry loaded"
    );
    let registry = Arc::new(registry);

    let publisher = Arc::new(SnapshotPublisher::new(
        registry.clone(),
        Arc::new(LogTransport),
        config.publish_settings(),
    ));
    let handler = CommandHandler::new(registry.clone()).with_publisher(publisher);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| WardenError::Io(format!("Failed to read stdin: {}", e)))?;
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = handler.handle_line(&line).await;
                if !reply.text.is_empty() || !reply.actions.is_empty() {
                    println!("{}", reply.render());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break;
            }
        }
    }

    registry.flush().await?;
    db.close().await;
    tracing::info!("Regex warden stopped");
    Ok(())
}
