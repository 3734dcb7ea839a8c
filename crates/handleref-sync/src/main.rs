//! handleref-sync: dump records changed since HANDLEREF_SINCE / HANDLEREF_SINCE_VERSION
//! from a SQLite store to stdout as JSON lines.

use handleref_model::HandleRefManager;
use handleref_store::SqliteEntityStore;
use handleref_sync::{export, SyncConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = SyncConfig::from_env()?;
    let store = SqliteEntityStore::new(&config.db_path)?;
    let manager = HandleRefManager::new(store, Arc::new(config.registry()?));

    let stdout = std::io::stdout();
    let count = export(&manager, &config, &mut stdout.lock()).await?;
    let last_change = manager.last_change(&config.entity_type).await?;
    tracing::info!(
        entity_type = %config.entity_type,
        db = %config.db_path.display(),
        count,
        last_change = ?last_change,
        "sync export done"
    );
    Ok(())
}
