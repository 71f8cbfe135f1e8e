//! Worker process entrypoint: wires the service graph and runs the task
//! queue until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scanforge_storage::{EncryptionService, MemoryStore, PostgresStore, Store};
use scanforge_worker::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        outputs_dir = %config.outputs_dir.display(),
        max_workers = config.max_workers,
        "starting scanforge worker"
    );

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::from_url(url)
                .await
                .context("failed to connect to database")?;
            info!("using postgres persistence gateway");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory gateway (state is not durable)");
            Arc::new(MemoryStore::new())
        }
    };

    let crypto = match EncryptionService::from_env() {
        Ok(crypto) => crypto,
        Err(e) => {
            warn!("no encryption key configured ({e}); generating an ephemeral key");
            let key = scanforge_storage::generate_encryption_key("ephemeral");
            EncryptionService::new(&key, &[]).context("failed to build encryption service")?
        }
    };

    let app = Arc::new(App::new(store, crypto, &config));
    app.start();
    info!("worker ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    app.stop().await;

    Ok(())
}
