//! Environment-driven configuration.

use std::path::PathBuf;

/// Worker process configuration, loaded from the environment (a `.env`
/// file is honoured in development).
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; absent means the in-memory gateway.
    pub database_url: Option<String>,
    /// Root directory for per-job tool working directories.
    pub outputs_dir: PathBuf,
    /// Concurrent task limit for the embedded queue.
    pub max_workers: usize,
    /// Optional webhook URL for terminal-event notifications.
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let outputs_dir = std::env::var("SCANFORGE_OUTPUTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("scanforge-outputs"));
        let max_workers = std::env::var("SCANFORGE_MAX_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            outputs_dir,
            max_workers,
            webhook_url: std::env::var("SCANFORGE_WEBHOOK_URL").ok(),
        }
    }
}
