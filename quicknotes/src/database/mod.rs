//! Note store
//!
//! One SQLite file holds the notes, the notification ledger, the graveyard
//! of purged remote ids and the linked-account singleton. The schema is
//! brought up to date before any pooled connection is handed out.

pub mod models;
pub mod repository;
pub mod schema;

pub use models::*;
pub use repository::Repository;
pub use schema::initialize_database;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Connections handed to the services once the schema is ready
const APP_CONNECTIONS: u32 = 5;

fn file_options(db_path: &Path) -> Result<SqliteConnectOptions> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal);
    Ok(opts)
}

/// Run the schema setup over a single connection, then hand the pool back.
async fn migrated(options: SqliteConnectOptions) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    initialize_database(&pool).await?;
    Ok(pool)
}

/// Open the note store at `db_path`, creating the file and its parent
/// directory when missing.
///
/// Pooled connections are opened only after the migrating connection has
/// been closed, so none of them caches a pre-migration schema.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Opening note store at {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    migrated(file_options(db_path)?).await?.close().await;

    let pool = SqlitePoolOptions::new()
        .max_connections(APP_CONNECTIONS)
        .connect_with(file_options(db_path)?)
        .await?;

    tracing::info!("Note store ready");
    Ok(pool)
}

/// Open a migrated, private in-memory store.
///
/// Limited to one connection: every SQLite memory connection is its own
/// database.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    migrated(SqliteConnectOptions::from_str("sqlite::memory:")?).await
}
