// ABOUTME: SQLite persistence layer for pentest runs and their artifacts
// ABOUTME: Pool construction, embedded migrations, and the RunStore facade

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

pub mod store;

pub use store::RunStore;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
    #[error("Record not found: {0}")]
    NotFound(String),
}

impl From<pentra_models::ModelError> for StorageError {
    fn from(e: pentra_models::ModelError) -> Self {
        StorageError::InvalidValue(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Open (creating if needed) a SQLite database at `path` and run migrations.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(StorageError::Sqlx)?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    info!(path = %path.display(), "Database ready");
    Ok(pool)
}

/// In-memory database for tests. A single connection keeps every query on
/// the same memory instance.
pub async fn connect_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}
