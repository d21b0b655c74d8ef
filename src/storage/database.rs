//! SQLite Database
//!
//! Connection pooling for the embedded investigation database, using rusqlite
//! with r2d2.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::utils::error::{AppError, AppResult};

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a writer waits for another writer's transaction before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) a pooled SQLite database file.
pub fn open_pool(db_path: &Path) -> AppResult<DbPool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager =
        SqliteConnectionManager::file(db_path).with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));

    Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))
}

/// Single-connection in-memory database, used by tests.
pub fn open_in_memory_pool() -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::memory();
    Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))
}
