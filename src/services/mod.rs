pub mod scanner;
pub mod fts;
pub mod matcher;
pub mod reconciler;
pub mod rename;
pub mod import;

use crate::domain::ValidationError;
use crate::repository::RepositoryError;

/// Errors raised while walking the filesystem or reading tags during a scan.
/// Per spec §7 these are transient and non-fatal; the scanner swallows them
/// into the per-source stats/log and keeps going, it never lets one bad file
/// abort the batch.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Walkdir error: {0}")]
    WalkdirError(#[from] walkdir::Error),

    #[error("Permission denied at {path}: {source}")]
    RootDirAccessError { path: String, source: std::io::Error },

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    RepositoryError(#[from] RepositoryError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Error as SqlxError, SqlitePool};
    use std::str::FromStr;

    /// A single-connection in-memory store with migrations applied. Capped
    /// at one connection: an unnamed `:memory:` database is private to the
    /// connection that created it, so a wider pool would hand different
    /// callers different empty databases.
    pub async fn prepare_in_memory_db() -> Result<SqlitePool, SqlxError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    pub fn init_logger() {
        let _ = env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Warn)
            .try_init();
    }
}
