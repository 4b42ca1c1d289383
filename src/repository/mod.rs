pub mod sources_repo;
pub mod tracks_repo;
pub mod downloads_repo;

pub use sources_repo::SqliteSourcesRepository;
pub use tracks_repo::SqliteTracksRepository;
pub use downloads_repo::SqliteDownloadsRepository;

use tracks_repo::TrackConversionError;
use downloads_repo::DownloadConversionError;

/* Database related errors */
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Path contains non-UTF8 characters: {0:?}")]
    InvalidPathEncoding(std::path::PathBuf),

    #[error("Item with id <{0}> was not found.")]
    IdNotFound(i64),

    #[error("Data mapping error for Track: {0}")]
    TrackDataMapping(#[from] TrackConversionError),

    #[error("Data mapping error for Download: {0}")]
    DownloadDataMapping(#[from] DownloadConversionError),

    #[error("No rows was returned by a query that expected to return at least one row.")]
    RowNotFound,

    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Database error: {0}")]
    GenericDatabaseError(#[from] sqlx::Error),

    #[error("A constraint was violated: {description}")]
    ConstraintViolation { description: String },

    #[error("Failed to decode database row: {0}")]
    RowDecodingError(String),
}

impl RepositoryError {
    pub fn from_sqlx_error(sqlx_error: sqlx::Error) -> Self {
        match &sqlx_error {
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                Self::ConnectionError(sqlx_error.to_string())
            }
            sqlx::Error::Decode(decode_err) => Self::RowDecodingError(decode_err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() || db_err.is_foreign_key_violation() => {
                Self::ConstraintViolation { description: db_err.message().to_string() }
            }
            _ => Self::GenericDatabaseError(sqlx_error),
        }
    }
}
