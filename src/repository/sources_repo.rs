use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use sqlx::{Executor, FromRow, Sqlite};

use crate::domain::source::Source;
use crate::domain::ValidationError;
use crate::utils::normalizations::normalize_path;
use super::RepositoryError;

#[derive(FromRow)]
struct DbSource {
    id: i64,
    path: String,
    added_at: i64,
}

impl TryFrom<DbSource> for Source {
    type Error = SourceConversionError;

    fn try_from(db: DbSource) -> Result<Self, Self::Error> {
        let added_at = seconds_to_naive(db.added_at);
        Ok(Source::new(db.id, PathBuf::from(db.path), added_at)?)
    }
}

fn seconds_to_naive(seconds: i64) -> NaiveDateTime {
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc()).unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum SourceConversionError {
    #[error("Error during validation of source fields: {0}")]
    ValidationError(#[from] ValidationError),
}

pub struct SqliteSourcesRepository;

impl SqliteSourcesRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn add<'e, E>(&self, executor: E, path: &Path, added_at: i64) -> Result<Source, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let path_str = normalize_path(path).to_string_lossy().to_string();

        let db_source = sqlx::query_as::<_, DbSource>(
            "INSERT INTO library_sources(path, added_at) VALUES (?, ?)
             RETURNING id, path, added_at",
        )
        .bind(&path_str)
        .bind(added_at)
        .fetch_one(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(db_source.try_into()?)
    }

    pub async fn remove<'e, E>(&self, executor: E, path: &Path) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let path_str = normalize_path(path).to_string_lossy().to_string();

        sqlx::query("DELETE FROM library_sources WHERE path = ?")
            .bind(&path_str)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn all<'e, E>(&self, executor: E) -> Result<Vec<Source>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbSource>("SELECT id, path, added_at FROM library_sources ORDER BY path")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(|r| Ok(r.try_into()?)).collect()
    }

    pub async fn exists<'e, E>(&self, executor: E, path: &Path) -> Result<bool, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let path_str = normalize_path(path).to_string_lossy().to_string();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM library_sources WHERE path = ?")
            .bind(&path_str)
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(count > 0)
    }

    pub async fn count<'e, E>(&self, executor: E) -> Result<i64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT COUNT(*) FROM library_sources")
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }
}
