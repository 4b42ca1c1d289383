use chrono::{DateTime, NaiveDateTime};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::download::{Download, DownloadFile, TransferStatus};
use super::RepositoryError;

#[derive(FromRow)]
struct DbDownload {
    id: i64,
    release_group_id: String,
    release_id: String,
    artist: String,
    album: String,
    year: Option<i64>,
    username: String,
    remote_directory: String,
    status: String,
    imported_paths: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(FromRow)]
struct DbDownloadFile {
    id: i64,
    download_id: i64,
    filename: String,
    size: i64,
    status: String,
    bytes_read: i64,
    verified_on_disk: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadConversionError {
    #[error("Invalid uuid stored for download: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Invalid imported_paths JSON stored for download: {0}")]
    InvalidImportedPaths(#[from] serde_json::Error),
}

fn seconds_to_naive(seconds: i64) -> NaiveDateTime {
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc()).unwrap_or_default()
}

fn assemble(db: DbDownload, file_rows: Vec<DbDownloadFile>) -> Result<Download, DownloadConversionError> {
    let files = file_rows
        .into_iter()
        .map(|f| {
            let mut file = DownloadFile::new(f.id, f.download_id, f.filename, f.size as u64);
            file.set_status(TransferStatus::from_str(&f.status));
            file.set_bytes_read(f.bytes_read as u64);
            file.set_verified_on_disk(f.verified_on_disk);
            file
        })
        .collect();

    let mut download = Download::new(
        db.id,
        Uuid::parse_str(&db.release_group_id)?,
        Uuid::parse_str(&db.release_id)?,
        db.artist,
        db.album,
        db.year,
        db.username,
        db.remote_directory,
        seconds_to_naive(db.created_at),
        seconds_to_naive(db.updated_at),
        files,
    );

    download.set_status(TransferStatus::from_str(&db.status), seconds_to_naive(db.updated_at));
    let imported: Vec<String> = serde_json::from_str(&db.imported_paths)?;
    for path in imported {
        download.push_imported_path(path);
    }

    Ok(download)
}

pub struct SqliteDownloadsRepository;

impl SqliteDownloadsRepository {
    pub fn new() -> Self {
        Self
    }

    /// Issues several statements (insert download, insert N files, re-read
    /// files), so unlike the single-statement methods below this one takes
    /// a concrete `&mut SqliteConnection` rather than a generic executor —
    /// callers reborrow with `&mut *tx` or `&mut *conn` between calls.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        conn: &mut SqliteConnection,
        release_group_id: Uuid,
        release_id: Uuid,
        artist: &str,
        album: &str,
        year: Option<i64>,
        username: &str,
        remote_directory: &str,
        files: &[(String, u64)],
        now: NaiveDateTime,
    ) -> Result<Download, RepositoryError> {
        let ts = now.and_utc().timestamp();

        let db_download = sqlx::query_as::<_, DbDownload>(
            "INSERT INTO downloads(release_group_id, release_id, artist, album, year, username, \
             remote_directory, status, imported_paths, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', '[]', ?, ?) \
             RETURNING id, release_group_id, release_id, artist, album, year, username, \
             remote_directory, status, imported_paths, created_at, updated_at",
        )
        .bind(release_group_id.to_string())
        .bind(release_id.to_string())
        .bind(artist)
        .bind(album)
        .bind(year)
        .bind(username)
        .bind(remote_directory)
        .bind(ts)
        .bind(ts)
        .fetch_one(&mut *conn)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        for (filename, size) in files {
            sqlx::query("INSERT INTO download_files(download_id, filename, size) VALUES (?, ?, ?)")
                .bind(db_download.id)
                .bind(filename)
                .bind(*size as i64)
                .execute(&mut *conn)
                .await
                .map_err(RepositoryError::from_sqlx_error)?;
        }

        let file_rows = Self::fetch_files(&mut *conn, db_download.id).await?;
        Ok(assemble(db_download, file_rows)?)
    }

    async fn fetch_files<'e, E>(executor: E, download_id: i64) -> Result<Vec<DbDownloadFile>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, DbDownloadFile>(
            "SELECT id, download_id, filename, size, status, bytes_read, verified_on_disk \
             FROM download_files WHERE download_id = ? ORDER BY filename",
        )
        .bind(download_id)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)
    }

    pub async fn by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<Download>, RepositoryError> {
        let row = sqlx::query_as::<_, DbDownload>(
            "SELECT id, release_group_id, release_id, artist, album, year, username, \
             remote_directory, status, imported_paths, created_at, updated_at \
             FROM downloads WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        match row {
            Some(db_download) => {
                let files = Self::fetch_files(&mut *conn, db_download.id).await?;
                Ok(Some(assemble(db_download, files)?))
            }
            None => Ok(None),
        }
    }

    pub async fn all(&self, conn: &mut SqliteConnection) -> Result<Vec<Download>, RepositoryError> {
        self.by_status_not(conn, None).await
    }

    /// Loads every download whose status is not `completed` (spec §4.5
    /// reconciliation pass step 2), or every download when `exclude` is
    /// `None`.
    pub async fn by_status_not(
        &self,
        conn: &mut SqliteConnection,
        exclude: Option<TransferStatus>,
    ) -> Result<Vec<Download>, RepositoryError> {
        let rows = match exclude {
            Some(status) => {
                sqlx::query_as::<_, DbDownload>(
                    "SELECT id, release_group_id, release_id, artist, album, year, username, \
                     remote_directory, status, imported_paths, created_at, updated_at \
                     FROM downloads WHERE status != ? ORDER BY id",
                )
                .bind(status.as_str())
                .fetch_all(&mut *conn)
                .await
            }
            None => {
                sqlx::query_as::<_, DbDownload>(
                    "SELECT id, release_group_id, release_id, artist, album, year, username, \
                     remote_directory, status, imported_paths, created_at, updated_at \
                     FROM downloads ORDER BY id",
                )
                .fetch_all(&mut *conn)
                .await
            }
        }
        .map_err(RepositoryError::from_sqlx_error)?;

        let mut downloads = Vec::with_capacity(rows.len());
        for db_download in rows {
            let files = Self::fetch_files(&mut *conn, db_download.id).await?;
            downloads.push(assemble(db_download, files)?);
        }

        Ok(downloads)
    }

    pub async fn update_file<'e, E>(
        &self,
        executor: E,
        file_id: i64,
        status: TransferStatus,
        bytes_read: u64,
        verified_on_disk: bool,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE download_files SET status = ?, bytes_read = ?, verified_on_disk = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(bytes_read as i64)
        .bind(verified_on_disk)
        .bind(file_id)
        .execute(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn update_status<'e, E>(
        &self,
        executor: E,
        download_id: i64,
        status: TransferStatus,
        updated_at: NaiveDateTime,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE downloads SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(updated_at.and_utc().timestamp())
            .bind(download_id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn push_imported_path<'e, E>(
        &self,
        executor: E,
        download_id: i64,
        imported_paths: &[String],
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let json = serde_json::to_string(imported_paths).expect("Vec<String> is always serializable");

        sqlx::query("UPDATE downloads SET imported_paths = ? WHERE id = ?")
            .bind(json)
            .bind(download_id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn delete<'e, E>(&self, executor: E, id: i64) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}
