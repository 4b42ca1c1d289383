use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use sqlx::{Executor, FromRow, Sqlite};

use crate::domain::track::{Track, TrackDraft};
use crate::domain::ValidationError;
use crate::utils::normalizations::normalize_path;
use super::RepositoryError;

#[derive(FromRow)]
struct DbTrack {
    id: i64,
    path: String,
    mtime: i64,
    artist: String,
    album_artist: String,
    album: String,
    title: String,
    disc_number: Option<i64>,
    track_number: Option<i64>,
    year: Option<i64>,
    genre: Option<String>,
    original_date: Option<String>,
    release_date: Option<String>,
    label: Option<String>,
    added_at: i64,
    updated_at: i64,
}

impl TryFrom<DbTrack> for Track {
    type Error = TrackConversionError;

    fn try_from(db: DbTrack) -> Result<Self, Self::Error> {
        Ok(Track::new(
            db.id,
            PathBuf::from(db.path),
            db.mtime,
            db.artist,
            Some(db.album_artist),
            db.album,
            db.title,
            db.disc_number,
            db.track_number,
            db.year,
            db.genre,
            db.original_date,
            db.release_date,
            db.label,
            seconds_to_naive(db.added_at),
            seconds_to_naive(db.updated_at),
        )?)
    }
}

fn seconds_to_naive(seconds: i64) -> NaiveDateTime {
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc()).unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum TrackConversionError {
    #[error("Error during validation of track fields: {0}")]
    ValidationError(#[from] ValidationError),
}

const TRACK_COLUMNS: &str = "id, path, mtime, artist, album_artist, album, title, disc_number, \
    track_number, year, genre, original_date, release_date, label, added_at, updated_at";

/// A bare `(album_artist, album)` pair, the identity of a derived Album view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlbumKey {
    pub album_artist: String,
    pub album: String,
}

pub struct AlbumRow {
    pub album_artist: String,
    pub album: String,
    pub year: Option<i64>,
}

pub struct SqliteTracksRepository;

impl SqliteTracksRepository {
    pub fn new() -> Self {
        Self
    }

    /// Inserts a new track. `added_at = mtime` of first sight, per spec §3/§9.
    pub async fn insert<'e, E>(
        &self,
        executor: E,
        draft: &TrackDraft,
        now: NaiveDateTime,
    ) -> Result<Track, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let path_str = normalize_path(&draft.path).to_string_lossy().to_string();
        let album_artist = draft.album_artist_or_default().to_string();
        let added_at = draft.mtime;

        let db_track = sqlx::query_as::<_, DbTrack>(&format!(
            "INSERT INTO library_tracks(path, mtime, artist, album_artist, album, title, \
             disc_number, track_number, year, genre, original_date, release_date, label, \
             added_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {TRACK_COLUMNS}"
        ))
        .bind(&path_str)
        .bind(draft.mtime)
        .bind(&draft.artist)
        .bind(&album_artist)
        .bind(&draft.album)
        .bind(&draft.title)
        .bind(draft.disc_number)
        .bind(draft.track_number)
        .bind(draft.year)
        .bind(&draft.genre)
        .bind(&draft.original_date)
        .bind(&draft.release_date)
        .bind(&draft.label)
        .bind(added_at)
        .bind(now.and_utc().timestamp())
        .fetch_one(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(db_track.try_into()?)
    }

    /// Updates an existing track's tags in place. `added_at` is never part
    /// of this statement, preserving the spec §9 resolution that a rescan
    /// never overwrites it; `updated_at` always moves.
    pub async fn update<'e, E>(
        &self,
        executor: E,
        id: i64,
        draft: &TrackDraft,
        now: NaiveDateTime,
    ) -> Result<Track, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let album_artist = draft.album_artist_or_default().to_string();

        let db_track = sqlx::query_as::<_, DbTrack>(&format!(
            "UPDATE library_tracks SET mtime = ?, artist = ?, album_artist = ?, album = ?, \
             title = ?, disc_number = ?, track_number = ?, year = ?, genre = ?, \
             original_date = ?, release_date = ?, label = ?, updated_at = ? \
             WHERE id = ? RETURNING {TRACK_COLUMNS}"
        ))
        .bind(draft.mtime)
        .bind(&draft.artist)
        .bind(&album_artist)
        .bind(&draft.album)
        .bind(&draft.title)
        .bind(draft.disc_number)
        .bind(draft.track_number)
        .bind(draft.year)
        .bind(&draft.genre)
        .bind(&draft.original_date)
        .bind(&draft.release_date)
        .bind(&draft.label)
        .bind(now.and_utc().timestamp())
        .bind(id)
        .fetch_one(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(db_track.try_into()?)
    }

    pub async fn by_path<'e, E>(&self, executor: E, path: &Path) -> Result<Option<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let path_str = normalize_path(path).to_string_lossy().to_string();

        let row = sqlx::query_as::<_, DbTrack>(&format!("SELECT {TRACK_COLUMNS} FROM library_tracks WHERE path = ?"))
            .bind(&path_str)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        row.map(TryInto::try_into).transpose().map_err(Into::into)
    }

    pub async fn by_id<'e, E>(&self, executor: E, id: i64) -> Result<Option<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, DbTrack>(&format!("SELECT {TRACK_COLUMNS} FROM library_tracks WHERE id = ?"))
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        row.map(TryInto::try_into).transpose().map_err(Into::into)
    }

    pub async fn delete_by_id<'e, E>(&self, executor: E, id: i64) -> Result<Option<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, DbTrack>(&format!("DELETE FROM library_tracks WHERE id = ? RETURNING {TRACK_COLUMNS}"))
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        row.map(TryInto::try_into).transpose().map_err(Into::into)
    }

    /// Every track whose path starts with `prefix`. Used by the scanner's
    /// deletion set and by `RemoveSource`; callers must run FTS cleanup
    /// against this result *before* issuing `delete_by_path_prefix`, since
    /// the FTS payload columns are unindexed (spec §4.3).
    pub async fn by_path_prefix<'e, E>(&self, executor: E, prefix: &Path) -> Result<Vec<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let prefix_str = path_prefix_pattern(prefix);

        let rows = sqlx::query_as::<_, DbTrack>(&format!(
            "SELECT {TRACK_COLUMNS} FROM library_tracks WHERE path LIKE ? ESCAPE '\\'"
        ))
        .bind(&prefix_str)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(|r| Ok(r.try_into()?)).collect()
    }

    pub async fn delete_by_path_prefix<'e, E>(&self, executor: E, prefix: &Path) -> Result<u64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let prefix_str = path_prefix_pattern(prefix);

        let result = sqlx::query("DELETE FROM library_tracks WHERE path LIKE ? ESCAPE '\\'")
            .bind(&prefix_str)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(result.rows_affected())
    }

    /// `path -> mtime` map restricted to the given source prefixes, the
    /// input to the scanner's Diff phase (spec §4.2).
    pub async fn mtimes_under_sources<'e, E>(
        &self,
        executor: E,
        sources: &[PathBuf],
    ) -> Result<HashMap<PathBuf, i64>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, (String, i64)>("SELECT path, mtime FROM library_tracks")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        let map = rows
            .into_iter()
            .map(|(path, mtime)| (PathBuf::from(path), mtime))
            .filter(|(path, _)| sources.iter().any(|s| path.starts_with(s)))
            .collect();

        Ok(map)
    }

    pub async fn count<'e, E>(&self, executor: E) -> Result<i64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT COUNT(*) FROM library_tracks")
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    pub async fn count_for_source<'e, E>(&self, executor: E, source: &Path) -> Result<i64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let prefix_str = path_prefix_pattern(source);

        sqlx::query_scalar("SELECT COUNT(*) FROM library_tracks WHERE path LIKE ? ESCAPE '\\'")
            .bind(&prefix_str)
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    pub async fn distinct_artists<'e, E>(&self, executor: E) -> Result<Vec<String>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT DISTINCT album_artist FROM library_tracks ORDER BY album_artist COLLATE NOCASE")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    pub async fn count_artists<'e, E>(&self, executor: E) -> Result<i64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT COUNT(DISTINCT album_artist) FROM library_tracks")
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    pub async fn count_albums<'e, E>(&self, executor: E) -> Result<i64, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT COUNT(DISTINCT album_artist || '\u{1f}' || album) FROM library_tracks")
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    pub async fn albums_for_artist<'e, E>(&self, executor: E, album_artist: &str) -> Result<Vec<AlbumRow>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows: Vec<(String, String, Option<i64>)> = sqlx::query_as(
            "SELECT album_artist, album, MAX(year) FROM library_tracks \
             WHERE album_artist = ? GROUP BY album_artist, album ORDER BY album COLLATE NOCASE",
        )
        .bind(album_artist)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(album_artist, album, year)| AlbumRow { album_artist, album, year })
            .collect())
    }

    pub async fn all_albums<'e, E>(&self, executor: E) -> Result<Vec<AlbumRow>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows: Vec<(String, String, Option<i64>)> = sqlx::query_as(
            "SELECT album_artist, album, MAX(year) FROM library_tracks \
             GROUP BY album_artist, album ORDER BY album_artist COLLATE NOCASE, album COLLATE NOCASE",
        )
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(album_artist, album, year)| AlbumRow { album_artist, album, year })
            .collect())
    }

    pub async fn album_has_multiple_discs<'e, E>(
        &self,
        executor: E,
        album_artist: &str,
        album: &str,
    ) -> Result<bool, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT COALESCE(disc_number, 1)) FROM library_tracks \
             WHERE album_artist = ? AND album = ?",
        )
        .bind(album_artist)
        .bind(album)
        .fetch_one(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        Ok(count > 1)
    }

    pub async fn tracks_for_album<'e, E>(
        &self,
        executor: E,
        album_artist: &str,
        album: &str,
    ) -> Result<Vec<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbTrack>(&format!(
            "SELECT {TRACK_COLUMNS} FROM library_tracks WHERE album_artist = ? AND album = ? \
             ORDER BY disc_number, track_number"
        ))
        .bind(album_artist)
        .bind(album)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(|r| Ok(r.try_into()?)).collect()
    }

    pub async fn tracks_for_artist<'e, E>(&self, executor: E, album_artist: &str) -> Result<Vec<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbTrack>(&format!(
            "SELECT {TRACK_COLUMNS} FROM library_tracks WHERE album_artist = ? \
             ORDER BY album COLLATE NOCASE, disc_number, track_number"
        ))
        .bind(album_artist)
        .fetch_all(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(|r| Ok(r.try_into()?)).collect()
    }

    pub async fn track_ids_for_album<'e, E>(
        &self,
        executor: E,
        album_artist: &str,
        album: &str,
    ) -> Result<Vec<i64>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT id FROM library_tracks WHERE album_artist = ? AND album = ?")
            .bind(album_artist)
            .bind(album)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    pub async fn track_ids_for_artist<'e, E>(&self, executor: E, album_artist: &str) -> Result<Vec<i64>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar("SELECT id FROM library_tracks WHERE album_artist = ?")
            .bind(album_artist)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)
    }

    pub async fn all<'e, E>(&self, executor: E) -> Result<Vec<Track>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, DbTrack>(&format!("SELECT {TRACK_COLUMNS} FROM library_tracks"))
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(|r| Ok(r.try_into()?)).collect()
    }
}

/// Escapes `%`/`_`/`\` for a `LIKE ... ESCAPE '\'` prefix match.
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Builds a `LIKE`-ready prefix pattern scoped to a path *boundary*: a bare
/// string prefix would let `/music` match `/music-backup/x.flac`, which
/// would violate "a source never nests another source" (spec §3) the
/// moment two sources share a common textual prefix. Appending a trailing
/// separator before the wildcard (unless the caller's path already ends in
/// one) forces the match to land on a real path component boundary.
fn path_prefix_pattern(prefix: &Path) -> String {
    let normalized = normalize_path(prefix).to_string_lossy().to_string();
    let with_separator = if normalized.ends_with('/') { normalized } else { format!("{normalized}/") };
    format!("{}%", like_escape(&with_separator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_helpers::prepare_in_memory_db;

    fn draft(path: &str, artist: &str, album: &str) -> TrackDraft {
        TrackDraft {
            path: PathBuf::from(path),
            mtime: 1000,
            artist: artist.to_string(),
            album_artist: None,
            album: album.to_string(),
            title: "Title".to_string(),
            disc_number: None,
            track_number: Some(1),
            year: Some(1999),
            genre: None,
            original_date: None,
            release_date: None,
            label: None,
        }
    }

    #[tokio::test]
    async fn insert_then_by_path_round_trips() {
        let pool = prepare_in_memory_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();

        let d = draft("/m/a/01.flac", "The Beatles", "Abbey Road");
        let inserted = repo.insert(&pool, &d, now).await.unwrap();

        let found = repo.by_path(&pool, Path::new("/m/a/01.flac")).await.unwrap().unwrap();
        assert_eq!(found.id(), inserted.id());
        assert_eq!(found.added_at().and_utc().timestamp(), 1000);
    }

    #[tokio::test]
    async fn update_preserves_added_at_but_bumps_updated_at() {
        let pool = prepare_in_memory_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let t0 = chrono::Local::now().naive_local();

        let d = draft("/m/a/01.flac", "The Beatles", "Abbey Road");
        let inserted = repo.insert(&pool, &d, t0).await.unwrap();

        let mut d2 = d.clone();
        d2.title = "Retitled".to_string();
        let t1 = t0 + chrono::Duration::seconds(10);
        let updated = repo.update(&pool, inserted.id(), &d2, t1).await.unwrap();

        assert_eq!(updated.added_at(), inserted.added_at());
        assert_eq!(updated.title(), "Retitled");
        assert!(updated.updated_at() >= t1 - chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn by_path_prefix_is_scoped_to_source() {
        let pool = prepare_in_memory_db().await.unwrap();
        let repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();

        repo.insert(&pool, &draft("/m/a/01.flac", "A", "Alb"), now).await.unwrap();
        repo.insert(&pool, &draft("/n/b/01.flac", "B", "Alb2"), now).await.unwrap();

        let under_m = repo.by_path_prefix(&pool, Path::new("/m")).await.unwrap();
        assert_eq!(under_m.len(), 1);
        assert_eq!(under_m[0].path(), &PathBuf::from("/m/a/01.flac"));
    }
}
