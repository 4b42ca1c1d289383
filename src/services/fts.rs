use std::path::Path;

use sqlx::SqliteConnection;

use crate::domain::track::Track;
use crate::repository::{RepositoryError, SqliteTracksRepository};

/// Errors raised while maintaining or querying the trigram-tokenised search
/// projection (spec §4.3). All write functions here take a concrete
/// `&mut SqliteConnection` rather than a generic executor because every one
/// of them issues more than one statement and needs to reborrow between
/// them — see the note on `SqliteDownloadsRepository::create`.
#[derive(Debug, thiserror::Error)]
pub enum FtsError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// One row of the search projection, as rendered for a hit (spec §3 "FTS row", §6.5).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FtsRow {
    pub result_type: String,
    pub artist: String,
    pub album: String,
    pub track_id: Option<i64>,
    pub year: Option<i64>,
    pub track_title: Option<String>,
    pub track_artist: Option<String>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    pub path: Option<String>,
}

const SELECT_COLUMNS: &str = "result_type, artist, album, track_id, year, track_title, \
    track_artist, track_number, disc_number, path";

/// Truncates and rebuilds the whole projection from `library_tracks` in one
/// pass: one artist row per distinct album-artist, one album row per
/// distinct `(album_artist, album)` with the max year across its tracks,
/// one track row per track.
pub async fn rebuild(conn: &mut SqliteConnection) -> Result<(), FtsError> {
    sqlx::query("DELETE FROM library_search_fts").execute(&mut *conn).await?;

    sqlx::query(
        "INSERT INTO library_search_fts (search_text, result_type, artist, album, track_id, \
         year, track_title, track_artist, track_number, disc_number, path) \
         SELECT DISTINCT album_artist, 'artist', album_artist, '', NULL, NULL, NULL, NULL, \
         NULL, NULL, NULL FROM library_tracks",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO library_search_fts (search_text, result_type, artist, album, track_id, \
         year, track_title, track_artist, track_number, disc_number, path) \
         SELECT album_artist || ' ' || album, 'album', album_artist, album, NULL, MAX(year), \
         NULL, NULL, NULL, NULL, NULL FROM library_tracks GROUP BY album_artist, album",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO library_search_fts (search_text, result_type, artist, album, track_id, \
         year, track_title, track_artist, track_number, disc_number, path) \
         SELECT \
           CASE WHEN artist != album_artist \
             THEN album_artist || ' ' || album || ' ' || title || ' ' || artist \
             ELSE album_artist || ' ' || album || ' ' || title END, \
           'track', album_artist, album, id, year, title, artist, track_number, disc_number, path \
         FROM library_tracks",
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Rebuilds only if the projection is empty; intended for startup.
pub async fn ensure(conn: &mut SqliteConnection) -> Result<(), FtsError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM library_search_fts")
        .fetch_one(&mut *conn)
        .await?;

    if count == 0 {
        rebuild(conn).await?;
    }

    Ok(())
}

fn track_search_text(track: &Track) -> String {
    if track.artist() != track.album_artist() {
        format!("{} {} {} {}", track.album_artist(), track.album(), track.title(), track.artist())
    } else {
        format!("{} {} {}", track.album_artist(), track.album(), track.title())
    }
}

/// Inserts the track row; inserts the artist/album rows only if they don't
/// already exist for this track's `(album_artist, album)`.
pub async fn add_track(conn: &mut SqliteConnection, track: &Track) -> Result<(), FtsError> {
    sqlx::query(
        "INSERT INTO library_search_fts (search_text, result_type, artist, album, track_id, \
         year, track_title, track_artist, track_number, disc_number, path) \
         VALUES (?, 'track', ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(track_search_text(track))
    .bind(track.album_artist())
    .bind(track.album())
    .bind(track.id())
    .bind(track.year())
    .bind(track.title())
    .bind(track.artist())
    .bind(track.track_number())
    .bind(track.disc_number())
    .bind(track.path().to_string_lossy().to_string())
    .execute(&mut *conn)
    .await?;

    let artist_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM library_search_fts WHERE result_type = 'artist' AND artist = ?",
    )
    .bind(track.album_artist())
    .fetch_one(&mut *conn)
    .await?;

    if artist_exists == 0 {
        sqlx::query(
            "INSERT INTO library_search_fts (search_text, result_type, artist, album, track_id, \
             year, track_title, track_artist, track_number, disc_number, path) \
             VALUES (?, 'artist', ?, '', NULL, NULL, NULL, NULL, NULL, NULL, NULL)",
        )
        .bind(track.album_artist())
        .bind(track.album_artist())
        .execute(&mut *conn)
        .await?;
    }

    let album_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM library_search_fts WHERE result_type = 'album' AND artist = ? AND album = ?",
    )
    .bind(track.album_artist())
    .bind(track.album())
    .fetch_one(&mut *conn)
    .await?;

    if album_exists == 0 {
        sqlx::query(
            "INSERT INTO library_search_fts (search_text, result_type, artist, album, track_id, \
             year, track_title, track_artist, track_number, disc_number, path) \
             VALUES (?, 'album', ?, ?, NULL, ?, NULL, NULL, NULL, NULL, NULL)",
        )
        .bind(format!("{} {}", track.album_artist(), track.album()))
        .bind(track.album_artist())
        .bind(track.album())
        .bind(track.year())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Deletes the old track row, inserts the new one (and any artist/album
/// rows it requires), then drops the old artist/album rows if nothing in
/// `library_tracks` still references them. Callers must update
/// `library_tracks` to `new` *before* calling this, since the orphan check
/// queries that table.
pub async fn update_track(conn: &mut SqliteConnection, old: &Track, new: &Track) -> Result<(), FtsError> {
    sqlx::query("DELETE FROM library_search_fts WHERE result_type = 'track' AND track_id = ?")
        .bind(old.id())
        .execute(&mut *conn)
        .await?;

    add_track(conn, new).await?;

    if old.album_artist() != new.album_artist() {
        drop_orphaned_artist(conn, old.album_artist()).await?;
    }

    if old.album_artist() != new.album_artist() || old.album() != new.album() {
        drop_orphaned_album(conn, old.album_artist(), old.album()).await?;
    }

    Ok(())
}

/// Deletes the track row, then drops the album/artist rows if nothing in
/// `library_tracks` references them any more. Callers must delete the
/// `library_tracks` row for `track` before calling this.
pub async fn remove_track(conn: &mut SqliteConnection, track: &Track) -> Result<(), FtsError> {
    sqlx::query("DELETE FROM library_search_fts WHERE result_type = 'track' AND track_id = ?")
        .bind(track.id())
        .execute(&mut *conn)
        .await?;

    drop_orphaned_album(conn, track.album_artist(), track.album()).await?;
    drop_orphaned_artist(conn, track.album_artist()).await?;

    Ok(())
}

async fn drop_orphaned_album(conn: &mut SqliteConnection, album_artist: &str, album: &str) -> Result<(), FtsError> {
    let remaining: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM library_tracks WHERE album_artist = ? AND album = ?",
    )
    .bind(album_artist)
    .bind(album)
    .fetch_one(&mut *conn)
    .await?;

    if remaining == 0 {
        sqlx::query("DELETE FROM library_search_fts WHERE result_type = 'album' AND artist = ? AND album = ?")
            .bind(album_artist)
            .bind(album)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

async fn drop_orphaned_artist(conn: &mut SqliteConnection, album_artist: &str) -> Result<(), FtsError> {
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM library_tracks WHERE album_artist = ?")
        .bind(album_artist)
        .fetch_one(&mut *conn)
        .await?;

    if remaining == 0 {
        sqlx::query("DELETE FROM library_search_fts WHERE result_type = 'artist' AND artist = ?")
            .bind(album_artist)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Deletes every track row under `prefix`, then drops orphaned albums and
/// artists. The affected `(album_artist, album)` keys are gathered *before*
/// the `library_tracks` rows are deleted, because `path` on the FTS side is
/// unindexed and cannot be range-queried — the scoped lookup has to go
/// through `library_tracks`, which carries a real index on `path`.
pub async fn remove_by_prefix(
    conn: &mut SqliteConnection,
    tracks_repo: &SqliteTracksRepository,
    prefix: &Path,
) -> Result<Vec<Track>, FtsError> {
    let doomed = tracks_repo.by_path_prefix(&mut *conn, prefix).await?;

    for track in &doomed {
        sqlx::query("DELETE FROM library_search_fts WHERE result_type = 'track' AND track_id = ?")
            .bind(track.id())
            .execute(&mut *conn)
            .await?;
    }

    let mut album_keys: Vec<(String, String)> = doomed
        .iter()
        .map(|t| (t.album_artist().to_string(), t.album().to_string()))
        .collect();
    album_keys.sort();
    album_keys.dedup();

    let mut artist_keys: Vec<String> = doomed.iter().map(|t| t.album_artist().to_string()).collect();
    artist_keys.sort();
    artist_keys.dedup();

    tracks_repo.delete_by_path_prefix(&mut *conn, prefix).await?;

    for (album_artist, album) in &album_keys {
        drop_orphaned_album(conn, album_artist, album).await?;
    }
    for album_artist in &artist_keys {
        drop_orphaned_artist(conn, album_artist).await?;
    }

    Ok(doomed)
}

fn quote_token(token: &str) -> String {
    format!("\"{}\"", token.replace('"', "\"\""))
}

/// Builds an implicit-AND MATCH expression from whitespace-separated tokens,
/// escaping any embedded `"` by doubling it so the query stays well-formed
/// no matter what the user typed (spec §4.3, §8 boundary behaviour).
fn build_match_query(query: &str) -> String {
    query.split_whitespace().map(quote_token).collect::<Vec<_>>().join(" ")
}

/// Full search across all row kinds. Blank query returns everything ordered
/// by `(result_type, artist, album, track_number)` case-insensitively;
/// otherwise a `MATCH` query ordered by the backend's relevance rank.
pub async fn search(conn: &mut SqliteConnection, query: &str) -> Result<Vec<FtsRow>, FtsError> {
    if query.trim().is_empty() {
        let rows = sqlx::query_as::<_, FtsRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM library_search_fts \
             ORDER BY result_type, artist COLLATE NOCASE, album COLLATE NOCASE, track_number"
        ))
        .fetch_all(&mut *conn)
        .await?;

        return Ok(rows);
    }

    let match_query = build_match_query(query);

    let rows = sqlx::query_as::<_, FtsRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM library_search_fts WHERE library_search_fts MATCH ? ORDER BY rank"
    ))
    .bind(match_query)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

/// Same as `search`, restricted to `result_type = 'album'`; the blank-query
/// ordering is `(artist, album)` case-insensitive.
pub async fn search_albums(conn: &mut SqliteConnection, query: &str) -> Result<Vec<FtsRow>, FtsError> {
    if query.trim().is_empty() {
        let rows = sqlx::query_as::<_, FtsRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM library_search_fts WHERE result_type = 'album' \
             ORDER BY artist COLLATE NOCASE, album COLLATE NOCASE"
        ))
        .fetch_all(&mut *conn)
        .await?;

        return Ok(rows);
    }

    // `artist`/`album` are UNINDEXED (spec §6.5) so an FTS5 column filter
    // can't target them; the match runs against `search_text` exactly like
    // a plain `search`, with `result_type` narrowing the row kind afterward.
    let match_query = build_match_query(query);

    let rows = sqlx::query_as::<_, FtsRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM library_search_fts \
         WHERE result_type = 'album' AND library_search_fts MATCH ? ORDER BY rank"
    ))
    .bind(match_query)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::track::TrackDraft;
    use crate::services::test_helpers::prepare_in_memory_db;

    fn draft(path: &str, artist: &str, album_artist: &str, album: &str, title: &str) -> TrackDraft {
        TrackDraft {
            path: std::path::PathBuf::from(path),
            mtime: 1,
            artist: artist.to_string(),
            album_artist: Some(album_artist.to_string()),
            album: album.to_string(),
            title: title.to_string(),
            disc_number: None,
            track_number: Some(1),
            year: Some(1969),
            genre: None,
            original_date: None,
            release_date: None,
            label: None,
        }
    }

    #[tokio::test]
    async fn add_track_inserts_exactly_one_row_per_kind() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();
        let d = draft("/m/a.flac", "The Beatles", "The Beatles", "Abbey Road", "Come Together");
        let track = tracks_repo.insert(&mut *conn, &d, now).await.unwrap();
        add_track(&mut conn, &track).await.unwrap();

        let rows = search(&mut conn, "").await.unwrap();
        assert_eq!(rows.iter().filter(|r| r.result_type == "artist").count(), 1);
        assert_eq!(rows.iter().filter(|r| r.result_type == "album").count(), 1);
        assert_eq!(rows.iter().filter(|r| r.result_type == "track").count(), 1);
    }

    #[tokio::test]
    async fn add_track_does_not_duplicate_shared_artist_or_album_rows() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();

        let d1 = draft("/m/a.flac", "The Beatles", "The Beatles", "Abbey Road", "Come Together");
        let t1 = tracks_repo.insert(&mut *conn, &d1, now).await.unwrap();
        add_track(&mut conn, &t1).await.unwrap();

        let d2 = draft("/m/b.flac", "The Beatles", "The Beatles", "Abbey Road", "Something");
        let t2 = tracks_repo.insert(&mut *conn, &d2, now).await.unwrap();
        add_track(&mut conn, &t2).await.unwrap();

        let rows = search(&mut conn, "").await.unwrap();
        assert_eq!(rows.iter().filter(|r| r.result_type == "artist").count(), 1);
        assert_eq!(rows.iter().filter(|r| r.result_type == "album").count(), 1);
        assert_eq!(rows.iter().filter(|r| r.result_type == "track").count(), 2);
    }

    #[tokio::test]
    async fn remove_track_drops_orphaned_album_and_artist_in_the_same_pass() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();

        let d = draft("/m/a.flac", "The Beatles", "The Beatles", "Abbey Road", "Come Together");
        let track = tracks_repo.insert(&mut *conn, &d, now).await.unwrap();
        add_track(&mut conn, &track).await.unwrap();

        tracks_repo.delete_by_id(&mut *conn, track.id()).await.unwrap();
        remove_track(&mut conn, &track).await.unwrap();

        let rows = search(&mut conn, "").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn remove_track_keeps_artist_row_while_sibling_album_track_remains() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();

        let d1 = draft("/m/a.flac", "The Beatles", "The Beatles", "Abbey Road", "Come Together");
        let t1 = tracks_repo.insert(&mut *conn, &d1, now).await.unwrap();
        add_track(&mut conn, &t1).await.unwrap();

        let d2 = draft("/m/b.flac", "The Beatles", "The Beatles", "Let It Be", "Two of Us");
        let t2 = tracks_repo.insert(&mut *conn, &d2, now).await.unwrap();
        add_track(&mut conn, &t2).await.unwrap();

        tracks_repo.delete_by_id(&mut *conn, t1.id()).await.unwrap();
        remove_track(&mut conn, &t1).await.unwrap();

        let rows = search(&mut conn, "").await.unwrap();
        assert_eq!(rows.iter().filter(|r| r.result_type == "artist").count(), 1);
        assert_eq!(rows.iter().filter(|r| r.result_type == "album").count(), 1);
        assert!(rows.iter().any(|r| r.album == "Let It Be"));
    }

    #[tokio::test]
    async fn update_track_moving_albums_drops_the_old_album_row_only_when_orphaned() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();

        let d = draft("/m/a.flac", "The Beatles", "The Beatles", "Abbey Road", "Come Together");
        let old = tracks_repo.insert(&mut *conn, &d, now).await.unwrap();
        add_track(&mut conn, &old).await.unwrap();

        let mut new_draft = d.clone();
        new_draft.album = "Let It Be".to_string();
        let new = tracks_repo.update(&mut *conn, old.id(), &new_draft, now).await.unwrap();
        update_track(&mut conn, &old, &new).await.unwrap();

        let rows = search(&mut conn, "").await.unwrap();
        assert_eq!(rows.iter().filter(|r| r.result_type == "album").count(), 1);
        assert!(rows.iter().any(|r| r.album == "Let It Be"));
        assert!(!rows.iter().any(|r| r.album == "Abbey Road"));
    }

    #[tokio::test]
    async fn remove_by_prefix_only_touches_tracks_under_that_prefix() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();

        let inside = draft("/m/inside/a.flac", "Artist A", "Artist A", "Album A", "Track A");
        let t_inside = tracks_repo.insert(&mut *conn, &inside, now).await.unwrap();
        add_track(&mut conn, &t_inside).await.unwrap();

        let outside = draft("/m/inside-other/b.flac", "Artist B", "Artist B", "Album B", "Track B");
        let t_outside = tracks_repo.insert(&mut *conn, &outside, now).await.unwrap();
        add_track(&mut conn, &t_outside).await.unwrap();

        let doomed = remove_by_prefix(&mut conn, &tracks_repo, Path::new("/m/inside")).await.unwrap();
        assert_eq!(doomed.len(), 1);
        assert_eq!(doomed[0].id(), t_inside.id());

        let rows = search(&mut conn, "").await.unwrap();
        assert!(rows.iter().any(|r| r.artist == "Artist B"));
        assert!(!rows.iter().any(|r| r.artist == "Artist A"));
    }

    #[tokio::test]
    async fn ensure_only_rebuilds_when_empty() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();

        let d = draft("/m/a.flac", "The Beatles", "The Beatles", "Abbey Road", "Come Together");
        let track = tracks_repo.insert(&mut *conn, &d, now).await.unwrap();

        ensure(&mut conn).await.unwrap();
        let rows = search(&mut conn, "").await.unwrap();
        assert_eq!(rows.iter().filter(|r| r.result_type == "track").count(), 1);

        tracks_repo.delete_by_id(&mut *conn, track.id()).await.unwrap();
        ensure(&mut conn).await.unwrap();
        let rows = search(&mut conn, "").await.unwrap();
        assert_eq!(rows.iter().filter(|r| r.result_type == "track").count(), 1);
    }

    #[tokio::test]
    async fn search_with_embedded_quote_never_produces_an_invalid_query() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();

        let d = draft("/m/a.flac", "The Beatles", "The Beatles", "Abbey Road", "Come Together");
        let track = tracks_repo.insert(&mut *conn, &d, now).await.unwrap();
        add_track(&mut conn, &track).await.unwrap();

        // The point of this test is that an embedded `"` doesn't make `search`
        // return an FTS5 syntax error; the doubled-quote escaping in
        // `quote_token` is what keeps the MATCH expression well-formed.
        search(&mut conn, "beatle's \"road\"").await.unwrap();
        search(&mut conn, "\"").await.unwrap();
    }

    #[tokio::test]
    async fn search_albums_restricts_to_album_rows_and_orders_case_insensitively() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();

        let d1 = draft("/m/a.flac", "zztop", "zztop", "zeta album", "song one");
        let t1 = tracks_repo.insert(&mut *conn, &d1, now).await.unwrap();
        add_track(&mut conn, &t1).await.unwrap();

        let d2 = draft("/m/b.flac", "abba", "abba", "alpha album", "song two");
        let t2 = tracks_repo.insert(&mut *conn, &d2, now).await.unwrap();
        add_track(&mut conn, &t2).await.unwrap();

        let rows = search_albums(&mut conn, "").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.result_type == "album"));
        assert_eq!(rows[0].artist, "abba");
        assert_eq!(rows[1].artist, "zztop");
    }

    #[tokio::test]
    async fn rebuild_is_idempotent_and_yields_stable_row_counts() {
        let pool = prepare_in_memory_db().await.unwrap();
        let tracks_repo = SqliteTracksRepository::new();
        let now = chrono::Local::now().naive_local();
        let mut conn = pool.acquire().await.unwrap();

        let d1 = draft("/m/a.flac", "The Beatles", "The Beatles", "Abbey Road", "Come Together");
        tracks_repo.insert(&mut *conn, &d1, now).await.unwrap();
        let d2 = draft("/m/b.flac", "The Beatles", "The Beatles", "Abbey Road", "Something");
        tracks_repo.insert(&mut *conn, &d2, now).await.unwrap();

        rebuild(&mut conn).await.unwrap();
        let first = search(&mut conn, "").await.unwrap().len();

        rebuild(&mut conn).await.unwrap();
        let second = search(&mut conn, "").await.unwrap().len();

        assert_eq!(first, second);
        assert_eq!(first, 4); // 1 artist + 1 album + 2 tracks
    }
}
