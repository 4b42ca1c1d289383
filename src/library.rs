use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::download::Download;
use crate::domain::search_item::SearchItem;
use crate::domain::source::Source;
use crate::domain::release::ReleaseMetadata;
use crate::domain::track::Track;
use crate::domain::{BatchSaveReport, LibraryNode, SourceStats};
use crate::repository::tracks_repo::AlbumRow;
use crate::repository::{RepositoryError, SqliteSourcesRepository, SqliteTracksRepository};
use crate::services::fts::{self, FtsError, FtsRow};
use crate::services::import::{self, ImportError, ImportPlanItem, ImportedFile};
use crate::services::matcher::{MatcherCache, TrigramMatcher};
use crate::services::reconciler::{self, ReconcilerError, TransferEvent};
use crate::services::scanner::{self, ScanError, ScanProgress};
use crate::utils::config::TransferConfig;
use crate::utils::db::Store;

/// Every failure the §6.1 surface can produce, wrapped with the operation
/// and subject that caused it so the caller (UI, CLI) can render the
/// rename-independent envelope from spec §7: `"Failed to <operation>
/// ['<subject>']: <detail>"`.
#[derive(Debug, thiserror::Error)]
#[error("Failed to {operation} ['{subject}']: {source}")]
pub struct LibraryError {
    operation: &'static str,
    subject: String,
    #[source]
    source: LibraryErrorKind,
}

impl LibraryError {
    fn new(operation: &'static str, subject: impl Into<String>, source: impl Into<LibraryErrorKind>) -> Self {
        Self { operation, subject: subject.into(), source: source.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryErrorKind {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Fts(#[from] FtsError),
    #[error(transparent)]
    Reconcile(#[from] ReconcilerError),
    #[error(transparent)]
    Import(#[from] ImportError),
}

type LibraryResult<T> = Result<T, LibraryError>;

/// Collapses an `FtsError` into the `RepositoryError` a surrounding
/// `Store::transaction` closure is already threading, the same collapse
/// `scanner::process` performs inline at each FTS call site.
fn to_repo_error(err: FtsError) -> RepositoryError {
    match err {
        FtsError::Repository(r) => r,
        FtsError::Sqlx(s) => RepositoryError::GenericDatabaseError(s),
    }
}

/// The single in-process entry point for everything the catalogue exposes
/// (spec §6.1): sources, the incremental scanner, track/album/artist
/// enumeration, the FTS and trigram search surfaces, and the download
/// reconciliation pass. Every method here owns its own `Store::transaction`
/// or read-only query — callers never see a raw connection or executor.
pub struct Library {
    store: Store,
    sources_repo: SqliteSourcesRepository,
    tracks_repo: SqliteTracksRepository,
    matcher_cache: MatcherCache,
}

impl Library {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            sources_repo: SqliteSourcesRepository::new(),
            tracks_repo: SqliteTracksRepository::new(),
            matcher_cache: MatcherCache::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ---- Sources ---------------------------------------------------

    pub async fn add_source(&self, path: &Path) -> LibraryResult<Source> {
        let now = chrono::Local::now().naive_local();
        self.sources_repo
            .add(self.store.pool(), path, now.and_utc().timestamp())
            .await
            .map_err(|e| LibraryError::new("add source", path.display().to_string(), e))
    }

    /// Removes a source and, in the same transaction, every track beneath
    /// it and the FTS rows those tracks contributed (spec §3 "Removing a
    /// source cascades...", §8 invariant).
    pub async fn remove_source(&self, path: &Path) -> LibraryResult<()> {
        let subject = path.display().to_string();
        let path = path.to_path_buf();
        let tracks_repo = &self.tracks_repo;
        let sources_repo = &self.sources_repo;

        self.store
            .transaction(|tx| {
                let path = path.clone();
                async move {
                    fts::remove_by_prefix(&mut **tx, tracks_repo, &path).await.map_err(to_repo_error)?;
                    sources_repo.remove(&mut **tx, &path).await?;
                    Ok(())
                }
            })
            .await
            .map_err(|e: RepositoryError| LibraryError::new("remove source", subject, e))
    }

    pub async fn sources(&self) -> LibraryResult<Vec<Source>> {
        self.sources_repo.all(self.store.pool()).await.map_err(|e| LibraryError::new("list sources", "", e))
    }

    pub async fn source_exists(&self, path: &Path) -> LibraryResult<bool> {
        self.sources_repo
            .exists(self.store.pool(), path)
            .await
            .map_err(|e| LibraryError::new("check source", path.display().to_string(), e))
    }

    pub async fn track_count_by_source(&self, path: &Path) -> LibraryResult<i64> {
        self.tracks_repo
            .count_for_source(self.store.pool(), path)
            .await
            .map_err(|e| LibraryError::new("count tracks for source", path.display().to_string(), e))
    }

    /// No-op unless the sources table is empty (spec §6.1); used to seed
    /// the store from configured paths the first time the binary runs
    /// against a fresh database.
    pub async fn migrate_sources(&self, paths: &[PathBuf]) -> LibraryResult<()> {
        let existing = self.sources_repo.count(self.store.pool()).await.map_err(|e| LibraryError::new("migrate sources", "", e))?;
        if existing > 0 {
            return Ok(());
        }

        let now = chrono::Local::now().naive_local().and_utc().timestamp();
        for path in paths {
            self.sources_repo
                .add(self.store.pool(), path, now)
                .await
                .map_err(|e| LibraryError::new("migrate sources", path.display().to_string(), e))?;
        }

        Ok(())
    }

    // ---- Scanning ----------------------------------------------------

    /// Incremental scan over `sources` (spec §4.2 mode: incremental).
    pub async fn refresh(
        &self,
        sources: &[PathBuf],
        progress: mpsc::Sender<ScanProgress>,
        cancel: CancellationToken,
    ) -> LibraryResult<HashMap<PathBuf, SourceStats>> {
        scanner::scan(&self.store, sources, false, progress, cancel)
            .await
            .map_err(|e| LibraryError::new("refresh", format!("{} source(s)", sources.len()), e))
    }

    /// Full rescan over `sources`, re-reading every file regardless of
    /// mtime (spec §4.2 mode: full-rescan).
    pub async fn full_refresh(
        &self,
        sources: &[PathBuf],
        progress: mpsc::Sender<ScanProgress>,
        cancel: CancellationToken,
    ) -> LibraryResult<HashMap<PathBuf, SourceStats>> {
        scanner::scan(&self.store, sources, true, progress, cancel)
            .await
            .map_err(|e| LibraryError::new("full refresh", format!("{} source(s)", sources.len()), e))
    }

    /// Incremental scan restricted to one source, registering it first if
    /// it isn't already configured (spec §4.2 mode: single-source).
    pub async fn refresh_source(
        &self,
        source: &Path,
        progress: mpsc::Sender<ScanProgress>,
        cancel: CancellationToken,
    ) -> LibraryResult<HashMap<PathBuf, SourceStats>> {
        scanner::scan_single_source(&self.store, source, progress, cancel)
            .await
            .map_err(|e| LibraryError::new("refresh source", source.display().to_string(), e))
    }

    // ---- Enumeration ---------------------------------------------------

    pub async fn artists(&self) -> LibraryResult<Vec<String>> {
        self.tracks_repo.distinct_artists(self.store.pool()).await.map_err(|e| LibraryError::new("list artists", "", e))
    }

    pub async fn albums(&self, album_artist: &str) -> LibraryResult<Vec<AlbumRow>> {
        self.tracks_repo
            .albums_for_artist(self.store.pool(), album_artist)
            .await
            .map_err(|e| LibraryError::new("list albums", album_artist, e))
    }

    pub async fn all_albums(&self) -> LibraryResult<Vec<AlbumRow>> {
        self.tracks_repo.all_albums(self.store.pool()).await.map_err(|e| LibraryError::new("list all albums", "", e))
    }

    pub async fn tracks(&self, album_artist: &str, album: &str) -> LibraryResult<Vec<Track>> {
        self.tracks_repo
            .tracks_for_album(self.store.pool(), album_artist, album)
            .await
            .map_err(|e| LibraryError::new("list tracks", format!("{album_artist} / {album}"), e))
    }

    pub async fn album_has_multiple_discs(&self, album_artist: &str, album: &str) -> LibraryResult<bool> {
        self.tracks_repo
            .album_has_multiple_discs(self.store.pool(), album_artist, album)
            .await
            .map_err(|e| LibraryError::new("check multi-disc album", format!("{album_artist} / {album}"), e))
    }

    pub async fn artist_tracks(&self, album_artist: &str) -> LibraryResult<Vec<Track>> {
        self.tracks_repo
            .tracks_for_artist(self.store.pool(), album_artist)
            .await
            .map_err(|e| LibraryError::new("list artist tracks", album_artist, e))
    }

    pub async fn album_track_ids(&self, album_artist: &str, album: &str) -> LibraryResult<Vec<i64>> {
        self.tracks_repo
            .track_ids_for_album(self.store.pool(), album_artist, album)
            .await
            .map_err(|e| LibraryError::new("list album track ids", format!("{album_artist} / {album}"), e))
    }

    /// Recursively resolves a `LibraryNode` to the track ids it covers
    /// (spec §6.1 `CollectTrackIDs`): a track node is itself, an album node
    /// is its tracks, an artist node is every track under that album-artist.
    pub async fn collect_track_ids(&self, node: &LibraryNode) -> LibraryResult<Vec<i64>> {
        match node {
            LibraryNode::Track(id) => Ok(vec![*id]),
            LibraryNode::Album { album_artist, album } => self.album_track_ids(album_artist, album).await,
            LibraryNode::Artist(album_artist) => self
                .tracks_repo
                .track_ids_for_artist(self.store.pool(), album_artist)
                .await
                .map_err(|e| LibraryError::new("collect track ids", album_artist.clone(), e)),
        }
    }

    pub async fn track_by_id(&self, id: i64) -> LibraryResult<Option<Track>> {
        self.tracks_repo.by_id(self.store.pool(), id).await.map_err(|e| LibraryError::new("look up track", id.to_string(), e))
    }

    pub async fn track_by_path(&self, path: &Path) -> LibraryResult<Option<Track>> {
        self.tracks_repo
            .by_path(self.store.pool(), path)
            .await
            .map_err(|e| LibraryError::new("look up track", path.display().to_string(), e))
    }

    pub async fn track_count(&self) -> LibraryResult<i64> {
        self.tracks_repo.count(self.store.pool()).await.map_err(|e| LibraryError::new("count tracks", "", e))
    }

    pub async fn artist_count(&self) -> LibraryResult<i64> {
        self.tracks_repo.count_artists(self.store.pool()).await.map_err(|e| LibraryError::new("count artists", "", e))
    }

    pub async fn album_count(&self) -> LibraryResult<i64> {
        self.tracks_repo.count_albums(self.store.pool()).await.map_err(|e| LibraryError::new("count albums", "", e))
    }

    // ---- Mutation ---------------------------------------------------

    /// Deletes one track and its FTS rows in one transaction (spec §6.1
    /// `DeleteTrack`).
    pub async fn delete_track(&self, id: i64) -> LibraryResult<()> {
        let tracks_repo = &self.tracks_repo;

        self.store
            .transaction(|tx| async move {
                let Some(track) = tracks_repo.delete_by_id(&mut **tx, id).await? else {
                    return Ok(());
                };
                fts::remove_track(&mut **tx, &track).await.map_err(to_repo_error)?;
                Ok(())
            })
            .await
            .map_err(|e: RepositoryError| LibraryError::new("delete track", id.to_string(), e))?;

        self.matcher_cache.invalidate();
        Ok(())
    }

    /// Re-reads and upserts a fixed list of files directly, bypassing
    /// source discovery (spec §6.1 `AddTracks`).
    pub async fn add_tracks(&self, paths: &[PathBuf]) -> BatchSaveReport {
        let report = scanner::add_tracks(&self.store, paths).await;
        self.matcher_cache.invalidate();
        report
    }

    // ---- Search ---------------------------------------------------

    pub async fn search_fts(&self, query: &str) -> LibraryResult<Vec<FtsRow>> {
        let mut conn = self.store.pool().acquire().await.map_err(|e| LibraryError::new("search", query, RepositoryError::from_sqlx_error(e)))?;
        fts::search(&mut conn, query).await.map_err(|e| LibraryError::new("search", query, e))
    }

    pub async fn search_albums_fts(&self, query: &str) -> LibraryResult<Vec<FtsRow>> {
        let mut conn = self.store.pool().acquire().await.map_err(|e| LibraryError::new("search albums", query, RepositoryError::from_sqlx_error(e)))?;
        fts::search_albums(&mut conn, query).await.map_err(|e| LibraryError::new("search albums", query, e))
    }

    pub async fn rebuild_fts_index(&self) -> LibraryResult<()> {
        let mut conn = self.store.pool().acquire().await.map_err(|e| LibraryError::new("rebuild fts index", "", RepositoryError::from_sqlx_error(e)))?;
        fts::rebuild(&mut conn).await.map_err(|e| LibraryError::new("rebuild fts index", "", e))
    }

    pub async fn ensure_fts_index(&self) -> LibraryResult<()> {
        let mut conn = self.store.pool().acquire().await.map_err(|e| LibraryError::new("ensure fts index", "", RepositoryError::from_sqlx_error(e)))?;
        fts::ensure(&mut conn).await.map_err(|e| LibraryError::new("ensure fts index", "", e))
    }

    /// Every track/album/artist projected down to the (filter, display) pair
    /// the trigram matcher (C4) consumes — independent of whether the FTS
    /// index (C3) has been built, per spec §4.4's "used ... when FTS is
    /// unavailable".
    pub async fn all_search_items(&self) -> LibraryResult<Vec<SearchItem>> {
        let tracks = self.tracks_repo.all(self.store.pool()).await.map_err(|e| LibraryError::new("list search items", "", e))?;

        let mut items = Vec::with_capacity(tracks.len());
        let mut seen_artists = std::collections::HashSet::new();
        let mut seen_albums = std::collections::HashSet::new();

        for track in &tracks {
            if seen_artists.insert(track.album_artist().to_string()) {
                items.push(SearchItem::new(track.album_artist(), track.album_artist()));
            }

            let album_key = (track.album_artist().to_string(), track.album().to_string());
            if seen_albums.insert(album_key) {
                items.push(SearchItem::new(
                    format!("{} {}", track.album_artist(), track.album()),
                    track.album().to_string(),
                ));
            }
        }

        for track in &tracks {
            let filter = if track.artist() != track.album_artist() {
                format!("{} {} {} {}", track.album_artist(), track.album(), track.title(), track.artist())
            } else {
                format!("{} {} {}", track.album_artist(), track.album(), track.title())
            };
            items.push(SearchItem::new(filter, track.title().to_string()));
        }

        Ok(items)
    }

    /// Returns the cached `(items, matcher)` pair (spec §6.1
    /// `SearchItemsAndMatcher`), rebuilding from the store only if
    /// `InvalidateSearchCache` was called (or this is the first access)
    /// since the last build.
    pub async fn search_items_and_matcher(&self) -> LibraryResult<(Vec<SearchItem>, std::sync::Arc<TrigramMatcher>)> {
        // `get_or_build` takes an infallible rebuild closure; a query error
        // here would otherwise have no way to surface, so it is collapsed
        // to an empty item set and logged rather than threaded through.
        let (items, matcher) = self
            .matcher_cache
            .get_or_build(|| async {
                match self.all_search_items().await {
                    Ok(items) => items,
                    Err(err) => {
                        log::warn!("Failed to rebuild search index: {err}");
                        Vec::new()
                    }
                }
            })
            .await;

        Ok((items, matcher))
    }

    pub fn invalidate_search_cache(&self) {
        self.matcher_cache.invalidate();
    }

    // ---- Download reconciliation ---------------------------------------

    pub async fn reconcile(&self, transfers: &[TransferEvent]) -> LibraryResult<Vec<Download>> {
        let now = chrono::Local::now().naive_local();
        reconciler::reconcile(&self.store, transfers, now)
            .await
            .map_err(|e| LibraryError::new("reconcile downloads", format!("{} transfer event(s)", transfers.len()), e))
    }

    pub async fn verify_downloads_on_disk(&self, completed_root: &Path) -> LibraryResult<Vec<Download>> {
        let now = chrono::Local::now().naive_local();
        reconciler::verify_on_disk(&self.store, completed_root, now)
            .await
            .map_err(|e| LibraryError::new("verify downloads on disk", completed_root.display().to_string(), e))
    }

    // ---- Import ----------------------------------------------------

    /// Runs the re-tag/rename/move pipeline for one reconciled download
    /// against externally-resolved release metadata, then lands the
    /// imported files in the catalogue and drops the download row once
    /// every planned file has landed clean.
    pub async fn import_download(
        &self,
        transfer: &TransferConfig,
        download_id: i64,
        release: &ReleaseMetadata,
        plan: Vec<ImportPlanItem>,
    ) -> LibraryResult<Vec<ImportedFile>> {
        import::import_download(&self.store, transfer, download_id, release, plan)
            .await
            .map_err(|e| LibraryError::new("import download", download_id.to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::track::TrackDraft;

    async fn in_memory_library() -> Library {
        let store = Store::open_in_memory().await.unwrap();
        Library::new(store)
    }

    fn draft(path: &Path, artist: &str, album: &str, title: &str) -> TrackDraft {
        TrackDraft {
            path: path.to_path_buf(),
            mtime: 1,
            artist: artist.to_string(),
            album_artist: None,
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

    async fn insert_track(lib: &Library, draft: &TrackDraft) -> Track {
        let now = chrono::Local::now().naive_local();
        let tracks_repo = &lib.tracks_repo;

        lib.store
            .transaction(|tx| {
                let draft = draft.clone();
                async move {
                    let inserted = tracks_repo.insert(&mut **tx, &draft, now).await?;
                    fts::add_track(&mut **tx, &inserted).await.map_err(to_repo_error)?;
                    Ok::<_, RepositoryError>(inserted)
                }
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn add_source_then_remove_cascades_tracks_and_fts() {
        let lib = in_memory_library().await;
        let source_path = PathBuf::from("/music");
        lib.add_source(&source_path).await.unwrap();

        let d = draft(&source_path.join("a.flac"), "The Beatles", "Abbey Road", "Come Together");
        insert_track(&lib, &d).await;

        assert_eq!(lib.track_count().await.unwrap(), 1);

        lib.remove_source(&source_path).await.unwrap();
        assert_eq!(lib.track_count().await.unwrap(), 0);

        let hits = lib.search_fts("beatles").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_track_drops_fts_rows_too() {
        let lib = in_memory_library().await;
        let d = draft(Path::new("/music/a.flac"), "The Beatles", "Abbey Road", "Come Together");
        let track = insert_track(&lib, &d).await;

        lib.delete_track(track.id()).await.unwrap();
        assert_eq!(lib.track_count().await.unwrap(), 0);
        assert!(lib.search_fts("beatles").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn collect_track_ids_resolves_every_node_kind() {
        let lib = in_memory_library().await;
        let d1 = draft(Path::new("/music/a.flac"), "The Beatles", "Abbey Road", "Come Together");
        let d2 = draft(Path::new("/music/b.flac"), "The Beatles", "Abbey Road", "Something");
        let d3 = draft(Path::new("/music/c.flac"), "The Beatles", "Let It Be", "Two of Us");

        let t1 = insert_track(&lib, &d1).await;
        insert_track(&lib, &d2).await;
        insert_track(&lib, &d3).await;

        let track_ids = lib.collect_track_ids(&LibraryNode::Track(t1.id())).await.unwrap();
        assert_eq!(track_ids, vec![t1.id()]);

        let album_ids = lib.collect_track_ids(&LibraryNode::Album {
            album_artist: "The Beatles".to_string(),
            album: "Abbey Road".to_string(),
        }).await.unwrap();
        assert_eq!(album_ids.len(), 2);

        let artist_ids = lib.collect_track_ids(&LibraryNode::Artist("The Beatles".to_string())).await.unwrap();
        assert_eq!(artist_ids.len(), 3);
    }

    #[tokio::test]
    async fn migrate_sources_is_noop_unless_empty() {
        let lib = in_memory_library().await;

        lib.migrate_sources(&[PathBuf::from("/m")]).await.unwrap();
        assert_eq!(lib.sources().await.unwrap().len(), 1);

        lib.migrate_sources(&[PathBuf::from("/n"), PathBuf::from("/o")]).await.unwrap();
        assert_eq!(lib.sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn all_search_items_covers_artists_albums_and_tracks() {
        let lib = in_memory_library().await;
        let d = draft(Path::new("/music/a.flac"), "The Beatles", "Abbey Road", "Come Together");
        insert_track(&lib, &d).await;

        let items = lib.all_search_items().await.unwrap();
        assert!(items.iter().any(|i| i.display == "The Beatles"));
        assert!(items.iter().any(|i| i.display == "Abbey Road"));
        assert!(items.iter().any(|i| i.display == "Come Together"));
    }
}
