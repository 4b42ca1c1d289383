use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use lofty::probe::Probe;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::ScanError;
use crate::domain::audiofile::{AudioFileMetadata, AudioFileType};
use crate::domain::track::{Track, TrackDraft};
use crate::domain::{BatchSaveOutcome, BatchSaveReport, SourceStats};
use crate::repository::{RepositoryError, SqliteSourcesRepository, SqliteTracksRepository};
use crate::services::fts;
use crate::utils::db::Store;
use crate::utils::normalizations::normalize_path;

/// Fixed worker pool size for the Process phase (spec §4.2/§5): tag reading
/// is blocking I/O-bound work, eight workers keep a handful of slow drives
/// busy without spawning one task per file.
const WORKER_COUNT: usize = 8;

/// How often the ticker samples the atomic progress counter and emits a
/// `Processing` event.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Scanning,
    Processing,
    Cleaning,
    Done,
}

/// One event on the scan progress channel (spec §6.4).
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<PathBuf>,
    pub stats: Option<HashMap<PathBuf, SourceStats>>,
}

impl ScanProgress {
    fn scanning(current: usize, current_file: Option<PathBuf>) -> Self {
        Self { phase: ScanPhase::Scanning, current, total: 0, current_file, stats: None }
    }

    fn processing(current: usize, total: usize, current_file: Option<PathBuf>) -> Self {
        Self { phase: ScanPhase::Processing, current, total, current_file, stats: None }
    }

    fn cleaning(current: usize, total: usize, current_file: Option<PathBuf>) -> Self {
        Self { phase: ScanPhase::Cleaning, current, total, current_file, stats: None }
    }

    fn done(stats: HashMap<PathBuf, SourceStats>) -> Self {
        Self { phase: ScanPhase::Done, current: 0, total: 0, current_file: None, stats: Some(stats) }
    }
}

#[derive(Debug, Clone)]
struct DiscoveredFile {
    path: PathBuf,
    source: PathBuf,
    mtime: i64,
}

fn is_audio_file(path: &Path) -> bool {
    path.extension().map(AudioFileType::is_supported_extension).unwrap_or(false)
}

fn file_mtime(path: &Path) -> std::io::Result<i64> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    let seconds = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(seconds)
}

/// Reads tags off one file and assembles a `TrackDraft`. This is blocking
/// I/O and is always run inside `spawn_blocking` by the Process phase's
/// workers.
fn read_track_draft(path: &Path, mtime: i64) -> Result<TrackDraft, std::io::Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let metadata = match Probe::new(&mut reader).guess_file_type() {
        Ok(probe) => AudioFileMetadata::extract_or_default(probe.read()),
        Err(err) => {
            log::warn!("Could not probe file type for {}: {}", path.display(), err);
            AudioFileMetadata::default()
        }
    };

    Ok(TrackDraft {
        path: path.to_path_buf(),
        mtime,
        artist: metadata.artist,
        album_artist: metadata.album_artist,
        album: metadata.album,
        title: metadata.title,
        disc_number: metadata.disc_number,
        track_number: metadata.track_number,
        year: metadata.year,
        genre: metadata.genre,
        original_date: metadata.original_date,
        release_date: metadata.release_date,
        label: metadata.label,
    })
}

/// Discover phase: walks every source directory, recording the audio files
/// it finds along with their mtime. A source root that can't even be
/// opened is a fatal error (spec §4.2); a file that vanishes mid-walk or a
/// walk error for one entry is soft and skipped.
async fn discover(
    sources: &[PathBuf],
    progress: &mpsc::Sender<ScanProgress>,
    cancel: &CancellationToken,
) -> Result<Vec<DiscoveredFile>, ScanError> {
    let mut discovered = Vec::new();

    for source in sources {
        std::fs::read_dir(source).map_err(|e| ScanError::RootDirAccessError {
            path: source.display().to_string(),
            source: e,
        })?;

        for entry_result in WalkDir::new(source).min_depth(1) {
            if cancel.is_cancelled() {
                return Ok(discovered);
            }

            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("Walk error under {}: {}", source.display(), err);
                    continue;
                }
            };

            let path = entry.path();
            if path.is_dir() || path.is_symlink() || !is_audio_file(path) {
                continue;
            }

            let mtime = match file_mtime(path) {
                Ok(mtime) => mtime,
                Err(err) => {
                    log::warn!("Skipping {}: failed to read mtime: {}", path.display(), err);
                    continue;
                }
            };

            discovered.push(DiscoveredFile { path: normalize_path(path), source: source.clone(), mtime });

            if discovered.len() % 100 == 0 {
                let _ = progress
                    .send(ScanProgress::scanning(discovered.len(), Some(path.to_path_buf())))
                    .await;
            }
        }
    }

    Ok(discovered)
}

struct DiffResult {
    to_process: Vec<DiscoveredFile>,
    new_paths: std::collections::HashSet<PathBuf>,
    deletions: Vec<PathBuf>,
}

fn diff(
    discovered: &[DiscoveredFile],
    existing: &HashMap<PathBuf, i64>,
    full_rescan: bool,
) -> DiffResult {
    let mut to_process = Vec::new();
    let mut new_paths = std::collections::HashSet::new();
    let discovered_paths: std::collections::HashSet<&PathBuf> = discovered.iter().map(|d| &d.path).collect();

    for file in discovered {
        match existing.get(&file.path) {
            None => {
                new_paths.insert(file.path.clone());
                to_process.push(file.clone());
            }
            Some(existing_mtime) => {
                if full_rescan || *existing_mtime != file.mtime {
                    to_process.push(file.clone());
                }
            }
        }
    }

    let deletions = existing.keys().filter(|path| !discovered_paths.contains(path)).cloned().collect();

    DiffResult { to_process, new_paths, deletions }
}

struct ProcessedFile {
    draft: TrackDraft,
    source: PathBuf,
    is_new: bool,
}

/// Process phase: fans `to_process` out across `WORKER_COUNT` blocking-tag-read
/// workers, collects results through a single writer (workers never touch the
/// store directly, per spec §5), and upserts each track plus its FTS rows in
/// its own transaction. A ~100ms ticker samples the shared atomic counter so
/// progress events don't require a channel round-trip per file.
async fn process(
    store: &Store,
    work: Vec<DiscoveredFile>,
    new_paths: &std::collections::HashSet<PathBuf>,
    progress: mpsc::Sender<ScanProgress>,
    cancel: CancellationToken,
) -> Result<HashMap<PathBuf, SourceStats>, ScanError> {
    let total = work.len();
    let mut stats: HashMap<PathBuf, SourceStats> = HashMap::new();

    if total == 0 {
        return Ok(stats);
    }

    let (work_tx, work_rx) = mpsc::unbounded_channel::<DiscoveredFile>();
    let (result_tx, mut result_rx) = mpsc::channel::<ProcessedFile>(256);
    let counter = Arc::new(AtomicUsize::new(0));

    for file in work {
        let _ = work_tx.send(file);
    }
    drop(work_tx);

    let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
    let mut workers = JoinSet::new();

    for _ in 0..WORKER_COUNT {
        let work_rx = work_rx.clone();
        let result_tx = result_tx.clone();
        let counter = counter.clone();
        let new_paths = new_paths.clone();
        let cancel = cancel.clone();

        workers.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }

                let file = {
                    let mut rx = work_rx.lock().await;
                    rx.recv().await
                };

                let Some(file) = file else { break };
                let is_new = new_paths.contains(&file.path);

                let path = file.path.clone();
                let mtime = file.mtime;
                let draft_result = tokio::task::spawn_blocking(move || read_track_draft(&path, mtime)).await;

                counter.fetch_add(1, Ordering::Relaxed);

                match draft_result {
                    Ok(Ok(draft)) => {
                        if draft.validate().is_ok() {
                            let _ = result_tx
                                .send(ProcessedFile { draft, source: file.source, is_new })
                                .await;
                        } else {
                            log::warn!("Skipping {}: empty artist or album after reading tags", file.path.display());
                        }
                    }
                    Ok(Err(err)) => {
                        log::warn!("Skipping {}: {}", file.path.display(), err);
                    }
                    Err(join_err) => {
                        log::warn!("Tag-reading task for {} panicked: {}", file.path.display(), join_err);
                    }
                }
            }
        });
    }
    drop(result_tx);

    let ticker_counter = counter.clone();
    let ticker_progress = progress.clone();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let ticker_handle = tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let current = ticker_counter.load(Ordering::Relaxed);
            if ticker_progress.send(ScanProgress::processing(current, total, None)).await.is_err() {
                break;
            }
            if current >= total {
                break;
            }
        }
    });

    let tracks_repo = SqliteTracksRepository::new();
    let now = chrono::Local::now().naive_local();

    while let Some(processed) = result_rx.recv().await {
        let existing = tracks_repo
            .by_path(store.pool(), &processed.draft.path)
            .await
            .map_err(ScanError::RepositoryError)?;

        let relative = processed
            .draft
            .path
            .strip_prefix(&processed.source)
            .unwrap_or(&processed.draft.path)
            .to_string_lossy()
            .to_string();

        let result: Result<(), ScanError> = store
            .transaction(|tx| async move {
                match existing {
                    Some(old_track) => {
                        let updated = tracks_repo.update(&mut **tx, old_track.id(), &processed.draft, now).await?;
                        fts::update_track(&mut **tx, &old_track, &updated).await.map_err(|e| match e {
                            fts::FtsError::Repository(r) => r,
                            fts::FtsError::Sqlx(s) => RepositoryError::GenericDatabaseError(s),
                        })?;
                    }
                    None => {
                        let inserted = tracks_repo.insert(&mut **tx, &processed.draft, now).await?;
                        fts::add_track(&mut **tx, &inserted).await.map_err(|e| match e {
                            fts::FtsError::Repository(r) => r,
                            fts::FtsError::Sqlx(s) => RepositoryError::GenericDatabaseError(s),
                        })?;
                    }
                }
                Ok(())
            })
            .await
            .map_err(ScanError::RepositoryError);

        match result {
            Ok(()) => {
                let entry = stats.entry(processed.source.clone()).or_default();
                if processed.is_new {
                    entry.added.push(relative);
                } else {
                    entry.updated.push(relative);
                }
            }
            Err(err) => {
                log::warn!("Failed to persist {}: {}", processed.draft.path.display(), err);
            }
        }
    }

    while workers.join_next().await.is_some() {}
    ticker_handle.abort();
    let _ = progress.send(ScanProgress::processing(total, total, None)).await;

    Ok(stats)
}

/// Clean phase: deletes every track under a path no longer present on disk,
/// cleaning up its FTS rows first (per track, since we already have the
/// `Track` value from the delete).
async fn clean(
    store: &Store,
    deletions: Vec<PathBuf>,
    progress: &mpsc::Sender<ScanProgress>,
    stats: &mut HashMap<PathBuf, SourceStats>,
    sources: &[PathBuf],
) -> Result<(), ScanError> {
    let tracks_repo = SqliteTracksRepository::new();
    let total = deletions.len();

    for (index, path) in deletions.into_iter().enumerate() {
        let _ = progress.send(ScanProgress::cleaning(index + 1, total, Some(path.clone()))).await;

        let result: Result<Option<Track>, ScanError> = store
            .transaction(|tx| async move {
                let existing = tracks_repo.by_path(&mut **tx, &path).await?;
                let Some(track) = existing else { return Ok(None) };

                tracks_repo.delete_by_id(&mut **tx, track.id()).await?;
                fts::remove_track(&mut **tx, &track).await.map_err(|e| match e {
                    fts::FtsError::Repository(r) => r,
                    fts::FtsError::Sqlx(s) => RepositoryError::GenericDatabaseError(s),
                })?;
                Ok(Some(track))
            })
            .await
            .map_err(ScanError::RepositoryError);

        match result {
            Ok(Some(track)) => {
                if let Some(source) = sources.iter().find(|s| track.path().starts_with(s)) {
                    let relative = track.path().strip_prefix(source).unwrap_or(track.path()).to_string_lossy().to_string();
                    stats.entry(source.clone()).or_default().removed.push(relative);
                }
            }
            Ok(None) => {}
            Err(err) => log::warn!("Failed to delete {}: {}", path.display(), err),
        }
    }

    Ok(())
}

/// Runs a full four-phase scan (Discover → Diff → Process → Clean) over
/// `sources`, emitting progress on `progress` and honouring `cancel` for
/// orderly early exit. `full_rescan` forces every discovered file through
/// the Process phase regardless of mtime (spec §4.2 `FullRefresh`).
pub async fn scan(
    store: &Store,
    sources: &[PathBuf],
    full_rescan: bool,
    progress: mpsc::Sender<ScanProgress>,
    cancel: CancellationToken,
) -> Result<HashMap<PathBuf, SourceStats>, ScanError> {
    let tracks_repo = SqliteTracksRepository::new();

    let discovered = discover(sources, &progress, &cancel).await?;
    if cancel.is_cancelled() {
        return Ok(HashMap::new());
    }

    let existing = tracks_repo.mtimes_under_sources(store.pool(), sources).await?;
    let diff_result = diff(&discovered, &existing, full_rescan);

    let mut stats = process(store, diff_result.to_process, &diff_result.new_paths, progress.clone(), cancel.clone()).await?;

    if !cancel.is_cancelled() {
        clean(store, diff_result.deletions, &progress, &mut stats, sources).await?;
    }

    let _ = progress.send(ScanProgress::done(stats.clone())).await;
    Ok(stats)
}

/// Registers `source_path` (if not already present) and runs a scan scoped
/// to just that one source.
pub async fn scan_single_source(
    store: &Store,
    source_path: &Path,
    progress: mpsc::Sender<ScanProgress>,
    cancel: CancellationToken,
) -> Result<HashMap<PathBuf, SourceStats>, ScanError> {
    let sources_repo = SqliteSourcesRepository::new();
    let normalized = normalize_path(source_path);

    if !sources_repo.exists(store.pool(), &normalized).await? {
        let now: NaiveDateTime = chrono::Local::now().naive_local();
        sources_repo.add(store.pool(), &normalized, now.and_utc().timestamp()).await?;
    }

    scan(store, std::slice::from_ref(&normalized), false, progress, cancel).await
}

/// Adds or re-reads a fixed list of files directly into the store (spec §6.1
/// `AddTracks`), bypassing source discovery entirely — used both by the
/// library facade and by the import pipeline's final "land the imported
/// files" step. Each path is handled independently: a failure on one file
/// becomes a failed outcome rather than aborting the batch.
pub async fn add_tracks(store: &Store, paths: &[PathBuf]) -> BatchSaveReport {
    let tracks_repo = SqliteTracksRepository::new();
    let mut report = BatchSaveReport::new();
    let now = chrono::Local::now().naive_local();

    for (batch_index, path) in paths.iter().enumerate() {
        let normalized = normalize_path(path);

        let result: Result<i64, RepositoryError> = async {
            let mtime = file_mtime(&normalized).map_err(|e| {
                RepositoryError::GenericDatabaseError(sqlx::Error::Io(e))
            })?;

            let draft = tokio::task::spawn_blocking({
                let normalized = normalized.clone();
                move || read_track_draft(&normalized, mtime)
            })
            .await
            .map_err(|join_err| {
                RepositoryError::GenericDatabaseError(sqlx::Error::Protocol(join_err.to_string()))
            })?
            .map_err(|io_err| RepositoryError::GenericDatabaseError(sqlx::Error::Io(io_err)))?;

            store
                .transaction(|tx| async move {
                    let existing = tracks_repo.by_path(&mut **tx, &draft.path).await?;
                    match existing {
                        Some(old_track) => {
                            let updated = tracks_repo.update(&mut **tx, old_track.id(), &draft, now).await?;
                            fts::update_track(&mut **tx, &old_track, &updated).await.map_err(|e| match e {
                                fts::FtsError::Repository(r) => r,
                                fts::FtsError::Sqlx(s) => RepositoryError::GenericDatabaseError(s),
                            })?;
                            Ok(updated.id())
                        }
                        None => {
                            let inserted = tracks_repo.insert(&mut **tx, &draft, now).await?;
                            fts::add_track(&mut **tx, &inserted).await.map_err(|e| match e {
                                fts::FtsError::Repository(r) => r,
                                fts::FtsError::Sqlx(s) => RepositoryError::GenericDatabaseError(s),
                            })?;
                            Ok(inserted.id())
                        }
                    }
                })
                .await
        }
        .await;

        if let Err(err) = &result {
            log::warn!("Failed to add track {}: {}", normalized.display(), err);
        }

        report.outcomes.push(BatchSaveOutcome { batch_index, result });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_classifies_new_modified_unchanged_and_deleted() {
        let existing = HashMap::from([
            (PathBuf::from("/m/a.flac"), 100),
            (PathBuf::from("/m/b.flac"), 200),
            (PathBuf::from("/m/c.flac"), 300),
        ]);

        let discovered = vec![
            DiscoveredFile { path: PathBuf::from("/m/a.flac"), source: PathBuf::from("/m"), mtime: 100 },
            DiscoveredFile { path: PathBuf::from("/m/b.flac"), source: PathBuf::from("/m"), mtime: 250 },
            DiscoveredFile { path: PathBuf::from("/m/d.flac"), source: PathBuf::from("/m"), mtime: 400 },
        ];

        let result = diff(&discovered, &existing, false);

        assert_eq!(result.to_process.len(), 2);
        assert!(result.to_process.iter().any(|f| f.path == PathBuf::from("/m/b.flac")));
        assert!(result.to_process.iter().any(|f| f.path == PathBuf::from("/m/d.flac")));
        assert!(result.new_paths.contains(&PathBuf::from("/m/d.flac")));
        assert_eq!(result.deletions, vec![PathBuf::from("/m/c.flac")]);
    }

    #[test]
    fn diff_full_rescan_reprocesses_unchanged_files() {
        let existing = HashMap::from([(PathBuf::from("/m/a.flac"), 100)]);
        let discovered = vec![DiscoveredFile { path: PathBuf::from("/m/a.flac"), source: PathBuf::from("/m"), mtime: 100 }];

        let result = diff(&discovered, &existing, true);
        assert_eq!(result.to_process.len(), 1);
        assert!(result.deletions.is_empty());
    }
}
