use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::file::{TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey};

use crate::domain::download::Download;
use crate::domain::release::{ReleaseMetadata, ReleaseTrackMetadata};
use crate::repository::{RepositoryError, SqliteDownloadsRepository};
use crate::services::rename;
use crate::services::scanner;
use crate::utils::config::TransferConfig;
use crate::utils::db::Store;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("Download <{0}> not found.")]
    DownloadNotFound(i64),

    #[error("I/O error moving '{path}': {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Failed to read or write tags for '{path}': {source}")]
    Tagging { path: PathBuf, source: lofty::error::LoftyError },
}

/// One track's source file paired with the authoritative metadata it should
/// be re-tagged and renamed to (spec §4.5 step 3).
pub struct ImportPlanItem {
    pub source_path: PathBuf,
    pub track: ReleaseTrackMetadata,
}

/// Per-file outcome of an import run: either the destination path it landed
/// at, or the error that stopped it — a failure on one file never aborts the
/// rest of the batch (spec §4.5).
pub struct ImportedFile {
    pub source_path: PathBuf,
    pub result: Result<PathBuf, ImportError>,
}

fn write_optional(tag: &mut lofty::tag::Tag, key: ItemKey, value: &Option<String>) {
    match value {
        Some(v) if !v.is_empty() => tag.insert_text(key, v.clone()),
        _ => {
            tag.remove_key(&key);
        }
    }
}

/// Re-tags one file in place with the release's authoritative metadata (spec
/// §4.5 step 3): every field MusicBrainz resolution supplies overwrites
/// whatever the file previously carried.
fn retag_file(path: &Path, release: &ReleaseMetadata, track: &ReleaseTrackMetadata) -> Result<(), ImportError> {
    let mut tagged_file = Probe::open(path)
        .map_err(|source| ImportError::Tagging { path: path.to_path_buf(), source })?
        .read()
        .map_err(|source| ImportError::Tagging { path: path.to_path_buf(), source })?;

    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(lofty::tag::Tag::new(tag_type));
    }

    let tag = tagged_file.primary_tag_mut().expect("tag inserted above if absent");

    tag.set_artist(track.artist.clone());
    tag.insert_text(ItemKey::AlbumArtist, release.album_artist.clone());
    tag.set_album(release.album.clone());
    tag.set_title(track.title.clone());

    if let Some(track_number) = track.track_number {
        tag.set_track(track_number as u32);
    }
    if let Some(disc_number) = track.disc_number {
        tag.set_disk(disc_number as u32);
    }
    if let Some(year) = release.year {
        tag.set_year(year as u32);
    }

    write_optional(tag, ItemKey::OriginalReleaseDate, &release.original_date);
    write_optional(tag, ItemKey::RecordingDate, &release.date);
    write_optional(tag, ItemKey::Label, &release.label);
    write_optional(tag, ItemKey::CatalogNumber, &release.catalog_number);
    write_optional(tag, ItemKey::Barcode, &release.barcode);
    write_optional(tag, ItemKey::OriginalMediaType, &release.media);
    write_optional(tag, ItemKey::RecordLabel, &release.label);
    // Lofty has no dedicated `ItemKey` for these MusicBrainz-specific fields;
    // `Unknown` with the Picard/Vorbis field name is the same fallback the
    // rest of the pack uses for tags outside lofty's known set.
    write_optional(tag, ItemKey::Unknown("RELEASETYPE".to_string()), &release.release_type_primary);
    write_optional(tag, ItemKey::Unknown("RELEASECOUNTRY".to_string()), &release.country);
    write_optional(tag, ItemKey::Unknown("SCRIPT".to_string()), &release.script);
    write_optional(tag, ItemKey::MusicBrainzReleaseGroupId, &Some(release.release_group_id.to_string()));
    write_optional(tag, ItemKey::MusicBrainzReleaseId, &Some(release.release_id.to_string()));

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|source| ImportError::Tagging { path: path.to_path_buf(), source })?;

    Ok(())
}

fn extension_of(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase()
}

/// Copies cover art (`cover.jpg`/`cover.png`/`folder.jpg`) found alongside
/// `source_dir` into `dest_dir`, if not already present there. Always a
/// copy, never a move — the source file may still be wanted by the
/// transfer daemon's own directory, unlike a track file which `std::fs::rename`
/// already claimed exclusively. Best-effort: a missing or unreadable cover
/// is not an import failure.
fn copy_cover_art(source_dir: &Path, dest_dir: &Path) {
    const CANDIDATES: &[&str] = &["cover.jpg", "cover.png", "folder.jpg", "folder.png"];

    for candidate in CANDIDATES {
        let source = source_dir.join(candidate);
        if !source.is_file() {
            continue;
        }

        let dest = dest_dir.join(candidate);
        if dest.is_file() {
            continue;
        }

        if let Err(err) = std::fs::copy(&source, &dest) {
            log::warn!("Failed to copy cover art {} to {}: {}", source.display(), dest.display(), err);
        }
        break;
    }
}

/// Runs the import pipeline for one download (spec §4.5): re-tags each
/// planned file with the release's authoritative metadata, moves it to its
/// resolved destination under `transfer.library_root`, copies cover art
/// alongside it, lands every successfully imported path in the library via
/// `scanner::add_tracks`, and — once every planned file has imported clean —
/// removes the now-redundant download row.
pub async fn import_download(
    store: &Store,
    transfer: &TransferConfig,
    download_id: i64,
    release: &ReleaseMetadata,
    plan: Vec<ImportPlanItem>,
) -> Result<Vec<ImportedFile>, ImportError> {
    let downloads_repo = SqliteDownloadsRepository::new();

    let download: Download = {
        let mut conn = store.pool().acquire().await?;
        downloads_repo
            .by_id(&mut conn, download_id)
            .await?
            .ok_or(ImportError::DownloadNotFound(download_id))?
    };

    let mut results = Vec::with_capacity(plan.len());
    let mut imported_paths: Vec<String> = download.imported_paths().to_vec();
    let mut newly_imported: Vec<PathBuf> = Vec::new();

    for item in plan {
        let outcome = (|| -> Result<PathBuf, ImportError> {
            let extension = extension_of(&item.source_path);
            let destination =
                rename::resolve_destination(&transfer.library_root, &transfer.folder_template, &transfer.filename_template, release, &item.track, &extension);

            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|source| ImportError::Io { path: parent.to_path_buf(), source })?;
            }

            std::fs::rename(&item.source_path, &destination).or_else(|_| {
                std::fs::copy(&item.source_path, &destination).map(|_| ()).and_then(|_| std::fs::remove_file(&item.source_path))
            }).map_err(|source| ImportError::Io { path: destination.clone(), source })?;

            retag_file(&destination, release, &item.track)?;

            if let (Some(source_parent), Some(dest_parent)) = (item.source_path.parent(), destination.parent()) {
                copy_cover_art(source_parent, dest_parent);
            }

            Ok(destination)
        })();

        if let Ok(destination) = &outcome {
            imported_paths.push(destination.to_string_lossy().to_string());
            newly_imported.push(destination.clone());
        } else if let Err(err) = &outcome {
            log::warn!("Failed to import {}: {}", item.source_path.display(), err);
        }

        results.push(ImportedFile { source_path: item.source_path, result: outcome });
    }

    {
        let mut conn = store.pool().acquire().await?;
        downloads_repo.push_imported_path(&mut *conn, download_id, &imported_paths).await?;
    }

    if !newly_imported.is_empty() {
        let report = scanner::add_tracks(store, &newly_imported).await;
        for failed in report.failed() {
            log::warn!("Failed to land imported track index {}: {}", failed.batch_index, failed.result.as_ref().unwrap_err());
        }
    }

    let all_files_imported = results.iter().all(|r| r.result.is_ok()) && results.len() == download.files().len();
    if all_files_imported {
        let mut conn = store.pool().acquire().await?;
        downloads_repo.delete(&mut *conn, download_id).await?;
    }

    Ok(results)
}

/// Groups planned items by their resolved folder (for building destination
/// directories up front) — a convenience for callers assembling an
/// `ImportPlanItem` list from per-track release metadata.
pub fn group_by_folder(
    transfer: &TransferConfig,
    release: &ReleaseMetadata,
    tracks: &[ReleaseTrackMetadata],
) -> HashMap<String, Vec<usize>> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, track) in tracks.iter().enumerate() {
        let folder = rename::resolve_folder(&transfer.folder_template, release, track);
        groups.entry(folder).or_default().push(index);
    }
    groups
}
