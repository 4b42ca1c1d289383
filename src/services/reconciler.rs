use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::domain::download::{Download, TransferStatus};
use crate::repository::{RepositoryError, SqliteDownloadsRepository};
use crate::utils::db::Store;

#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// One observed transfer-daemon event (spec §6.2): the daemon's own state
/// string together with however many bytes it reports transferred so far.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub username: String,
    pub filename: String,
    pub state: String,
    pub bytes_transferred: u64,
}

/// Maps a raw transfer-daemon state string onto one of our four statuses.
/// This is an ORDERED list of substring rules, not a hash map: several
/// daemon state strings share substrings (`"Queued, Remotely"` contains
/// neither `"Completed"` nor `"Errored"` but could in principle overlap
/// with other buckets as the daemon's vocabulary grows), so the first
/// matching rule in priority order wins rather than whichever bucket a
/// hash iteration happens to visit first.
pub fn classify_transfer_state(state: &str) -> TransferStatus {
    const RULES: &[(&str, TransferStatus)] = &[
        ("Completed", TransferStatus::Completed),
        ("Succeeded", TransferStatus::Completed),
        ("InProgress", TransferStatus::Downloading),
        ("Initializing", TransferStatus::Downloading),
        ("Requested", TransferStatus::Downloading),
        ("Errored", TransferStatus::Failed),
        ("Cancelled", TransferStatus::Failed),
        ("TimedOut", TransferStatus::Failed),
        ("Rejected", TransferStatus::Failed),
        ("Aborted", TransferStatus::Failed),
        ("Queued", TransferStatus::Pending),
    ];

    if state.is_empty() || state == "None" {
        return TransferStatus::Pending;
    }

    for (needle, status) in RULES {
        if state.contains(needle) {
            return *status;
        }
    }

    TransferStatus::Pending
}

/// Runs one reconciliation pass (spec §4.5): for every non-completed
/// download, match its files against the observed transfer events by
/// `(username, filename)`, update per-file status/bytes only when they
/// actually changed, recompute the download's aggregate status, and
/// persist that too only on change (bumping `updated_at`). Returns the
/// downloads that were touched. The whole pass runs in one transaction so
/// a crash mid-pass can't leave a download half-updated.
pub async fn reconcile(
    store: &Store,
    transfers: &[TransferEvent],
    now: NaiveDateTime,
) -> Result<Vec<Download>, ReconcilerError> {
    let transfer_map: HashMap<(&str, &str), &TransferEvent> =
        transfers.iter().map(|t| ((t.username.as_str(), t.filename.as_str()), t)).collect();

    let downloads_repo = SqliteDownloadsRepository::new();

    store
        .transaction(|tx| async move {
            let mut downloads = downloads_repo.by_status_not(&mut **tx, Some(TransferStatus::Completed)).await?;
            let mut touched = Vec::new();

            for download in downloads.iter_mut() {
                let mut any_file_changed = false;

                for file in download.files_mut() {
                    let Some(transfer) = transfer_map.get(&(download.username(), file.filename())) else {
                        continue;
                    };

                    let new_status = classify_transfer_state(&transfer.state);
                    let new_bytes = transfer.bytes_transferred;

                    if new_status == file.status() && new_bytes == file.bytes_read() {
                        continue;
                    }

                    file.set_status(new_status);
                    file.set_bytes_read(new_bytes);
                    downloads_repo
                        .update_file(&mut **tx, file.id(), new_status, new_bytes, file.verified_on_disk())
                        .await?;
                    any_file_changed = true;
                }

                let new_aggregate = download.aggregate_status();
                if new_aggregate != download.status() {
                    download.set_status(new_aggregate, now);
                    downloads_repo.update_status(&mut **tx, download.id(), new_aggregate, now).await?;
                    touched.push(download.clone());
                } else if any_file_changed {
                    touched.push(download.clone());
                }
            }

            Ok(touched)
        })
        .await
}

/// Checks every non-completed download's files against the filesystem
/// under `completed_root` (spec §4.5 verify-on-disk): a file whose exact
/// byte size matches what's on disk is promoted to completed even if the
/// transfer daemon never reported it, which covers downloads that
/// finished while this process wasn't running to reconcile them.
pub async fn verify_on_disk(
    store: &Store,
    completed_root: &Path,
    now: NaiveDateTime,
) -> Result<Vec<Download>, ReconcilerError> {
    let downloads_repo = SqliteDownloadsRepository::new();

    store
        .transaction(|tx| async move {
            let mut downloads = downloads_repo.by_status_not(&mut **tx, Some(TransferStatus::Completed)).await?;
            let mut touched = Vec::new();

            for download in downloads.iter_mut() {
                let base = completed_root.join(download.completed_folder_name());
                let mut any_file_changed = false;

                for file in download.files_mut() {
                    if file.verified_on_disk() {
                        continue;
                    }

                    let basename = Path::new(file.filename()).file_name().unwrap_or_default();
                    let candidate = base.join(basename);

                    let Ok(metadata) = std::fs::metadata(&candidate) else {
                        continue;
                    };

                    if metadata.len() != file.size() {
                        continue;
                    }

                    file.set_verified_on_disk(true);
                    file.set_status(TransferStatus::Completed);
                    file.set_bytes_read(file.size());
                    downloads_repo.update_file(&mut **tx, file.id(), TransferStatus::Completed, file.size(), true).await?;
                    any_file_changed = true;
                }

                let new_aggregate = download.aggregate_status();
                if new_aggregate != download.status() {
                    download.set_status(new_aggregate, now);
                    downloads_repo.update_status(&mut **tx, download.id(), new_aggregate, now).await?;
                    touched.push(download.clone());
                } else if any_file_changed {
                    touched.push(download.clone());
                }
            }

            Ok(touched)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn classify_priority_order_prefers_completed_over_queued_lookalikes() {
        assert_eq!(classify_transfer_state("Completed, Succeeded"), TransferStatus::Completed);
        assert_eq!(classify_transfer_state("Queued, Remotely"), TransferStatus::Pending);
        assert_eq!(classify_transfer_state("TimedOut"), TransferStatus::Failed);
        assert_eq!(classify_transfer_state(""), TransferStatus::Pending);
        assert_eq!(classify_transfer_state("None"), TransferStatus::Pending);
        assert_eq!(classify_transfer_state("SomeFutureState"), TransferStatus::Pending);
    }

    #[tokio::test]
    async fn reconcile_marks_completed_file_and_tracks_downloading_bytes() {
        let store = Store::open_in_memory().await.unwrap();
        let downloads_repo = SqliteDownloadsRepository::new();
        let now = chrono::Local::now().naive_local();

        let mut conn = store.pool().acquire().await.unwrap();
        downloads_repo
            .create(
                &mut conn,
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Joy Division",
                "Unknown Pleasures",
                Some(1979),
                "u",
                "@@u\\Music\\X",
                &[("01.flac".to_string(), 1000), ("02.flac".to_string(), 2000)],
                now,
            )
            .await
            .unwrap();
        drop(conn);

        let transfers = vec![
            TransferEvent { username: "u".to_string(), filename: "01.flac".to_string(), state: "Completed, Succeeded".to_string(), bytes_transferred: 1000 },
            TransferEvent { username: "u".to_string(), filename: "02.flac".to_string(), state: "InProgress".to_string(), bytes_transferred: 500 },
        ];

        let touched = reconcile(&store, &transfers, now).await.unwrap();
        assert_eq!(touched.len(), 1);
        let download = &touched[0];
        assert_eq!(download.status(), TransferStatus::Downloading);

        let file1 = download.files().iter().find(|f| f.filename() == "01.flac").unwrap();
        assert_eq!(file1.status(), TransferStatus::Completed);
        let file2 = download.files().iter().find(|f| f.filename() == "02.flac").unwrap();
        assert_eq!(file2.status(), TransferStatus::Downloading);
        assert_eq!(file2.bytes_read(), 500);

        let both_completed = vec![
            TransferEvent { username: "u".to_string(), filename: "01.flac".to_string(), state: "Completed".to_string(), bytes_transferred: 1000 },
            TransferEvent { username: "u".to_string(), filename: "02.flac".to_string(), state: "Completed".to_string(), bytes_transferred: 2000 },
        ];

        let touched = reconcile(&store, &both_completed, now).await.unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].status(), TransferStatus::Completed);
    }

    #[tokio::test]
    async fn verify_on_disk_promotes_exact_size_match_and_strips_slskd_prefix() {
        let store = Store::open_in_memory().await.unwrap();
        let downloads_repo = SqliteDownloadsRepository::new();
        let now = chrono::Local::now().naive_local();

        let mut conn = store.pool().acquire().await.unwrap();
        downloads_repo
            .create(
                &mut conn,
                Uuid::new_v4(),
                Uuid::new_v4(),
                "Artist",
                "Album",
                Some(2020),
                "u",
                "@@u\\Music\\X",
                &[("track.flac".to_string(), 2048)],
                now,
            )
            .await
            .unwrap();
        drop(conn);

        let tmp = tempfile::tempdir().unwrap();
        let album_dir = tmp.path().join("X");
        std::fs::create_dir_all(&album_dir).unwrap();
        std::fs::write(album_dir.join("track.flac"), vec![0u8; 2048]).unwrap();

        let touched = verify_on_disk(&store, tmp.path(), now).await.unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].status(), TransferStatus::Completed);
        assert!(touched[0].files()[0].verified_on_disk());
    }
}
