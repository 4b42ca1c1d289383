use chrono::NaiveDateTime;
use uuid::Uuid;

use super::{Serialize, Deserialize};

/// Per-file and per-download state, shared vocabulary for both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Downloading => "downloading",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "downloading" => TransferStatus::Downloading,
            "completed" => TransferStatus::Completed,
            "failed" => TransferStatus::Failed,
            _ => TransferStatus::Pending,
        }
    }
}

/// One expected file belonging to a download.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadFile {
    id: i64,
    download_id: i64,
    filename: String,
    size: u64,
    status: TransferStatus,
    bytes_read: u64,
    verified_on_disk: bool,
}

impl DownloadFile {
    pub fn new(id: i64, download_id: i64, filename: String, size: u64) -> Self {
        Self {
            id,
            download_id,
            filename,
            size,
            status: TransferStatus::Pending,
            bytes_read: 0,
            verified_on_disk: false,
        }
    }

    pub fn id(&self) -> i64 { self.id }
    pub fn download_id(&self) -> i64 { self.download_id }
    pub fn filename(&self) -> &str { &self.filename }
    pub fn size(&self) -> u64 { self.size }
    pub fn status(&self) -> TransferStatus { self.status }
    pub fn bytes_read(&self) -> u64 { self.bytes_read }
    pub fn verified_on_disk(&self) -> bool { self.verified_on_disk }

    pub fn set_status(&mut self, status: TransferStatus) { self.status = status; }
    pub fn set_bytes_read(&mut self, bytes_read: u64) { self.bytes_read = bytes_read; }
    pub fn set_verified_on_disk(&mut self, verified: bool) { self.verified_on_disk = verified; }
}

/// An album-level download job joining transfer-daemon progress with catalogue metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Download {
    id: i64,
    release_group_id: Uuid,
    release_id: Uuid,
    artist: String,
    album: String,
    year: Option<i64>,
    username: String,
    remote_directory: String,
    status: TransferStatus,
    imported_paths: Vec<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    files: Vec<DownloadFile>,
}

impl Download {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i64,
        release_group_id: Uuid,
        release_id: Uuid,
        artist: String,
        album: String,
        year: Option<i64>,
        username: String,
        remote_directory: String,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime,
        files: Vec<DownloadFile>,
    ) -> Self {
        Self {
            id,
            release_group_id,
            release_id,
            artist,
            album,
            year,
            username,
            remote_directory,
            status: TransferStatus::Pending,
            imported_paths: Vec::new(),
            created_at,
            updated_at,
            files,
        }
    }

    pub fn id(&self) -> i64 { self.id }
    pub fn release_group_id(&self) -> Uuid { self.release_group_id }
    pub fn release_id(&self) -> Uuid { self.release_id }
    pub fn artist(&self) -> &str { &self.artist }
    pub fn album(&self) -> &str { &self.album }
    pub fn year(&self) -> Option<i64> { self.year }
    pub fn username(&self) -> &str { &self.username }
    pub fn remote_directory(&self) -> &str { &self.remote_directory }
    pub fn status(&self) -> TransferStatus { self.status }
    pub fn imported_paths(&self) -> &[String] { &self.imported_paths }
    pub fn created_at(&self) -> NaiveDateTime { self.created_at }
    pub fn updated_at(&self) -> NaiveDateTime { self.updated_at }
    pub fn files(&self) -> &[DownloadFile] { &self.files }
    pub fn files_mut(&mut self) -> &mut Vec<DownloadFile> { &mut self.files }

    pub fn push_imported_path(&mut self, path: String) {
        self.imported_paths.push(path);
    }

    pub fn set_status(&mut self, status: TransferStatus, updated_at: NaiveDateTime) {
        self.status = status;
        self.updated_at = updated_at;
    }

    /// Pure function of the download's files (spec §4.5):
    /// completed iff every file is completed and at least one exists; failed iff at least
    /// one file failed and none are still downloading; downloading iff any file is
    /// downloading or completed but the whole is not complete; pending otherwise.
    pub fn aggregate_status(&self) -> TransferStatus {
        if self.files.is_empty() {
            return TransferStatus::Pending;
        }

        let all_completed = self.files.iter().all(|f| f.status() == TransferStatus::Completed);
        if all_completed {
            return TransferStatus::Completed;
        }

        let any_failed = self.files.iter().any(|f| f.status() == TransferStatus::Failed);
        let still_downloading = self.files.iter().any(|f| f.status() == TransferStatus::Downloading);

        if any_failed && !still_downloading {
            return TransferStatus::Failed;
        }

        let any_progress = self.files.iter()
            .any(|f| matches!(f.status(), TransferStatus::Downloading | TransferStatus::Completed));

        if any_progress {
            return TransferStatus::Downloading;
        }

        TransferStatus::Pending
    }

    /// Extracts the on-disk completed-root folder name from a remote directory string:
    /// normalise backslashes to forward slashes, strip a leading `@@`, take the last
    /// path component (spec §4.5 verify-on-disk).
    pub fn completed_folder_name(&self) -> String {
        folder_from_remote_directory(&self.remote_directory)
    }
}

pub fn folder_from_remote_directory(remote_directory: &str) -> String {
    let normalized = remote_directory.replace('\\', "/");
    let stripped = normalized.strip_prefix("@@").unwrap_or(&normalized);
    stripped
        .split('/')
        .filter(|segment| !segment.is_empty())
        .last()
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_from_remote_directory_strips_prefix_and_backslashes() {
        assert_eq!(folder_from_remote_directory(r"@@u\Music\X"), "X");
        assert_eq!(folder_from_remote_directory("u/Music/X"), "X");
    }

    fn file(status: TransferStatus) -> DownloadFile {
        let mut f = DownloadFile::new(1, 1, "a.flac".into(), 10);
        f.set_status(status);
        f
    }

    #[test]
    fn aggregate_status_all_completed() {
        let mut d = Download::new(
            1, Uuid::nil(), Uuid::nil(), "a".into(), "b".into(), None,
            "u".into(), "dir".into(),
            chrono::Local::now().naive_local(), chrono::Local::now().naive_local(),
            vec![file(TransferStatus::Completed), file(TransferStatus::Completed)],
        );
        d.set_status(d.aggregate_status(), chrono::Local::now().naive_local());
        assert_eq!(d.status(), TransferStatus::Completed);
    }

    #[test]
    fn aggregate_status_failed_when_no_downloading() {
        let files = vec![file(TransferStatus::Failed), file(TransferStatus::Completed)];
        let d = Download::new(
            1, Uuid::nil(), Uuid::nil(), "a".into(), "b".into(), None,
            "u".into(), "dir".into(),
            chrono::Local::now().naive_local(), chrono::Local::now().naive_local(),
            files,
        );
        assert_eq!(d.aggregate_status(), TransferStatus::Failed);
    }

    #[test]
    fn aggregate_status_downloading_when_mixed() {
        let files = vec![file(TransferStatus::Downloading), file(TransferStatus::Pending)];
        let d = Download::new(
            1, Uuid::nil(), Uuid::nil(), "a".into(), "b".into(), None,
            "u".into(), "dir".into(),
            chrono::Local::now().naive_local(), chrono::Local::now().naive_local(),
            files,
        );
        assert_eq!(d.aggregate_status(), TransferStatus::Downloading);
    }
}
