use std::path::PathBuf;
use chrono::NaiveDateTime;

use crate::utils::normalizations::normalize_path;

use super::{ValidationError, Serialize, Deserialize};

/// One audio file discovered under a configured source, with its tags.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Track {
    id: i64,
    path: PathBuf,
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
    added_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl AsRef<Track> for Track {
    fn as_ref(&self) -> &Track {
        self
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Track {}

/// Fields read off a file during a scan; not yet assigned an id or timestamps.
#[derive(Clone, Debug)]
pub struct TrackDraft {
    pub path: PathBuf,
    pub mtime: i64,
    pub artist: String,
    pub album_artist: Option<String>,
    pub album: String,
    pub title: String,
    pub disc_number: Option<i64>,
    pub track_number: Option<i64>,
    pub year: Option<i64>,
    pub genre: Option<String>,
    pub original_date: Option<String>,
    pub release_date: Option<String>,
    pub label: Option<String>,
}

impl TrackDraft {
    /// Returns `None` when the draft would produce an empty artist or album — such a
    /// file is silently skipped and produces no track (spec: Track invariants).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.artist.trim().is_empty() {
            return Err(ValidationError::ArtistIsEmptyString);
        }
        if self.album.trim().is_empty() {
            return Err(ValidationError::AlbumIsEmptyString);
        }
        Ok(())
    }

    pub fn album_artist_or_default(&self) -> &str {
        self.album_artist.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or(&self.artist)
    }
}

impl Track {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i64,
        path: PathBuf,
        mtime: i64,
        artist: String,
        album_artist: Option<String>,
        album: String,
        title: String,
        disc_number: Option<i64>,
        track_number: Option<i64>,
        year: Option<i64>,
        genre: Option<String>,
        original_date: Option<String>,
        release_date: Option<String>,
        label: Option<String>,
        added_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> Result<Self, ValidationError> {
        if path.as_os_str().is_empty() {
            return Err(ValidationError::PathIsEmptyString);
        }
        if artist.trim().is_empty() {
            return Err(ValidationError::ArtistIsEmptyString);
        }
        if album.trim().is_empty() {
            return Err(ValidationError::AlbumIsEmptyString);
        }

        let album_artist = album_artist.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| artist.clone());

        Ok(Self {
            id,
            path: normalize_path(&path),
            mtime,
            artist,
            album_artist,
            album,
            title,
            disc_number,
            track_number,
            year,
            genre,
            original_date,
            release_date,
            label,
            added_at,
            updated_at,
        })
    }

    pub fn id(&self) -> i64 { self.id }
    pub fn path(&self) -> &PathBuf { &self.path }
    pub fn mtime(&self) -> i64 { self.mtime }
    pub fn artist(&self) -> &str { &self.artist }
    pub fn album_artist(&self) -> &str { &self.album_artist }
    pub fn album(&self) -> &str { &self.album }
    pub fn title(&self) -> &str { &self.title }
    pub fn disc_number(&self) -> Option<i64> { self.disc_number }
    pub fn track_number(&self) -> Option<i64> { self.track_number }
    pub fn year(&self) -> Option<i64> { self.year }
    pub fn genre(&self) -> Option<&str> { self.genre.as_deref() }
    pub fn original_date(&self) -> Option<&str> { self.original_date.as_deref() }
    pub fn release_date(&self) -> Option<&str> { self.release_date.as_deref() }
    pub fn label(&self) -> Option<&str> { self.label.as_deref() }
    pub fn added_at(&self) -> NaiveDateTime { self.added_at }
    pub fn updated_at(&self) -> NaiveDateTime { self.updated_at }
}
