use std::ffi::OsStr;

use lofty::file::FileType as LoftyFileType;
use lofty::{file::{AudioFile, TaggedFile, TaggedFileExt}, tag::{Accessor, ItemKey, Tag}};
use serde::{Serialize, Deserialize};

#[derive(Clone, Debug, PartialEq, Hash, Serialize, Deserialize)]
pub enum AudioFileType {
    Flac,
    Mp3,
    Wav,
    Ogg,
    M4a,
    Opus,
    Aac,
    Unknown
}

impl AudioFileType {

    pub fn from_lofty(lofty_type: &LoftyFileType) -> Self {
        match lofty_type {
            LoftyFileType::Flac => AudioFileType::Flac,
            LoftyFileType::Mpeg => AudioFileType::Mp3,
            LoftyFileType::Wav => AudioFileType::Wav,
            LoftyFileType::Vorbis | LoftyFileType::Speex => AudioFileType::Ogg,
            LoftyFileType::Mp4 => AudioFileType::M4a,
            LoftyFileType::Opus => AudioFileType::Opus,
            LoftyFileType::Aac => AudioFileType::Aac,
            _other => AudioFileType::Unknown,
        }
    }

    pub fn from_extension_str(extension: &str) -> Self {
        match extension {
            "flac" => AudioFileType::Flac,
            "mp3" => AudioFileType::Mp3,
            "wav" => AudioFileType::Wav,
            "ogg" => AudioFileType::Ogg,
            "m4a" => AudioFileType::M4a,
            "opus" => AudioFileType::Opus,
            "aac" => AudioFileType::Aac,
            _other => AudioFileType::Unknown
        }
    }

    pub fn from_os_ext(os_ext: &OsStr) -> Self {
        match os_ext.to_str() {
            Some(ext_str) => Self::from_extension_str(&ext_str.to_lowercase()),
            None => AudioFileType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFileType::Flac => "flac",
            AudioFileType::Mp3 => "mp3",
            AudioFileType::Wav => "wav",
            AudioFileType::Ogg => "ogg",
            AudioFileType::M4a => "m4a",
            AudioFileType::Opus => "opus",
            AudioFileType::Aac => "aac",
            AudioFileType::Unknown => "unknown"
        }
    }

    pub fn is_supported_extension(extension: &OsStr) -> bool {
        let ext_str = extension.to_string_lossy().to_lowercase();

        matches!(ext_str.as_str(), "flac" | "mp3" | "wav" | "ogg" | "m4a" | "opus" | "aac")
    }
}

/// Tags read off a file, trimmed but otherwise verbatim. `artist`/`album` being empty
/// after trimming is what makes a draft fail Track invariants downstream; this struct
/// itself never substitutes "unknown ..." placeholders, that is a rename-pipeline concern
/// (§6.3), not a scanner one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AudioFileMetadata {
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

impl AudioFileMetadata {
    pub fn extract_or_default(tagged_result: Result<TaggedFile, lofty::error::LoftyError>) -> Self {
        match tagged_result {
            Ok(tagged) => Self::from_tagged(&tagged),
            Err(err) => {
                log::warn!("Could not read tags, using default metadata. Reason: {}", err);
                Self::default()
            }
        }
    }

    pub fn from_tagged(tagged_file: &TaggedFile) -> Self {
        let Some(lofty_tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            return Self::default();
        };

        Self {
            artist: lofty_tag.artist().map(|s| s.trim().to_string()).unwrap_or_default(),
            album_artist: Self::get_string(lofty_tag, ItemKey::AlbumArtist),
            album: lofty_tag.album().map(|s| s.trim().to_string()).unwrap_or_default(),
            title: lofty_tag.title().map(|s| s.trim().to_string()).unwrap_or_default(),
            disc_number: lofty_tag.disk().map(|v| v as i64),
            track_number: lofty_tag.track().map(|v| v as i64),
            year: lofty_tag.year().map(|v| v as i64),
            genre: lofty_tag.genre().map(|s| s.trim().to_string()),
            original_date: Self::get_string(lofty_tag, ItemKey::OriginalReleaseDate),
            release_date: Self::get_string(lofty_tag, ItemKey::RecordingDate),
            label: Self::get_string(lofty_tag, ItemKey::Label),
        }
    }

    fn get_string(tag: &Tag, key: ItemKey) -> Option<String> {
        tag.get_string(&key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }
}

