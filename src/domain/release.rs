use uuid::Uuid;

use super::{Serialize, Deserialize};

/// Secondary MusicBrainz release-group types that get `[<type>]` appended to the
/// album folder/filename component (spec §6.3). Checked in this order; the first
/// match wins.
pub const COMPILATION_LIKE_TYPES: &[&str] =
    &["soundtrack", "audiobook", "mixtape/street", "compilation", "ep"];

/// Secondary types that get `[<type>]` appended to the title component instead.
pub const TITLE_ANNOTATION_TYPES: &[&str] =
    &["live", "broadcast", "spokenword", "interview", "remix", "dj-mix"];

/// The sentinel album name that suppresses the album/track-number segments of a
/// rendered filename for a singles-type release (spec §6.3).
pub const SINGLES_ALBUM: &str = "[singles]";

/// Authoritative album-level metadata resolved externally (MusicBrainz client is
/// a non-goal, §1) and handed to the import pipeline for re-tagging (§4.5) and
/// filesystem rename resolution (§6.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    pub release_group_id: Uuid,
    pub release_id: Uuid,
    pub album_artist: String,
    pub album: String,
    /// Release year, as a plain 4-digit number — distinct from the `date`/`original_date`
    /// full strings used for precision-aware year resolution (§8 `BestDate`).
    pub year: Option<i64>,
    pub date: Option<String>,
    pub original_date: Option<String>,
    pub label: Option<String>,
    pub catalog_number: Option<String>,
    pub barcode: Option<String>,
    pub media: Option<String>,
    pub country: Option<String>,
    pub script: Option<String>,
    pub release_type_primary: Option<String>,
    pub secondary_types: Vec<String>,
    pub total_discs: i64,
}

impl ReleaseMetadata {
    pub fn is_various_artists(&self) -> bool {
        self.album_artist.eq_ignore_ascii_case("Various Artists")
    }

    pub fn has_secondary_type(&self, needle: &str) -> bool {
        self.secondary_types.iter().any(|t| t.eq_ignore_ascii_case(needle))
    }

    /// A release is a singles release iff its type names `single` and its album is
    /// the `[singles]` sentinel (spec §6.3 "Singles handling").
    pub fn is_singles(&self) -> bool {
        self.album == SINGLES_ALBUM
            && (self.has_secondary_type("single")
                || self.release_type_primary.as_deref().is_some_and(|p| p.eq_ignore_ascii_case("single")))
    }

    /// First matching compilation-like secondary type, per `COMPILATION_LIKE_TYPES`
    /// priority order, suppressing `compilation` specifically for Various Artists
    /// releases (spec §6.3).
    pub fn compilation_annotation(&self) -> Option<&'static str> {
        COMPILATION_LIKE_TYPES.iter().find(|&&t| {
            if t == "compilation" && self.is_various_artists() {
                return false;
            }
            self.has_secondary_type(t)
        }).copied()
    }

    /// First matching title-annotation secondary type, per `TITLE_ANNOTATION_TYPES`
    /// priority order (spec §6.3).
    pub fn title_annotation(&self) -> Option<&'static str> {
        TITLE_ANNOTATION_TYPES.iter().find(|&&t| self.has_secondary_type(t)).copied()
    }
}

/// One track's authoritative metadata within a release (spec §4.5 re-tag, §6.3 rename).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReleaseTrackMetadata {
    pub title: String,
    /// Per-track artist; may differ from `ReleaseMetadata::album_artist` (a featured
    /// guest, a various-artists compilation track).
    pub artist: String,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
}
