pub mod track;
pub mod source;
pub mod download;
pub mod search_item;
pub mod audiofile;
pub mod release;

use serde::{Serialize, Deserialize};
use thiserror;

use crate::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Path cannot be an empty string.")]
    PathIsEmptyString,

    #[error("Artist field cannot be an empty string.")]
    ArtistIsEmptyString,

    #[error("Album field cannot be an empty string.")]
    AlbumIsEmptyString,
}

/// Outcome of one item in a batch save/upsert.
#[derive(Debug)]
pub struct BatchSaveOutcome {
    pub batch_index: usize,
    pub result: Result<i64, RepositoryError>,
}

#[derive(Debug)]
pub struct BatchSaveReport {
    pub outcomes: Vec<BatchSaveOutcome>,
}

impl BatchSaveReport {
    pub fn new() -> Self {
        Self { outcomes: Vec::new() }
    }

    pub fn successful_ids(&self) -> Vec<i64> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok().copied())
            .collect()
    }

    pub fn failed(&self) -> Vec<&BatchSaveOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .collect()
    }
}

/// Per-source statistics emitted on the `done` scan progress event, relative paths only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

/// A node in the artist/album/track hierarchy, as handed to `CollectTrackIDs`
/// (spec §6.1): recursively resolves to the set of track ids it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryNode {
    Artist(String),
    Album { album_artist: String, album: String },
    Track(i64),
}
