use std::path::PathBuf;
use chrono::NaiveDateTime;

use super::{ValidationError, Serialize, Deserialize};

/// A root directory configured by the operator. Never nests another source.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Source {
    id: i64,
    path: PathBuf,
    added_at: NaiveDateTime,
}

impl Source {
    pub fn new(id: i64, path: PathBuf, added_at: NaiveDateTime) -> Result<Self, ValidationError> {
        if path.as_os_str().is_empty() {
            return Err(ValidationError::PathIsEmptyString);
        }

        Ok(Self { id, path, added_at })
    }

    pub fn id(&self) -> i64 { self.id }
    pub fn path(&self) -> &PathBuf { &self.path }
    pub fn added_at(&self) -> NaiveDateTime { self.added_at }

    /// True if `candidate` lives under this source, i.e. starts with exactly this prefix.
    pub fn contains(&self, candidate: &std::path::Path) -> bool {
        candidate.starts_with(&self.path)
    }
}
