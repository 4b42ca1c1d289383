use super::{Serialize, Deserialize};

/// An abstract (filter, display) pair that every C4 consumer is expressed in terms of.
/// Concrete catalogue entities (artist/album/track), downloads, and filesystem entries
/// all project down into this shape before being handed to the trigram matcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub filter: String,
    pub display: String,
}

impl SearchItem {
    pub fn new(filter: impl Into<String>, display: impl Into<String>) -> Self {
        Self { filter: filter.into(), display: display.into() }
    }
}
