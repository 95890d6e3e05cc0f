//! Core data model: §3 of the specification.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::EnumString;

/// A song's file path, relative to the music directory — its stable
/// identity in the daemon's database.
pub type SongRef = Utf8PathBuf;

/// The four tags the query language filters and modifiers treat as
/// "always available" (memoized by `MusicIndex::all_tags`). Empty string
/// means "tag present but empty"; a tag genuinely missing from the daemon's
/// response is also normalized to `""` here, so `TagRecord` cannot
/// distinguish the two — only `CollectionStore::add_songs`'s
/// all-tags-present check treats `""` as "missing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub track: String,
}

impl TagRecord {
    /// The `all-tags-present` predicate `CollectionStore::add_songs` uses
    /// to reject songs missing any of the four core tags.
    pub fn all_present(&self) -> bool {
        !self.artist.is_empty()
            && !self.album.is_empty()
            && !self.title.is_empty()
            && !self.track.is_empty()
    }

    pub fn as_tuple(&self) -> (&str, &str, &str, &str) {
        (&self.artist, &self.album, &self.title, &self.track)
    }
}

/// What kind of thing a [`Collection`] is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, EnumString
)]
#[strum(serialize_all = "snake_case")]
pub enum CollectionKind {
    User,
    StoredPlaylist,
}

/// A single named collection, as held in `CollectionStore`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub sort: bool,
    pub special: bool,
    pub stored_playlist: bool,
    pub expression: Option<String>,
    pub command: Option<String>,
    pub songs: Option<Vec<SongRef>>,
}

impl Collection {
    pub fn kind(&self) -> CollectionKind {
        if self.stored_playlist {
            CollectionKind::StoredPlaylist
        } else {
            CollectionKind::User
        }
    }
}
