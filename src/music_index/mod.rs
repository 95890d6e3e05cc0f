//! §6a Minimal MPD wire client and the `MusicIndex` façade built on top of
//! it.
//!
//! The operation surface is grounded on the original `mpdc/libs/mpdhelper.py`
//! `MPDHelper` class; the wire format itself is grounded on the teacher's
//! `src/mpd_protocol/response_format.rs` (same `key: value` line shape,
//! read from the client side here instead of written from the server
//! side).

pub mod mpd_wire;

use std::cell::RefCell;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use color_eyre::Result;
use color_eyre::eyre::Context;
use indexmap::IndexMap;

use crate::cache::{Cache, is_stale};
use crate::model::{SongRef, TagRecord};
use crate::ordered_set::OrderedSet;
use mpd_wire::{MpdConnection, build_tag_command};

/// Snapshot of `stats`: used as the freshness beacon for the `all_tags`
/// cache, mirroring the original's reliance on the daemon's own notion of
/// "has the database changed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub songs: u64,
    pub db_update: u64,
}

/// Everything the query language's evaluator needs from a running MPD
/// instance, plus the playlist/queue mutation operations the CLI's `add`
/// and collection-sync commands drive. A trait so tests can swap in
/// `FakeMusicIndex` instead of a live daemon.
pub trait MusicIndex {
    fn stats(&self) -> Result<Stats>;
    fn all_songs(&self) -> Result<Vec<SongRef>>;
    /// Every song's core four tags, memoized against `stats().db_update`.
    fn all_tags(&self) -> Result<IndexMap<SongRef, TagRecord>>;
    fn get_tag(&self, song: &SongRef, field: &str) -> Result<String>;

    fn search_multiple(&self, fields: &[(&str, &str)]) -> Result<Vec<SongRef>>;
    fn find_multiple(&self, fields: &[(&str, &str)]) -> Result<Vec<SongRef>>;
    fn search(&self, field: &str, pattern: &str) -> Result<Vec<SongRef>> {
        self.search_multiple(&[(field, pattern)])
    }
    fn find(&self, field: &str, pattern: &str) -> Result<Vec<SongRef>> {
        self.find_multiple(&[(field, pattern)])
    }

    fn list_artists(&self) -> Result<Vec<String>>;
    fn list_albums(&self) -> Result<Vec<(String, String)>>;

    fn stored_playlists(&self) -> Result<Vec<String>>;
    /// `(name, last-modified)` pairs, used by `CollectionsManager::feed`
    /// to decide which native MPD playlists changed since the last sync.
    fn stored_playlists_info(&self) -> Result<Vec<(String, String)>>;
    fn stored_playlist_songs(&self, name: &str) -> Result<Vec<SongRef>>;
    fn add_songs_to_stored_playlist(&self, name: &str, songs: &[SongRef]) -> Result<()>;
    fn clear_stored_playlist(&self, name: &str) -> Result<()>;

    /// Sort a set of songs by (artist, album, track, title), the order the
    /// original's `mpd.sort` imposes before queueing a `sort`-flagged
    /// collection.
    fn sort(&self, songs: &OrderedSet<SongRef>) -> Result<Vec<SongRef>>;

    fn queue_songs(&self) -> Result<Vec<SongRef>>;
    fn queue_replace(&self, songs: &[SongRef]) -> Result<()>;
    fn queue_add(&self, songs: &[SongRef]) -> Result<()>;
    fn queue_insert(&self, songs: &[SongRef]) -> Result<()>;
    fn queue_remove(&self, songs: &[SongRef]) -> Result<()>;
    fn queue_clear(&self) -> Result<()>;
    fn queue_crop(&self) -> Result<()>;
    fn play(&self, position: usize) -> Result<()>;
    fn play_file(&self, song: &SongRef) -> Result<()>;
    fn current_song(&self) -> Result<Option<SongRef>>;

    /// Force the daemon to rescan the music directory and invalidate the
    /// `all_tags` memoization.
    fn update_cache(&self) -> Result<()>;
}

/// A `MusicIndex` backed by a live MPD daemon over `mpd_wire`, with the
/// `all_tags` scan memoized on disk and invalidated by `stats().db_update`.
pub struct MpdMusicIndex<C: Cache> {
    host: String,
    port: u16,
    password: Option<String>,
    conn: Mutex<RefCell<Option<MpdConnection>>>,
    cache: C,
}

impl<C: Cache> MpdMusicIndex<C> {
    pub fn new(host: impl Into<String>, port: u16, password: Option<String>, cache: C) -> Self {
        Self {
            host: host.into(),
            port,
            password,
            conn: Mutex::new(RefCell::new(None)),
            cache,
        }
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut MpdConnection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().expect("mpd connection mutex poisoned");
        let mut slot = guard.borrow_mut();
        if slot.is_none() {
            *slot = Some(
                MpdConnection::connect(&self.host, self.port, self.password.as_deref())
                    .wrap_err("connecting to mpd")?,
            );
        }
        f(slot.as_mut().expect("just populated"))
    }

    fn records_to_songs(records: Vec<IndexMap<String, String>>) -> Vec<SongRef> {
        records
            .into_iter()
            .filter_map(|r| r.get("file").map(Utf8PathBuf::from))
            .collect()
    }

    fn record_to_tags(record: &IndexMap<String, String>) -> TagRecord {
        TagRecord {
            artist: record.get("Artist").cloned().unwrap_or_default(),
            album: record.get("Album").cloned().unwrap_or_default(),
            title: record.get("Title").cloned().unwrap_or_default(),
            track: record.get("Track").cloned().unwrap_or_default(),
        }
    }
}

const ALL_TAGS_CACHE_KEY: &str = "songs_tags";

impl<C: Cache> MusicIndex for MpdMusicIndex<C> {
    fn stats(&self) -> Result<Stats> {
        self.with_connection(|conn| {
            let pairs = conn.command_pairs("stats")?;
            let songs = pairs.get("songs").and_then(|v| v.parse().ok()).unwrap_or(0);
            let db_update = pairs
                .get("db_update")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            Ok(Stats { songs, db_update })
        })
    }

    fn all_songs(&self) -> Result<Vec<SongRef>> {
        self.with_connection(|conn| {
            let records = conn.command_records("listall", "file")?;
            Ok(Self::records_to_songs(records))
        })
    }

    fn all_tags(&self) -> Result<IndexMap<SongRef, TagRecord>> {
        let stats = self.stats()?;
        let probe = std::time::UNIX_EPOCH + std::time::Duration::from_secs(stats.db_update);

        if !is_stale(&self.cache, ALL_TAGS_CACHE_KEY, probe) {
            if let Some(cached) = self.cache.read(ALL_TAGS_CACHE_KEY) {
                return Ok(cached);
            }
        }

        if let Ok(updated_at) = jiff::Timestamp::new(stats.db_update as i64, 0) {
            crate::info!("rebuilding song/tag cache (library last updated {updated_at})");
        }

        let tags: IndexMap<SongRef, TagRecord> = self.with_connection(|conn| {
            let records = conn.command_records("listallinfo", "file")?;
            let mut map = IndexMap::new();
            for record in &records {
                if let Some(file) = record.get("file") {
                    map.insert(Utf8PathBuf::from(file), Self::record_to_tags(record));
                }
            }
            Ok(map)
        })?;

        self.cache.write(ALL_TAGS_CACHE_KEY, &tags);
        Ok(tags)
    }

    fn get_tag(&self, song: &SongRef, field: &str) -> Result<String> {
        let tags = self.all_tags()?;
        let record = tags.get(song);
        Ok(match (record, field) {
            (Some(r), "artist") => r.artist.clone(),
            (Some(r), "album") => r.album.clone(),
            (Some(r), "title") => r.title.clone(),
            (Some(r), "track") => r.track.clone(),
            _ => String::new(),
        })
    }

    fn search_multiple(&self, fields: &[(&str, &str)]) -> Result<Vec<SongRef>> {
        self.with_connection(|conn| {
            let cmd = build_tag_command("search", fields);
            let records = conn.command_records(&cmd, "file")?;
            Ok(Self::records_to_songs(records))
        })
    }

    fn find_multiple(&self, fields: &[(&str, &str)]) -> Result<Vec<SongRef>> {
        self.with_connection(|conn| {
            let cmd = build_tag_command("find", fields);
            let records = conn.command_records(&cmd, "file")?;
            Ok(Self::records_to_songs(records))
        })
    }

    fn list_artists(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let lines = conn.command("list artist")?;
            Ok(lines
                .into_iter()
                .filter_map(|l| l.strip_prefix("Artist: ").map(str::to_string))
                .collect())
        })
    }

    fn list_albums(&self) -> Result<Vec<(String, String)>> {
        self.with_connection(|conn| {
            let records = conn.command_records("list album group albumartist", "Album")?;
            Ok(records
                .into_iter()
                .filter_map(|r| {
                    let album = r.get("Album")?.clone();
                    let artist = r.get("AlbumArtist").cloned().unwrap_or_default();
                    Some((album, artist))
                })
                .collect())
        })
    }

    fn stored_playlists(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let records = conn.command_records("listplaylists", "playlist")?;
            Ok(records
                .into_iter()
                .filter_map(|r| r.get("playlist").cloned())
                .collect())
        })
    }

    fn stored_playlists_info(&self) -> Result<Vec<(String, String)>> {
        self.with_connection(|conn| {
            let records = conn.command_records("listplaylists", "playlist")?;
            Ok(records
                .into_iter()
                .filter_map(|r| {
                    let name = r.get("playlist")?.clone();
                    let modified = r.get("Last-Modified").cloned().unwrap_or_default();
                    Some((name, modified))
                })
                .collect())
        })
    }

    fn stored_playlist_songs(&self, name: &str) -> Result<Vec<SongRef>> {
        self.with_connection(|conn| {
            let cmd = format!("listplaylistinfo {}", mpd_wire::quote(name));
            let records = conn.command_records(&cmd, "file")?;
            Ok(Self::records_to_songs(records))
        })
    }

    fn add_songs_to_stored_playlist(&self, name: &str, songs: &[SongRef]) -> Result<()> {
        self.with_connection(|conn| {
            for song in songs {
                let cmd = format!(
                    "playlistadd {} {}",
                    mpd_wire::quote(name),
                    mpd_wire::quote(song.as_str())
                );
                conn.command(&cmd)?;
            }
            Ok(())
        })
    }

    fn clear_stored_playlist(&self, name: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.command(&format!("playlistclear {}", mpd_wire::quote(name)))?;
            Ok(())
        })
    }

    fn sort(&self, songs: &OrderedSet<SongRef>) -> Result<Vec<SongRef>> {
        let tags = self.all_tags()?;
        let mut sorted: Vec<SongRef> = songs.iter().cloned().collect();
        sorted.sort_by(|a, b| {
            let empty = TagRecord::default();
            let ta = tags.get(a).unwrap_or(&empty);
            let tb = tags.get(b).unwrap_or(&empty);
            (&ta.artist, &ta.album, &ta.track, &ta.title)
                .cmp(&(&tb.artist, &tb.album, &tb.track, &tb.title))
        });
        Ok(sorted)
    }

    fn queue_songs(&self) -> Result<Vec<SongRef>> {
        self.with_connection(|conn| {
            let records = conn.command_records("playlistinfo", "file")?;
            Ok(Self::records_to_songs(records))
        })
    }

    fn queue_replace(&self, songs: &[SongRef]) -> Result<()> {
        self.queue_clear()?;
        self.queue_add(songs)
    }

    fn queue_add(&self, songs: &[SongRef]) -> Result<()> {
        self.with_connection(|conn| {
            for song in songs {
                conn.command(&format!("add {}", mpd_wire::quote(song.as_str())))?;
            }
            Ok(())
        })
    }

    fn queue_insert(&self, songs: &[SongRef]) -> Result<()> {
        self.with_connection(|conn| {
            for song in songs {
                conn.command(&format!("addid {} 0", mpd_wire::quote(song.as_str())))?;
            }
            Ok(())
        })
    }

    fn queue_remove(&self, songs: &[SongRef]) -> Result<()> {
        let queued = self.queue_songs()?;
        self.with_connection(|conn| {
            for song in songs {
                if let Some(pos) = queued.iter().position(|q| q == song) {
                    conn.command(&format!("delete {pos}"))?;
                }
            }
            Ok(())
        })
    }

    fn queue_clear(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.command("clear")?;
            Ok(())
        })
    }

    fn queue_crop(&self) -> Result<()> {
        let songs = self.queue_songs()?;
        let current = self.current_song()?;
        self.with_connection(|conn| {
            for (pos, song) in songs.iter().enumerate().rev() {
                if Some(song) != current.as_ref() {
                    conn.command(&format!("delete {pos}"))?;
                }
            }
            Ok(())
        })
    }

    fn play(&self, position: usize) -> Result<()> {
        self.with_connection(|conn| {
            conn.command(&format!("play {position}"))?;
            Ok(())
        })
    }

    fn play_file(&self, song: &SongRef) -> Result<()> {
        self.with_connection(|conn| {
            conn.command("clear")?;
            conn.command(&format!("add {}", mpd_wire::quote(song.as_str())))?;
            conn.command("play 0")?;
            Ok(())
        })
    }

    fn current_song(&self) -> Result<Option<SongRef>> {
        self.with_connection(|conn| {
            let pairs = conn.command_pairs("currentsong")?;
            Ok(pairs.get("file").map(Utf8PathBuf::from))
        })
    }

    fn update_cache(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.command("update")?;
            Ok(())
        })
    }
}

#[cfg(test)]
pub mod fake {
    //! An in-memory `MusicIndex`, built from the spec's X/Y/Z fixture
    //! library, for deterministic query-language tests.

    use super::*;
    use std::cell::RefCell as Cell;

    pub struct FakeMusicIndex {
        pub songs: IndexMap<SongRef, TagRecord>,
        /// Tags outside the core four (genre, date, time, albumartist, ...),
        /// the way `MpdMusicIndex::get_tag` would query the daemon for them
        /// directly instead of serving them from the memoized map.
        pub extra: IndexMap<SongRef, IndexMap<String, String>>,
        pub playlists: Cell<IndexMap<String, Vec<SongRef>>>,
        pub queue: Cell<Vec<SongRef>>,
        pub db_update: u64,
    }

    impl FakeMusicIndex {
        /// X: Artist A / Album L / track 1, Y: Artist A / Album L / track 2,
        /// Z: Artist B / Album M / track 1.
        pub fn library() -> Self {
            let mut songs = IndexMap::new();
            songs.insert(
                SongRef::from("X.mp3"),
                TagRecord {
                    artist: "A".into(),
                    album: "L".into(),
                    title: "X".into(),
                    track: "1".into(),
                },
            );
            songs.insert(
                SongRef::from("Y.mp3"),
                TagRecord {
                    artist: "A".into(),
                    album: "L".into(),
                    title: "Y".into(),
                    track: "2".into(),
                },
            );
            songs.insert(
                SongRef::from("Z.mp3"),
                TagRecord {
                    artist: "B".into(),
                    album: "M".into(),
                    title: "Z".into(),
                    track: "1".into(),
                },
            );
            Self {
                songs,
                extra: IndexMap::new(),
                playlists: Cell::new(IndexMap::new()),
                queue: Cell::new(Vec::new()),
                db_update: 1,
            }
        }

        /// Attach a non-core tag (e.g. `"time"`, `"albumartist"`) to a song,
        /// for tests that exercise modifiers beyond the core four tags.
        pub fn with_extra_tag(mut self, song: &SongRef, field: &str, value: &str) -> Self {
            self.extra
                .entry(song.clone())
                .or_default()
                .insert(field.to_string(), value.to_string());
            self
        }
    }

    impl MusicIndex for FakeMusicIndex {
        fn stats(&self) -> Result<Stats> {
            Ok(Stats {
                songs: self.songs.len() as u64,
                db_update: self.db_update,
            })
        }

        fn all_songs(&self) -> Result<Vec<SongRef>> {
            Ok(self.songs.keys().cloned().collect())
        }

        fn all_tags(&self) -> Result<IndexMap<SongRef, TagRecord>> {
            Ok(self.songs.clone())
        }

        fn get_tag(&self, song: &SongRef, field: &str) -> Result<String> {
            if let Some(value) = self.extra.get(song).and_then(|m| m.get(field)) {
                return Ok(value.clone());
            }
            let Some(tags) = self.songs.get(song) else {
                return Ok(String::new());
            };
            Ok(match field {
                "artist" => tags.artist.clone(),
                "album" => tags.album.clone(),
                "title" => tags.title.clone(),
                "track" => tags.track.clone(),
                _ => String::new(),
            })
        }

        fn search_multiple(&self, fields: &[(&str, &str)]) -> Result<Vec<SongRef>> {
            Ok(self
                .songs
                .iter()
                .filter(|(song, tags)| {
                    fields.iter().all(|(field, pattern)| {
                        self.field_value(song, tags, field)
                            .to_lowercase()
                            .contains(&pattern.to_lowercase())
                    })
                })
                .map(|(song, _)| song.clone())
                .collect())
        }

        fn find_multiple(&self, fields: &[(&str, &str)]) -> Result<Vec<SongRef>> {
            Ok(self
                .songs
                .iter()
                .filter(|(song, tags)| {
                    fields
                        .iter()
                        .all(|(field, pattern)| self.field_value(song, tags, field) == *pattern)
                })
                .map(|(song, _)| song.clone())
                .collect())
        }

        fn list_artists(&self) -> Result<Vec<String>> {
            let mut artists: Vec<String> =
                self.songs.values().map(|t| t.artist.clone()).collect();
            artists.sort();
            artists.dedup();
            Ok(artists)
        }

        fn list_albums(&self) -> Result<Vec<(String, String)>> {
            let mut albums: Vec<(String, String)> = self
                .songs
                .values()
                .map(|t| (t.album.clone(), t.artist.clone()))
                .collect();
            albums.sort();
            albums.dedup();
            Ok(albums)
        }

        fn stored_playlists(&self) -> Result<Vec<String>> {
            Ok(self.playlists.borrow().keys().cloned().collect())
        }

        fn stored_playlists_info(&self) -> Result<Vec<(String, String)>> {
            Ok(self
                .playlists
                .borrow()
                .keys()
                .map(|name| (name.clone(), "0".to_string()))
                .collect())
        }

        fn stored_playlist_songs(&self, name: &str) -> Result<Vec<SongRef>> {
            Ok(self
                .playlists
                .borrow()
                .get(name)
                .cloned()
                .unwrap_or_default())
        }

        fn add_songs_to_stored_playlist(&self, name: &str, songs: &[SongRef]) -> Result<()> {
            self.playlists
                .borrow_mut()
                .entry(name.to_string())
                .or_default()
                .extend(songs.iter().cloned());
            Ok(())
        }

        fn clear_stored_playlist(&self, name: &str) -> Result<()> {
            self.playlists
                .borrow_mut()
                .entry(name.to_string())
                .or_default()
                .clear();
            Ok(())
        }

        fn sort(&self, songs: &OrderedSet<SongRef>) -> Result<Vec<SongRef>> {
            let mut sorted: Vec<SongRef> = songs.iter().cloned().collect();
            let empty = TagRecord::default();
            sorted.sort_by(|a, b| {
                let ta = self.songs.get(a).unwrap_or(&empty);
                let tb = self.songs.get(b).unwrap_or(&empty);
                (&ta.artist, &ta.album, &ta.track, &ta.title)
                    .cmp(&(&tb.artist, &tb.album, &tb.track, &tb.title))
            });
            Ok(sorted)
        }

        fn queue_songs(&self) -> Result<Vec<SongRef>> {
            Ok(self.queue.borrow().clone())
        }

        fn queue_replace(&self, songs: &[SongRef]) -> Result<()> {
            *self.queue.borrow_mut() = songs.to_vec();
            Ok(())
        }

        fn queue_add(&self, songs: &[SongRef]) -> Result<()> {
            self.queue.borrow_mut().extend(songs.iter().cloned());
            Ok(())
        }

        fn queue_insert(&self, songs: &[SongRef]) -> Result<()> {
            let mut queue = self.queue.borrow_mut();
            for (i, song) in songs.iter().enumerate() {
                queue.insert(i, song.clone());
            }
            Ok(())
        }

        fn queue_remove(&self, songs: &[SongRef]) -> Result<()> {
            self.queue.borrow_mut().retain(|s| !songs.contains(s));
            Ok(())
        }

        fn queue_clear(&self) -> Result<()> {
            self.queue.borrow_mut().clear();
            Ok(())
        }

        fn queue_crop(&self) -> Result<()> {
            let first = self.queue.borrow().first().cloned();
            self.queue.borrow_mut().retain(|s| Some(s) == first.as_ref());
            Ok(())
        }

        fn play(&self, _position: usize) -> Result<()> {
            Ok(())
        }

        fn play_file(&self, song: &SongRef) -> Result<()> {
            *self.queue.borrow_mut() = vec![song.clone()];
            Ok(())
        }

        fn current_song(&self) -> Result<Option<SongRef>> {
            Ok(self.queue.borrow().first().cloned())
        }

        fn update_cache(&self) -> Result<()> {
            Ok(())
        }
    }

    impl FakeMusicIndex {
        fn field_value(&self, song: &SongRef, tags: &TagRecord, field: &str) -> String {
            if let Some(value) = self.extra.get(song).and_then(|m| m.get(field)) {
                return value.clone();
            }
            match field {
                "artist" => tags.artist.clone(),
                "album" => tags.album.clone(),
                "title" => tags.title.clone(),
                "track" => tags.track.clone(),
                _ => String::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeMusicIndex;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn find_is_exact_search_is_substring_case_insensitive() {
        let index = FakeMusicIndex::library();
        assert_eq!(index.find("artist", "A").unwrap().len(), 2);
        assert_eq!(index.search("artist", "a").unwrap().len(), 2);
        assert!(index.find("artist", "a").unwrap().is_empty());
    }

    #[test]
    fn sort_orders_by_artist_album_track_title() {
        let index = FakeMusicIndex::library();
        let set: OrderedSet<SongRef> = index.all_songs().unwrap().into_iter().collect();
        let sorted = index.sort(&set).unwrap();
        assert_eq!(
            sorted,
            vec![
                SongRef::from("X.mp3"),
                SongRef::from("Y.mp3"),
                SongRef::from("Z.mp3"),
            ]
        );
    }

    #[test]
    fn stored_playlist_round_trips_through_add_and_clear() {
        let index = FakeMusicIndex::library();
        index
            .add_songs_to_stored_playlist("fav", &[SongRef::from("X.mp3")])
            .unwrap();
        assert_eq!(
            index.stored_playlist_songs("fav").unwrap(),
            vec![SongRef::from("X.mp3")]
        );
        index.clear_stored_playlist("fav").unwrap();
        assert!(index.stored_playlist_songs("fav").unwrap().is_empty());
    }
}
