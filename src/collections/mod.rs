//! §4.2–4.4 Collections: named, persisted expressions/song lists, plus
//! native MPD stored playlists merged in as read-only collections.
//!
//! Grounded on the original `mpdc/libs/collectionsmanager.py`: same raw
//! file grammar (`--name` / `--@name` sorted / `--#name` special headers,
//! `command:` and `songs:` body fields, tag-tuple song lines), same
//! cache-first `feed`, same collision handling when a native MPD playlist
//! shares a name with a user collection.

use camino::Utf8PathBuf;
use color_eyre::Result;
use color_eyre::eyre::Context;
use indexmap::IndexMap;

use crate::cache::Cache;
use crate::model::{Collection, SongRef, TagRecord};
use crate::music_index::MusicIndex;

const CACHE_KEY: &str = "collections";

pub struct CollectionStore {
    path: Utf8PathBuf,
    collections: IndexMap<String, Collection>,
    /// Set by any mutation (`add_songs`, `remove_songs`), consumed by the
    /// CLI at shutdown to decide whether `write_file` is needed. Per §3's
    /// ownership note: CollectionStore exclusively owns this flag.
    needs_write: bool,
}

impl CollectionStore {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            collections: IndexMap::new(),
            needs_write: false,
        }
    }

    pub fn get(&self, alias: &str) -> Option<&Collection> {
        self.collections.get(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Collection)> {
        self.collections.iter()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.collections.contains_key(alias)
    }

    /// Read and reset the `needs_write` flag a mutation set.
    pub fn take_needs_write(&mut self) -> bool {
        std::mem::take(&mut self.needs_write)
    }

    #[cfg(test)]
    pub fn set_for_test(&mut self, alias: &str, collection: Collection) {
        self.collections.insert(alias.to_string(), collection);
    }

    /// Load from cache unless `force`, in which case re-parse the raw file
    /// and re-merge native MPD playlists.
    pub fn feed(
        &mut self,
        cache: &impl Cache,
        index: &impl MusicIndex,
        force: bool,
    ) -> Result<()> {
        if !force {
            if let Some(cached) = cache.read(CACHE_KEY) {
                self.collections = cached;
                return Ok(());
            }
        }
        let raw = std::fs::read_to_string(&self.path)
            .wrap_err_with(|| format!("reading collections file {}", self.path))?;
        self.collections = raw_to_optimized(&raw, index)?;
        Ok(())
    }

    /// Add songs to a collection, rejecting any missing the four core
    /// tags. Creates the collection if it doesn't exist. Mirrors native
    /// MPD playlists through to the daemon too.
    pub fn add_songs(
        &mut self,
        alias: &str,
        songs: &[SongRef],
        index: &impl MusicIndex,
    ) -> Result<()> {
        let mut accepted = Vec::with_capacity(songs.len());
        for song in songs {
            let tags = TagRecord {
                artist: index.get_tag(song, "artist")?,
                album: index.get_tag(song, "album")?,
                title: index.get_tag(song, "title")?,
                track: index.get_tag(song, "track")?,
            };
            if tags.all_present() {
                accepted.push(song.clone());
            } else {
                crate::warning!("[{song}] was not added (missing tags)");
            }
        }

        if let Some(collection) = self.collections.get_mut(alias) {
            collection.songs.get_or_insert_with(Vec::new).extend(accepted.iter().cloned());
            if collection.stored_playlist {
                index.add_songs_to_stored_playlist(alias, &accepted)?;
            }
        } else {
            crate::info!("Collection [{alias}] will be created");
            self.collections.insert(
                alias.to_string(),
                Collection {
                    songs: Some(accepted),
                    ..Default::default()
                },
            );
        }
        self.needs_write = true;
        Ok(())
    }

    /// Remove songs from a collection; no-op with a warning if the
    /// collection doesn't exist or holds no song list.
    pub fn remove_songs(
        &mut self,
        alias: &str,
        songs: &[SongRef],
        index: &impl MusicIndex,
    ) -> Result<()> {
        let Some(collection) = self.collections.get_mut(alias) else {
            crate::warning!(
                "Collection [{alias}] does not exist or contains no song to remove"
            );
            return Ok(());
        };
        let Some(existing) = collection.songs.clone() else {
            crate::warning!(
                "Collection [{alias}] does not exist or contains no song to remove"
            );
            return Ok(());
        };

        let remaining: Vec<SongRef> = existing
            .into_iter()
            .filter(|s| !songs.contains(s))
            .collect();

        if collection.stored_playlist {
            index.clear_stored_playlist(alias)?;
            index.add_songs_to_stored_playlist(alias, &remaining)?;
        }
        collection.songs = Some(remaining);
        self.needs_write = true;
        Ok(())
    }

    pub fn write_file(&self, index: &impl MusicIndex) -> Result<()> {
        let raw = optimized_to_raw(&self.collections, index)?;
        std::fs::write(&self.path, raw)
            .wrap_err_with(|| format!("writing collections file {}", self.path))
    }

    pub fn update_cache(&self, cache: &impl Cache) {
        cache.write(CACHE_KEY, &self.collections);
    }
}

/// Parse the raw collections file into the optimized map, then merge in
/// native MPD stored playlists (skipping any name collision with a
/// warning, matching the original).
fn raw_to_optimized(raw: &str, index: &impl MusicIndex) -> Result<IndexMap<String, Collection>> {
    let mut collections: IndexMap<String, Collection> = IndexMap::new();
    let mut alias = String::new();

    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("--") {
            let (name, flags) = match rest.strip_prefix('@') {
                Some(name) => (name, HeaderFlag::Sort),
                None => match rest.strip_prefix('#') {
                    Some(name) => (name, HeaderFlag::Special),
                    None => (rest, HeaderFlag::None),
                },
            };
            alias = name.trim().to_string();
            let mut collection = Collection::default();
            match flags {
                HeaderFlag::Sort => collection.sort = true,
                HeaderFlag::Special => collection.special = true,
                HeaderFlag::None => {}
            }
            collections.insert(alias.clone(), collection);
        } else if !alias.is_empty() {
            let collection = collections
                .get_mut(&alias)
                .expect("alias always inserted by its header line");
            if let Some(command) = line.strip_prefix("command:") {
                collection.command = Some(command.trim().to_string());
            } else if line.starts_with("songs:") {
                collection.songs = Some(Vec::new());
            } else if !line.trim().is_empty() {
                if collection.songs.is_some() && (line.starts_with("    ") || line.starts_with('\t'))
                {
                    match parse_tag_tuple(line.trim()) {
                        Some((artist, album, title, track)) => {
                            let matches = index.find_multiple(&[
                                ("artist", &artist),
                                ("album", &album),
                                ("title", &title),
                                ("track", &track),
                            ])?;
                            match matches.first() {
                                Some(song) => {
                                    collection.songs.as_mut().unwrap().push(song.clone());
                                }
                                None => {
                                    crate::warning!(
                                        "In collection [{alias}], these tags do not match any song: \"{artist}\", \"{album}\", \"{title}\", \"{track}\""
                                    );
                                }
                            }
                        }
                        None => {
                            crate::warning!(
                                "In collection [{alias}], could not parse song line: {line}"
                            );
                        }
                    }
                } else {
                    let expression = collection.expression.get_or_insert_with(String::new);
                    expression.push_str(line);
                    expression.push('\n');
                }
            }
        }
    }

    for playlist in index.stored_playlists()? {
        if collections.contains_key(&playlist) {
            crate::warning!(
                "MPD playlist [{playlist}] was ignored because a collection with the same name already exists"
            );
            continue;
        }
        let songs = index.stored_playlist_songs(&playlist)?;
        collections.insert(
            playlist,
            Collection {
                stored_playlist: true,
                songs: Some(songs),
                ..Default::default()
            },
        );
    }

    Ok(collections)
}

enum HeaderFlag {
    None,
    Sort,
    Special,
}

/// Parse a `"artist", "album", "title", "track"` song line. The original
/// used `ast.literal_eval` on a Python tuple literal; here the grammar is
/// narrowed to exactly four double-quoted, comma-separated fields with
/// `\"`-escaped quotes, which is everything `repr_tags` ever emits.
fn parse_tag_tuple(line: &str) -> Option<(String, String, String, String)> {
    let mut fields = Vec::with_capacity(4);
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            let mut field = String::new();
            loop {
                match chars.next()? {
                    '\\' if chars.peek() == Some(&'"') => {
                        field.push('"');
                        chars.next();
                    }
                    '"' => break,
                    other => field.push(other),
                }
            }
            fields.push(field);
        }
    }
    if fields.len() != 4 {
        return None;
    }
    let mut it = fields.into_iter();
    Some((
        it.next().unwrap(),
        it.next().unwrap(),
        it.next().unwrap(),
        it.next().unwrap(),
    ))
}

fn esc_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

fn repr_tags(tags: (&str, &str, &str, &str)) -> String {
    [tags.0, tags.1, tags.2, tags.3]
        .iter()
        .map(|t| format!("\"{}\"", esc_quotes(t)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Serialize the optimized map back to the raw file grammar, skipping
/// native MPD playlists (those live in the daemon, not the file).
fn optimized_to_raw(
    collections: &IndexMap<String, Collection>,
    index: &impl MusicIndex,
) -> Result<String> {
    let mut raw = String::new();
    for (alias, collection) in collections {
        if collection.stored_playlist {
            continue;
        }
        if collection.sort {
            raw.push_str("--@");
        } else if collection.special {
            raw.push_str("--#");
        } else {
            raw.push_str("--");
        }
        raw.push_str(alias);

        if let Some(expression) = &collection.expression {
            raw.push('\n');
            raw.push_str(expression.trim_end());
        }
        if let Some(command) = &collection.command {
            raw.push_str("\ncommand: ");
            raw.push_str(command);
        }
        if let Some(songs) = &collection.songs {
            if !songs.is_empty() {
                raw.push_str("\nsongs:");
                for song in songs {
                    let artist = index.get_tag(song, "artist")?;
                    let album = index.get_tag(song, "album")?;
                    let title = index.get_tag(song, "title")?;
                    let track = index.get_tag(song, "track")?;
                    raw.push_str("\n    ");
                    raw.push_str(&repr_tags((&artist, &album, &title, &track)));
                }
            }
        }
        raw.push_str("\n\n\n");
    }
    Ok(raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music_index::fake::FakeMusicIndex;
    use pretty_assertions::assert_eq;

    #[test]
    fn raw_round_trips_through_optimized() {
        let index = FakeMusicIndex::library();
        let raw = "--fav\nsongs:\n    \"A\", \"L\", \"X\", \"1\"\n\n\n--#special\nA\"A\"\n";
        let collections = raw_to_optimized(raw, &index).unwrap();

        assert!(collections["fav"].songs.as_ref().unwrap().contains(&SongRef::from("X.mp3")));
        assert!(collections["special"].special);
        assert_eq!(collections["special"].expression.as_deref(), Some("A\"A\"\n"));

        let back = optimized_to_raw(&collections, &index).unwrap();
        assert!(back.contains("--fav"));
        assert!(back.contains("--#special"));
    }

    #[test]
    fn native_playlists_merge_unless_name_collides() {
        let index = FakeMusicIndex::library();
        index
            .add_songs_to_stored_playlist("native", &[SongRef::from("Z.mp3")])
            .unwrap();
        let collections = raw_to_optimized("--native\nsongs:\n", &index).unwrap();
        // the user collection wins; the native playlist is dropped with a warning
        assert!(!collections["native"].stored_playlist);
    }

    #[test]
    fn parse_tag_tuple_handles_escaped_quotes() {
        let parsed = parse_tag_tuple(r#""A \"B\"", "L", "T", "1""#).unwrap();
        assert_eq!(parsed.0, "A \"B\"");
        assert_eq!(parsed.3, "1");
    }
}
