//! §4.6 Evaluator: walks a [`QueryAst`] against `CollectionStore` +
//! `MusicIndex` + `SimilarityService`, producing an [`OrderedSet<SongRef>`].
//!
//! Grounded on the original `mpdc/libs/parser.py`'s `p_expression_*`
//! actions, split out of the grammar (see `parser.rs`) into its own pass:
//! the parser never touches a façade, the evaluator never re-tokenizes.

use std::collections::HashSet;

use color_eyre::Result;
use color_eyre::eyre::bail;
use itertools::{Itertools, process_results};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::cache::Cache;
use crate::collections::CollectionStore;
use crate::error::QueryError;
use crate::model::SongRef;
use crate::music_index::MusicIndex;
use crate::ordered_set::OrderedSet;
use crate::similarity::{LastfmClient, SimilarityService, TagWeights};

use super::ast::{QueryAst, SetOp};
use super::lexer::lex;
use super::parser::parse;

/// `(lower alias, field name)` table for the filter alphabet that map
/// straight onto a `MusicIndex` field lookup. `la`/`lb` are handled
/// separately (they route through `SimilarityService`); `e` is handled
/// separately too (it's a local suffix match, per §4.2); any alias not in
/// this table and not one of those three is `UnknownFilter`.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("a", "artist"),
    ("b", "album"),
    ("t", "title"),
    ("n", "track"),
    ("g", "genre"),
    ("d", "date"),
    ("c", "composer"),
    ("p", "performer"),
    ("f", "filename"),
    ("x", "any"),
    ("ab", "albumartist"),
];

const EXCLUDE_ALIAS: &str = "exclude";

pub struct Evaluator<'a, I: MusicIndex, L: LastfmClient, C: Cache> {
    store: &'a CollectionStore,
    index: &'a I,
    similarity: &'a SimilarityService<L, C>,
    enable_command: bool,
}

impl<'a, I: MusicIndex, L: LastfmClient, C: Cache> Evaluator<'a, I, L, C> {
    pub fn new(
        store: &'a CollectionStore,
        index: &'a I,
        similarity: &'a SimilarityService<L, C>,
        enable_command: bool,
    ) -> Self {
        Self {
            store,
            index,
            similarity,
            enable_command,
        }
    }

    /// Lex, parse, and evaluate a query string in one shot — the entry
    /// point the CLI calls.
    pub fn query(&self, input: &str, rng: &mut impl Rng) -> Result<OrderedSet<SongRef>> {
        let tokens = lex(input)?;
        let ast = parse(&tokens)?;
        let mut visited = HashSet::new();
        self.eval(&ast, &mut visited, rng)
    }

    fn eval(
        &self,
        ast: &QueryAst,
        visited: &mut HashSet<String>,
        rng: &mut impl Rng,
    ) -> Result<OrderedSet<SongRef>> {
        match ast {
            QueryAst::Collection(name) => self.eval_collection(name, visited, rng),
            QueryAst::Filter {
                alias,
                exact,
                pattern,
            } => self.eval_filter(alias, *exact, pattern),
            QueryAst::Op(lhs, op, rhs) => {
                let lhs = self.eval(lhs, visited, rng)?;
                let rhs = self.eval(rhs, visited, rng)?;
                Ok(match op {
                    SetOp::Union => lhs.union(&rhs),
                    SetOp::Intersection => lhs.intersection(&rhs),
                    SetOp::Complement => lhs.difference(&rhs),
                    SetOp::SymDiff => lhs.symmetric_difference(&rhs),
                })
            }
            QueryAst::Modifier(inner, modifier) => {
                let input = self.eval(inner, visited, rng)?;
                self.eval_modifier(input, modifier, rng)
            }
        }
    }

    fn eval_collection(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        rng: &mut impl Rng,
    ) -> Result<OrderedSet<SongRef>> {
        match name {
            "all" => return Ok(self.index.all_songs()?.into_iter().collect()),
            "c" => return Ok(self.index.queue_songs()?.into_iter().collect()),
            "C" => {
                return Ok(self
                    .index
                    .current_song()?
                    .into_iter()
                    .collect::<OrderedSet<_>>());
            }
            "A" => {
                let Some(current) = self.index.current_song()? else {
                    return Ok(OrderedSet::new());
                };
                let artist = self.index.get_tag(&current, "artist")?;
                if artist.is_empty() {
                    return Ok(OrderedSet::new());
                }
                return Ok(self.index.find("artist", &artist)?.into_iter().collect());
            }
            "B" => {
                let Some(current) = self.index.current_song()? else {
                    return Ok(OrderedSet::new());
                };
                let album = self.index.get_tag(&current, "album")?;
                if album.is_empty() {
                    return Ok(OrderedSet::new());
                }
                let albumartist = self.index.get_tag(&current, "albumartist")?;
                let songs = if !albumartist.is_empty() {
                    self.index
                        .find_multiple(&[("album", &album), ("albumartist", &albumartist)])?
                } else {
                    let artist = self.index.get_tag(&current, "artist")?;
                    self.index
                        .find_multiple(&[("album", &album), ("artist", &artist)])?
                };
                return Ok(songs.into_iter().collect());
            }
            _ => {}
        }

        let Some(collection) = self.store.get(name) else {
            return Err(QueryError::UnknownCollection(name.to_string()).into());
        };

        if !visited.insert(name.to_string()) {
            return Err(QueryError::CollectionCycle(name.to_string()).into());
        }

        let mut result = OrderedSet::new();
        if let Some(expression) = &collection.expression {
            let tokens = lex(expression)?;
            let ast = parse(&tokens)?;
            let sub = self.eval(&ast, visited, rng)?;
            result = result.union(&sub);
        }
        if let Some(songs) = &collection.songs {
            result.extend_ordered(songs.iter().cloned());
        }
        if let Some(command) = &collection.command {
            if self.enable_command {
                let songs = run_command(name, command)?;
                result.extend_ordered(songs);
            }
        }

        visited.remove(name);

        if collection.sort {
            result = self.index.sort(&result)?.into_iter().collect();
        }

        Ok(result)
    }

    fn eval_filter(&self, alias: &str, exact: bool, pattern: &str) -> Result<OrderedSet<SongRef>> {
        match alias {
            "la" => {
                let artists = if exact {
                    self.similarity.find_artists(pattern)
                } else {
                    self.similarity.search_artists(pattern)
                };
                let mut result = OrderedSet::new();
                for artist in artists {
                    result.extend_ordered(self.index.find("artist", &artist)?);
                }
                Ok(result)
            }
            "lb" => {
                let albums = if exact {
                    self.similarity.find_albums(pattern)
                } else {
                    self.similarity.search_albums(pattern)
                };
                let mut result = OrderedSet::new();
                for (artist, album) in albums {
                    let songs = self
                        .index
                        .find_multiple(&[("album", &album), ("albumartist", &artist)])?;
                    let songs = if !songs.is_empty() {
                        songs
                    } else {
                        self.index
                            .find_multiple(&[("album", &album), ("artist", &artist)])?
                    };
                    result.extend_ordered(songs);
                }
                Ok(self.index.sort(&result)?.into_iter().collect())
            }
            "e" => {
                let songs = self.index.all_songs()?;
                let matched = songs.into_iter().filter(|song| {
                    if exact {
                        song.as_str().ends_with(pattern)
                    } else {
                        song.as_str()
                            .to_lowercase()
                            .ends_with(&pattern.to_lowercase())
                    }
                });
                Ok(matched.collect())
            }
            _ => {
                let Some((_, field)) = FIELD_ALIASES.iter().find(|(a, _)| *a == alias) else {
                    return Err(QueryError::UnknownFilter(alias.to_string()).into());
                };
                let songs = if exact {
                    self.index.find(field, pattern)?
                } else {
                    self.index.search(field, pattern)?
                };
                Ok(songs.into_iter().collect())
            }
        }
    }

    /// Subtract the `exclude` collection (if present and flagged
    /// `special`) from `input`, per §4.6's modifier preamble.
    fn strip_excluded(&self, input: OrderedSet<SongRef>, rng: &mut impl Rng) -> Result<OrderedSet<SongRef>> {
        match self.store.get(EXCLUDE_ALIAS) {
            Some(collection) if collection.special => {
                let excluded = self.eval_collection(EXCLUDE_ALIAS, &mut HashSet::new(), rng)?;
                Ok(input.difference(&excluded))
            }
            _ => Ok(input),
        }
    }

    fn eval_modifier(
        &self,
        input: OrderedSet<SongRef>,
        modifier: &str,
        rng: &mut impl Rng,
    ) -> Result<OrderedSet<SongRef>> {
        match parse_modifier(modifier) {
            Some(ModKind::Sort) => Ok(self.index.sort(&input)?.into_iter().collect()),
            Some(ModKind::Random(n)) => {
                let input = self.strip_excluded(input, rng)?;
                self.sample_random(input, n, rng)
            }
            Some(ModKind::RandomArtists(n)) => {
                let input = self.strip_excluded(input, rng)?;
                self.sample_by_artist(input, n, rng)
            }
            Some(ModKind::RandomAlbums(n)) => {
                let input = self.strip_excluded(input, rng)?;
                self.sample_by_album(input, n, rng)
            }
            Some(ModKind::Duration(n)) => {
                let input = self.strip_excluded(input, rng)?;
                self.sample_by_duration(input, n, rng)
            }
            Some(ModKind::SimilarArtists { n, include_input }) => {
                let input = self.strip_excluded(input, rng)?;
                self.similar_artists(input, n, include_input)
            }
            Some(ModKind::SimilarAlbums { n, include_input }) => {
                let input = self.strip_excluded(input, rng)?;
                self.similar_albums(input, n, include_input)
            }
            None => Err(QueryError::UnknownModifier(modifier.to_string()).into()),
        }
    }

    fn sample_random(
        &self,
        input: OrderedSet<SongRef>,
        n: usize,
        rng: &mut impl Rng,
    ) -> Result<OrderedSet<SongRef>> {
        let items: Vec<SongRef> = input.into_iter().collect();
        if n >= items.len() {
            return Ok(items.into_iter().collect());
        }
        Ok(items
            .choose_multiple(rng, n)
            .cloned()
            .collect::<OrderedSet<_>>())
    }

    fn sample_by_artist(
        &self,
        input: OrderedSet<SongRef>,
        n: usize,
        rng: &mut impl Rng,
    ) -> Result<OrderedSet<SongRef>> {
        let items: Vec<SongRef> = input.iter().cloned().collect();
        let artists: Vec<String> = process_results(
            items.iter().map(|song| self.index.get_tag(song, "artist")),
            |it| it.unique().collect(),
        )?;
        let chosen: HashSet<String> = if n >= artists.len() {
            artists.into_iter().collect()
        } else {
            artists.choose_multiple(rng, n).cloned().collect()
        };
        let mut result = OrderedSet::new();
        for song in items {
            let artist = self.index.get_tag(&song, "artist")?;
            if chosen.contains(&artist) {
                result.insert(song);
            }
        }
        Ok(result)
    }

    fn sample_by_album(
        &self,
        input: OrderedSet<SongRef>,
        n: usize,
        rng: &mut impl Rng,
    ) -> Result<OrderedSet<SongRef>> {
        let items: Vec<SongRef> = input.iter().cloned().collect();
        let pairs: Vec<(String, String)> = process_results(
            items.iter().map(|song| -> Result<(String, String)> {
                Ok((
                    self.index.get_tag(song, "album")?,
                    self.index.get_tag(song, "albumartist")?,
                ))
            }),
            |it| it.unique().collect(),
        )?;
        let chosen: HashSet<(String, String)> = if n >= pairs.len() {
            pairs.into_iter().collect()
        } else {
            pairs.choose_multiple(rng, n).cloned().collect()
        };
        let mut result = OrderedSet::new();
        for song in items {
            let pair = (
                self.index.get_tag(&song, "album")?,
                self.index.get_tag(&song, "albumartist")?,
            );
            if chosen.contains(&pair) {
                result.insert(song);
            }
        }
        Ok(result)
    }

    fn sample_by_duration(
        &self,
        input: OrderedSet<SongRef>,
        minutes: u64,
        rng: &mut impl Rng,
    ) -> Result<OrderedSet<SongRef>> {
        let mut items: Vec<SongRef> = input.into_iter().collect();
        items.shuffle(rng);

        let target = minutes.saturating_mul(60);
        let mut total = 0u64;
        let mut result = OrderedSet::new();
        for song in items {
            if total >= target {
                break;
            }
            let time = self.index.get_tag(&song, "time")?;
            let seconds: u64 = time.parse().unwrap_or(0);
            total += seconds;
            result.insert(song);
        }
        Ok(result)
    }

    fn similar_artists(
        &self,
        input: OrderedSet<SongRef>,
        n: usize,
        include_input: bool,
    ) -> Result<OrderedSet<SongRef>> {
        let artists: Vec<String> = process_results(
            input.iter().map(|song| self.index.get_tag(song, "artist")),
            |it| it.filter(|a| !a.is_empty()).unique().collect(),
        )?;

        let mut query = TagWeights::new();
        for artist in &artists {
            for (tag, weight) in self.similarity.artist_tags(artist, false)? {
                *query.entry(tag).or_insert(0) += weight;
            }
        }

        let ranked = self.similarity.similar_artists(&query);
        let mut result = OrderedSet::new();
        for (artist, _score) in ranked.into_iter().filter(|(a, _)| !artists.contains(a)).take(n) {
            result.extend_ordered(self.index.find("artist", &artist)?);
        }
        if include_input {
            result = input.union(&result);
        }
        Ok(result)
    }

    fn similar_albums(
        &self,
        input: OrderedSet<SongRef>,
        n: usize,
        include_input: bool,
    ) -> Result<OrderedSet<SongRef>> {
        // Keyed `(artist, album)`, matching `SimilarityService`'s own
        // `(artist, album)` convention for album tag maps.
        let pairs: Vec<(String, String)> = process_results(
            input.iter().map(|song| -> Result<(String, String)> {
                Ok((
                    self.index.get_tag(song, "artist")?,
                    self.index.get_tag(song, "album")?,
                ))
            }),
            |it| it.filter(|(_, album)| !album.is_empty()).unique().collect(),
        )?;

        let mut query = TagWeights::new();
        for (artist, album) in &pairs {
            for (tag, weight) in self.similarity.album_tags(artist, album, false)? {
                *query.entry(tag).or_insert(0) += weight;
            }
        }

        let ranked = self.similarity.similar_albums(&query);
        let mut result = OrderedSet::new();
        for ((artist, album), _score) in ranked.into_iter().filter(|(p, _)| !pairs.contains(p)).take(n) {
            result.extend_ordered(
                self.index
                    .find_multiple(&[("album", &album), ("artist", &artist)])?,
            );
        }
        if include_input {
            result = input.union(&result);
        }
        Ok(result)
    }
}

enum ModKind {
    Sort,
    Random(usize),
    RandomArtists(usize),
    RandomAlbums(usize),
    Duration(u64),
    SimilarArtists { n: usize, include_input: bool },
    SimilarAlbums { n: usize, include_input: bool },
}

/// Parse one of the modifier forms in §4.6's table. Longer prefixes
/// (`isa`, `isb`, `ra`, `rb`) are checked before their shorter
/// look-alikes (`sa`, `sb`, `r`) so e.g. `ra5` isn't misread as `r` with
/// a malformed number.
fn parse_modifier(modifier: &str) -> Option<ModKind> {
    if modifier == "s" {
        return Some(ModKind::Sort);
    }
    if let Some(rest) = modifier.strip_prefix("isa") {
        return Some(ModKind::SimilarArtists {
            n: rest.parse().ok()?,
            include_input: true,
        });
    }
    if let Some(rest) = modifier.strip_prefix("isb") {
        return Some(ModKind::SimilarAlbums {
            n: rest.parse().ok()?,
            include_input: true,
        });
    }
    if let Some(rest) = modifier.strip_prefix("sa") {
        return Some(ModKind::SimilarArtists {
            n: rest.parse().ok()?,
            include_input: false,
        });
    }
    if let Some(rest) = modifier.strip_prefix("sb") {
        return Some(ModKind::SimilarAlbums {
            n: rest.parse().ok()?,
            include_input: false,
        });
    }
    if let Some(rest) = modifier.strip_prefix("ra") {
        return Some(ModKind::RandomArtists(rest.parse().ok()?));
    }
    if let Some(rest) = modifier.strip_prefix("rb") {
        return Some(ModKind::RandomAlbums(rest.parse().ok()?));
    }
    if let Some(rest) = modifier.strip_prefix('r') {
        return Some(ModKind::Random(rest.parse().ok()?));
    }
    if let Some(rest) = modifier.strip_prefix('d') {
        return Some(ModKind::Duration(rest.parse().ok()?));
    }
    None
}

/// Run a `command:` collection's shell string, inheriting the caller's
/// environment; stdout lines are song file paths, a non-zero exit is
/// fatal. Only ever called when `enable_command` is set.
fn run_command(alias: &str, command: &str) -> Result<Vec<SongRef>> {
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .output();

    let output = match output {
        Ok(output) => output,
        Err(_) => bail!(QueryError::CommandFailed {
            alias: alias.to_string()
        }),
    };
    if !output.status.success() {
        bail!(QueryError::CommandFailed {
            alias: alias.to_string()
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().map(SongRef::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemCache;
    use crate::model::Collection;
    use crate::music_index::fake::FakeMusicIndex;
    use crate::similarity::HttpLastfmClient;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// A `LastfmClient` that never gets called in these tests — `sa`/`sb`
    /// and `la`/`lb` coverage lives in `similarity.rs`'s own tests, which
    /// exercise the service directly.
    struct UnusedClient;
    impl LastfmClient for UnusedClient {
        fn artist_tags(&self, _artist: &str) -> Result<Vec<(String, u32)>> {
            unreachable!("test queries never force a similarity update")
        }
        fn album_tags(&self, _artist: &str, _album: &str) -> Result<Vec<(String, u32)>> {
            unreachable!("test queries never force a similarity update")
        }
    }

    fn harness() -> (CollectionStore, FakeMusicIndex, SimilarityService<UnusedClient, MemCache>) {
        let store = CollectionStore::new("/dev/null".into());
        let index = FakeMusicIndex::library();
        let similarity = SimilarityService::new(UnusedClient, MemCache::default(), 0.30);
        (store, index, similarity)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0)
    }

    #[test]
    fn filter_search_is_substring_find_is_exact() {
        let (store, index, similarity) = harness();
        let eval = Evaluator::new(&store, &index, &similarity, false);

        let songs = eval.query(r#"a"A""#, &mut rng()).unwrap();
        let mut paths: Vec<_> = songs.iter().map(|s| s.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["X.mp3", "Y.mp3"]);
    }

    #[test]
    fn exact_filter_intersected_with_substring_filter() {
        let (store, index, similarity) = harness();
        let eval = Evaluator::new(&store, &index, &similarity, false);

        let songs = eval.query(r#"A"A" . b"L""#, &mut rng()).unwrap();
        let mut paths: Vec<_> = songs.iter().map(|s| s.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["X.mp3", "Y.mp3"]);
    }

    #[test]
    fn all_minus_artist_filter() {
        let (store, index, similarity) = harness();
        let eval = Evaluator::new(&store, &index, &similarity, false);

        let songs = eval.query(r#"all - a"A""#, &mut rng()).unwrap();
        let paths: Vec<_> = songs.iter().map(|s| s.as_str()).collect();
        assert_eq!(paths, vec!["Z.mp3"]);
    }

    #[test]
    fn random_sample_of_one_picks_exactly_one_element() {
        let (store, index, similarity) = harness();
        let eval = Evaluator::new(&store, &index, &similarity, false);

        let songs = eval
            .query(r#"(a"A" + a"B") | r1"#, &mut rng())
            .unwrap();
        assert_eq!(songs.len(), 1);
        let only = songs.iter().next().unwrap().as_str();
        assert!(["X.mp3", "Y.mp3", "Z.mp3"].contains(&only));
    }

    #[test]
    fn user_collection_expression_is_resolved_recursively() {
        let (mut store, index, similarity) = harness();
        store.set_for_test(
            "fav",
            Collection {
                expression: Some(r#"a"A""#.to_string()),
                ..Default::default()
            },
        );
        let eval = Evaluator::new(&store, &index, &similarity, false);

        let songs = eval.query(r#"fav - a"B""#, &mut rng()).unwrap();
        let mut paths: Vec<_> = songs.iter().map(|s| s.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["X.mp3", "Y.mp3"]);
    }

    #[test]
    fn sort_flagged_collection_reorders_its_union_in_library_order() {
        let (mut store, index, similarity) = harness();
        store.set_for_test(
            "sorted",
            Collection {
                sort: true,
                expression: Some(r#"b"B" + a"A""#.to_string()),
                ..Default::default()
            },
        );
        let eval = Evaluator::new(&store, &index, &similarity, false);

        let songs = eval.query("sorted", &mut rng()).unwrap();
        let paths: Vec<_> = songs.iter().map(|s| s.as_str()).collect();
        assert_eq!(paths, vec!["X.mp3", "Y.mp3", "Z.mp3"]);
    }

    #[test]
    fn unknown_collection_is_reported() {
        let (store, index, similarity) = harness();
        let eval = Evaluator::new(&store, &index, &similarity, false);

        let err = eval.query("nope", &mut rng()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<QueryError>(),
            Some(&QueryError::UnknownCollection("nope".to_string()))
        );
    }

    #[test]
    fn unknown_modifier_is_reported() {
        let (store, index, similarity) = harness();
        let eval = Evaluator::new(&store, &index, &similarity, false);

        let err = eval.query("all | bogus", &mut rng()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<QueryError>(),
            Some(&QueryError::UnknownModifier("bogus".to_string()))
        );
    }

    #[test]
    fn direct_self_reference_is_a_cycle() {
        let (mut store, index, similarity) = harness();
        store.set_for_test(
            "loop",
            Collection {
                expression: Some("loop".to_string()),
                ..Default::default()
            },
        );
        let eval = Evaluator::new(&store, &index, &similarity, false);

        let err = eval.query("loop", &mut rng()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<QueryError>(),
            Some(&QueryError::CollectionCycle("loop".to_string()))
        );
    }

    #[test]
    fn exclude_is_subtracted_before_random_sample() {
        let (mut store, index, similarity) = harness();
        store.set_for_test(
            "exclude",
            Collection {
                special: true,
                expression: Some(r#"a"B""#.to_string()),
                ..Default::default()
            },
        );
        let eval = Evaluator::new(&store, &index, &similarity, false);

        // Z is the only song by "B"; excluding it means r10 (way more than
        // the remaining set) must return exactly X and Y.
        let songs = eval.query("all | r10", &mut rng()).unwrap();
        let mut paths: Vec<_> = songs.iter().map(|s| s.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["X.mp3", "Y.mp3"]);
    }

    #[allow(dead_code)]
    fn _type_check_client_is_usable(c: HttpLastfmClient) {
        let _: &dyn LastfmClient = &c;
    }
}
