//! §4.6 `la`/`lb` filters: a Last.fm-like external tag-similarity service.
//!
//! Grounded on the original `mpdc/libs/lastfmhelper.py`: rate limiting via
//! a last-request timestamp, bounded retries on timeout, cosine similarity
//! over sparse tag-weight vectors, and a noise-tag blacklist. Tag maps are
//! persisted through the same [`Cache`](crate::cache::Cache) abstraction
//! the rest of the crate uses rather than a bespoke pickle file.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use color_eyre::Result;
use color_eyre::eyre::{Context, bail};
use serde::{Deserialize, Serialize};

const RATE_LIMIT: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_ATTEMPTS: u32 = 4;

/// Tags known to be noise rather than signal — carried over verbatim from
/// the original's `bad_tags` blacklist. A tag is dropped if it *contains*
/// any of these as a substring, not just on exact match.
const NOISE_TAGS: &[&str] = &[
    "beautiful",
    "awesome",
    "epic",
    "masterpiece",
    "favorite",
    "favourite",
    "recommended",
    "bands i",
    "band i",
    "best album",
    "my album",
    "vinyl i",
    "album i",
    "albums i",
    "album you",
    "albums you",
];

pub type TagWeights = BTreeMap<String, u32>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct TagStore {
    artists: BTreeMap<String, TagWeights>,
    albums: BTreeMap<(String, String), TagWeights>,
}

/// Sanitize a raw `(tag, count)` list the way the original's
/// `sanitize_tags` did: lowercase, drop blacklisted and zero-weight tags.
pub fn sanitize_tags(raw: impl IntoIterator<Item = (String, u32)>) -> TagWeights {
    let mut tags = TagWeights::new();
    for (tag, count) in raw {
        if count == 0 {
            continue;
        }
        let tag = tag.to_lowercase();
        if NOISE_TAGS.iter().any(|noise| tag.contains(noise)) {
            continue;
        }
        *tags.entry(tag).or_insert(0) += count;
    }
    tags
}

/// Cosine similarity between two sparse tag-weight vectors, in `[0, 1]`
/// for non-negative weights. Mirrors the original's `utils.similarity`.
pub fn cosine_similarity(a: &TagWeights, b: &TagWeights) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(tag, wa)| b.get(tag).map(|wb| *wa as f64 * *wb as f64))
        .sum();
    let norm_a: f64 = a.values().map(|w| (*w as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|w| (*w as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// What the external service gives us for a name: an arbitrary
/// `(tag, weight)` list before sanitization.
pub trait LastfmClient {
    fn artist_tags(&self, artist: &str) -> Result<Vec<(String, u32)>>;
    fn album_tags(&self, artist: &str, album: &str) -> Result<Vec<(String, u32)>>;
}

/// Rate-limited, retrying HTTP client over the Last.fm-compatible
/// `artist.getTopTags` / `album.getTopTags` endpoints.
pub struct HttpLastfmClient {
    api_key: String,
    http: reqwest::blocking::Client,
    last_request: Mutex<Option<Instant>>,
}

impl HttpLastfmClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .wrap_err("building last.fm http client")?;
        Ok(Self {
            api_key: api_key.into(),
            http,
            last_request: Mutex::new(None),
        })
    }

    fn throttle(&self) {
        let mut last = self.last_request.lock().expect("mutex poisoned");
        if let Some(last_request) = *last {
            let elapsed = last_request.elapsed();
            if elapsed < RATE_LIMIT {
                std::thread::sleep(RATE_LIMIT - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn get_with_retry(&self, params: &[(&str, &str)]) -> Result<serde_json::Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.throttle();
            let result = self
                .http
                .get("https://ws.audioscrobbler.com/2.0/")
                .query(params)
                .send()
                .and_then(|resp| resp.error_for_status())
                .and_then(|resp| resp.json::<serde_json::Value>());

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_timeout() && attempt < MAX_ATTEMPTS => {
                    crate::warning!("last.fm request timed out (attempt {attempt}), retrying");
                    continue;
                }
                Err(e) => bail!("last.fm request failed after {attempt} attempt(s): {e}"),
            }
        }
    }

    fn extract_tags(value: &serde_json::Value) -> Vec<(String, u32)> {
        value["toptags"]["tag"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|tag| {
                let name = tag["name"].as_str()?.to_string();
                let count = tag["count"].as_u64().unwrap_or(0) as u32;
                Some((name, count))
            })
            .collect()
    }
}

impl LastfmClient for HttpLastfmClient {
    fn artist_tags(&self, artist: &str) -> Result<Vec<(String, u32)>> {
        let value = self.get_with_retry(&[
            ("method", "artist.gettoptags"),
            ("artist", artist),
            ("api_key", &self.api_key),
            ("format", "json"),
        ])?;
        Ok(Self::extract_tags(&value))
    }

    fn album_tags(&self, artist: &str, album: &str) -> Result<Vec<(String, u32)>> {
        let value = self.get_with_retry(&[
            ("method", "album.gettoptags"),
            ("artist", artist),
            ("album", album),
            ("api_key", &self.api_key),
            ("format", "json"),
        ])?;
        Ok(Self::extract_tags(&value))
    }
}

/// The `la`/`lb` filters' backing service: persisted, sanitized tag maps
/// plus cosine-similarity ranking, per §4.6/§6 of the specification.
pub struct SimilarityService<L: LastfmClient, C: crate::cache::Cache> {
    client: L,
    cache: C,
    min_similarity: f64,
}

const CACHE_KEY: &str = "lastfm_tags";

impl<L: LastfmClient, C: crate::cache::Cache> SimilarityService<L, C> {
    pub fn new(client: L, cache: C, min_similarity: f64) -> Self {
        Self {
            client,
            cache,
            min_similarity,
        }
    }

    fn load_store(&self) -> TagStore {
        self.cache.read(CACHE_KEY).unwrap_or_default()
    }

    fn save_store(&self, store: &TagStore) {
        self.cache.write(CACHE_KEY, store);
    }

    /// Tags for an artist. Without `force_update`, a miss returns an empty
    /// map (with a warning if the whole store is empty) rather than
    /// hitting the network — that's what `update` is for.
    pub fn artist_tags(&self, artist: &str, force_update: bool) -> Result<TagWeights> {
        if !force_update {
            let store = self.load_store();
            if store.artists.is_empty() {
                crate::warning!("You should update the LastFM database");
            }
            return Ok(store.artists.get(artist).cloned().unwrap_or_default());
        }
        let raw = self.client.artist_tags(artist)?;
        let tags = sanitize_tags(raw);
        let mut store = self.load_store();
        store.artists.insert(artist.to_string(), tags.clone());
        self.save_store(&store);
        Ok(tags)
    }

    pub fn album_tags(&self, artist: &str, album: &str, force_update: bool) -> Result<TagWeights> {
        let key = (artist.to_string(), album.to_string());
        if !force_update {
            let store = self.load_store();
            if store.albums.is_empty() {
                crate::warning!("You should update the LastFM database");
            }
            return Ok(store.albums.get(&key).cloned().unwrap_or_default());
        }
        let raw = self.client.album_tags(artist, album)?;
        let tags = sanitize_tags(raw);
        let mut store = self.load_store();
        store.albums.insert(key, tags.clone());
        self.save_store(&store);
        Ok(tags)
    }

    /// Artists whose persisted tags include one that substring-contains
    /// `pattern`. Mirrors the original's `search_artists`.
    pub fn search_artists(&self, pattern: &str) -> Vec<String> {
        self.load_store()
            .artists
            .into_iter()
            .filter(|(_, tags)| tags.keys().any(|tag| tag.contains(pattern)))
            .map(|(name, _)| name)
            .collect()
    }

    /// Artists with an exact tag match. Mirrors `find_artists`.
    pub fn find_artists(&self, pattern: &str) -> Vec<String> {
        self.load_store()
            .artists
            .into_iter()
            .filter(|(_, tags)| tags.contains_key(pattern))
            .map(|(name, _)| name)
            .collect()
    }

    pub fn search_albums(&self, pattern: &str) -> Vec<(String, String)> {
        self.load_store()
            .albums
            .into_iter()
            .filter(|(_, tags)| tags.keys().any(|tag| tag.contains(pattern)))
            .map(|(key, _)| key)
            .collect()
    }

    pub fn find_albums(&self, pattern: &str) -> Vec<(String, String)> {
        self.load_store()
            .albums
            .into_iter()
            .filter(|(_, tags)| tags.contains_key(pattern))
            .map(|(key, _)| key)
            .collect()
    }

    /// Artists ranked by cosine similarity of their persisted tags against
    /// `query`, filtered by `min_similarity` and sorted descending.
    /// Mirrors `get_similar_artists`.
    pub fn similar_artists(&self, query: &TagWeights) -> Vec<(String, f64)> {
        let store = self.load_store();
        if store.artists.is_empty() {
            crate::warning!("You should update the LastFM database");
            return Vec::new();
        }
        let mut scored: Vec<(String, f64)> = store
            .artists
            .into_iter()
            .filter(|(_, tags)| !tags.is_empty())
            .map(|(name, tags)| (name, cosine_similarity(&tags, query)))
            .filter(|(_, score)| *score > self.min_similarity)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// Same as [`similar_artists`](Self::similar_artists), over
    /// `(artist, album)` keys.
    pub fn similar_albums(&self, query: &TagWeights) -> Vec<((String, String), f64)> {
        let store = self.load_store();
        if store.albums.is_empty() {
            crate::warning!("You should update the LastFM database");
            return Vec::new();
        }
        let mut scored: Vec<((String, String), f64)> = store
            .albums
            .into_iter()
            .filter(|(_, tags)| !tags.is_empty())
            .map(|(key, tags)| (key, cosine_similarity(&tags, query)))
            .filter(|(_, score)| *score > self.min_similarity)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemCache;
    use std::cell::RefCell;

    struct FakeClient {
        artist: RefCell<BTreeMap<String, Vec<(String, u32)>>>,
    }

    impl LastfmClient for FakeClient {
        fn artist_tags(&self, artist: &str) -> Result<Vec<(String, u32)>> {
            Ok(self
                .artist
                .borrow()
                .get(artist)
                .cloned()
                .unwrap_or_default())
        }

        fn album_tags(&self, _artist: &str, _album: &str) -> Result<Vec<(String, u32)>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn sanitize_tags_drops_noise_and_zero_weight() {
        let tags = sanitize_tags(vec![
            ("Rock".to_string(), 50),
            ("favorite".to_string(), 10),
            ("Jazz".to_string(), 0),
        ]);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["rock"], 50);
    }

    #[test]
    fn sanitize_tags_drops_on_substring_not_just_exact_match() {
        let tags = sanitize_tags(vec![
            ("my album of the year".to_string(), 10),
            ("best album ever".to_string(), 5),
            ("rock".to_string(), 20),
        ]);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["rock"], 20);
    }

    #[test]
    fn cosine_similarity_is_one_for_identical_vectors() {
        let mut a = TagWeights::new();
        a.insert("rock".to_string(), 10);
        a.insert("jazz".to_string(), 5);
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_is_zero_for_disjoint_vectors() {
        let mut a = TagWeights::new();
        a.insert("rock".to_string(), 10);
        let mut b = TagWeights::new();
        b.insert("jazz".to_string(), 10);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn similar_artists_filters_by_threshold_and_sorts_descending() {
        let mut artists = BTreeMap::new();
        artists.insert("rock".to_string(), vec![("rock".to_string(), 10)]);
        artists.insert(
            "rockish".to_string(),
            vec![("rock".to_string(), 8), ("pop".to_string(), 1)],
        );
        artists.insert("far".to_string(), vec![("ambient".to_string(), 10)]);
        let client = FakeClient {
            artist: RefCell::new(artists),
        };
        let service = SimilarityService::new(client, MemCache::default(), 0.30);

        let query = service.artist_tags("rock", true).unwrap();
        service.artist_tags("rockish", true).unwrap();
        service.artist_tags("far", true).unwrap();

        let similar = service.similar_artists(&query);
        assert_eq!(similar[0].0, "rockish");
        assert!(similar.iter().all(|(_, score)| *score > 0.30));
    }

    #[test]
    fn search_artists_matches_tag_substring_find_artists_matches_exact() {
        let mut artists = BTreeMap::new();
        artists.insert("rock".to_string(), vec![("hard rock".to_string(), 10)]);
        let client = FakeClient {
            artist: RefCell::new(artists),
        };
        let service = SimilarityService::new(client, MemCache::default(), 0.30);
        service.artist_tags("rock", true).unwrap();

        assert_eq!(service.search_artists("rock"), vec!["rock".to_string()]);
        assert!(service.find_artists("rock").is_empty());
        assert_eq!(service.find_artists("hard rock"), vec!["rock".to_string()]);
    }
}
