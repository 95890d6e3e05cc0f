//! §4.1 Cache: a keyed blob store, one file per key, mtimes as freshness
//! beacons.
//!
//! Grounded on the original `mpdc/libs/utils.py` cache functions
//! (`cache_dir`, `is_cached`, `read_cache`, `write_cache`), which pickled
//! arbitrary Python objects; here the same role is filled by
//! `serde`+`bincode` so any `Serialize + DeserializeOwned` value round-trips.

use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub trait Cache {
    fn exists(&self, name: &str) -> bool;
    fn last_modified(&self, name: &str) -> Option<SystemTime>;
    fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T>;
    fn write<T: Serialize>(&self, name: &str, value: &T);
}

/// Cache entry is stale if it doesn't exist, or its mtime is strictly less
/// than `probe` (the freshness beacon: a daemon DB-update epoch, a file
/// mtime, ...).
pub fn is_stale<C: Cache>(cache: &C, name: &str, probe: SystemTime) -> bool {
    match cache.last_modified(name) {
        Some(mtime) => mtime < probe,
        None => true,
    }
}

/// `<base>/<profile>/<name>.bin`, one file per key, no locking.
pub struct FsCache {
    dir: Utf8PathBuf,
}

impl FsCache {
    pub fn new(base: impl Into<Utf8PathBuf>, profile: &str) -> Self {
        Self {
            dir: base.into().join(profile),
        }
    }

    fn path(&self, name: &str) -> Utf8PathBuf {
        self.dir.join(format!("{name}.bin"))
    }
}

impl Cache for FsCache {
    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn last_modified(&self, name: &str) -> Option<SystemTime> {
        std::fs::metadata(self.path(name))
            .and_then(|m| m.modified())
            .ok()
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.path(name);
        match std::fs::read(&path) {
            Ok(bytes) => match bincode::deserialize(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    crate::warning!("can't read cache from {path}: {e}");
                    None
                }
            },
            Err(e) => {
                crate::warning!("can't read cache from {path}: {e}");
                None
            }
        }
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) {
        let path = self.path(name);
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            crate::warning!("can't create cache dir {:?}: {e}", self.dir);
            return;
        }
        match bincode::serialize(value) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    crate::warning!("can't write cache in {path}: {e}");
                }
            }
            Err(e) => crate::warning!("can't encode cache value for {path}: {e}"),
        }
    }
}

/// An in-memory cache, used by tests that want a `Cache` without touching
/// the filesystem.
#[derive(Default)]
pub struct MemCache {
    entries: std::cell::RefCell<std::collections::HashMap<String, (SystemTime, Vec<u8>)>>,
}

impl Cache for MemCache {
    fn exists(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    fn last_modified(&self, name: &str) -> Option<SystemTime> {
        self.entries.borrow().get(name).map(|(t, _)| *t)
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.entries
            .borrow()
            .get(name)
            .and_then(|(_, bytes)| bincode::deserialize(bytes).ok())
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) {
        if let Ok(bytes) = bincode::serialize(value) {
            self.entries
                .borrow_mut()
                .insert(name.to_string(), (SystemTime::now(), bytes));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn write_then_read_round_trips() {
        let cache = MemCache::default();
        cache.write("k", &vec!["a".to_string(), "b".to_string()]);
        let got: Vec<String> = cache.read("k").unwrap();
        assert_eq!(got, vec!["a", "b"]);
    }

    #[test]
    fn missing_entry_reads_as_none() {
        let cache = MemCache::default();
        assert!(cache.read::<String>("missing").is_none());
        assert!(!cache.exists("missing"));
    }

    #[test]
    fn staleness_fires_iff_mtime_strictly_precedes_probe() {
        let cache = MemCache::default();
        cache.write("k", &1u32);
        let mtime = cache.last_modified("k").unwrap();

        assert!(!is_stale(&cache, "k", mtime));
        assert!(is_stale(&cache, "k", mtime + Duration::from_secs(1)));
        assert!(is_stale(&cache, "missing", mtime));
    }

    #[test]
    fn fs_cache_round_trips_nested_structures(
    ) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(Utf8Path::from_path(dir.path()).unwrap().to_owned(), "default");

        let mut map = std::collections::BTreeMap::new();
        map.insert("a".to_string(), vec![("x".to_string(), 1u32)]);
        cache.write("nested", &map);

        let got: std::collections::BTreeMap<String, Vec<(String, u32)>> =
            cache.read("nested").unwrap();
        assert_eq!(got, map);
    }
}
