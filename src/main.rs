use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::Context;

use mpdcol::cache::FsCache;
use mpdcol::collections::CollectionStore;
use mpdcol::config::Config;
use mpdcol::music_index::{MpdMusicIndex, MusicIndex};
use mpdcol::output::setup_tracing;
use mpdcol::query::Evaluator;
use mpdcol::similarity::{HttpLastfmClient, LastfmClient, SimilarityService};

mod cli;

use cli::{Cli, Command};

fn main() -> Result<()> {
    color_eyre::install()?;
    setup_tracing();

    let cli = Cli::parse();
    let config = Config::load()?;

    let cache_dir = config.cache_dir()?;
    let cache = FsCache::new(cache_dir, &config.cache_profile);
    let index = MpdMusicIndex::new(
        config.host.clone(),
        config.port,
        config.password.clone(),
        cache,
    );

    let similarity_cache = FsCache::new(config.cache_dir()?, &config.cache_profile);
    match &config.lastfm_api_key {
        Some(api_key) => {
            let client = HttpLastfmClient::new(api_key.clone())?;
            let similarity = SimilarityService::new(client, similarity_cache, config.min_similarity);
            run(cli, config, index, similarity)
        }
        None => {
            mpdcol::warning!("no last.fm API key configured; `la`/`lb` and `sa`/`sb` will see no tags");
            let similarity = SimilarityService::new(NullLastfmClient, similarity_cache, config.min_similarity);
            run(cli, config, index, similarity)
        }
    }
}

fn run<L: LastfmClient>(
    cli: Cli,
    config: Config,
    index: MpdMusicIndex<FsCache>,
    similarity: SimilarityService<L, FsCache>,
) -> Result<()> {
    let collections_path = config
        .collections_file
        .clone()
        .expect("Config::load always fills in a collections_file default");
    let mut store = CollectionStore::new(collections_path);
    let collections_cache = FsCache::new(config.cache_dir()?, &config.cache_profile);
    store
        .feed(&collections_cache, &index, false)
        .wrap_err("loading collections")?;

    match cli.command {
        Command::Query { expression } => {
            let evaluator = Evaluator::new(&store, &index, &similarity, config.enable_command);
            let songs = evaluator.query(&expression, &mut rand::rng())?;
            for song in songs.iter() {
                println!("{song}");
            }
        }
        Command::Add { alias, expression } => {
            let evaluator = Evaluator::new(&store, &index, &similarity, config.enable_command);
            let songs: Vec<_> = evaluator.query(&expression, &mut rand::rng())?.into_iter().collect();
            store.add_songs(&alias, &songs, &index)?;
            finish(&mut store, &collections_cache, &index)?;
        }
        Command::Remove { alias, expression } => {
            let evaluator = Evaluator::new(&store, &index, &similarity, config.enable_command);
            let songs: Vec<_> = evaluator.query(&expression, &mut rand::rng())?.into_iter().collect();
            store.remove_songs(&alias, &songs, &index)?;
            finish(&mut store, &collections_cache, &index)?;
        }
        Command::Collections => {
            for (alias, collection) in store.iter() {
                let flags = match (collection.sort, collection.special) {
                    (true, _) => " (sort)",
                    (_, true) => " (special)",
                    _ => "",
                };
                println!("{alias} [{}]{flags}", collection.kind());
            }
        }
        Command::SyncSimilarity => {
            for artist in index.list_artists()? {
                if let Err(e) = similarity.artist_tags(&artist, true) {
                    mpdcol::warning!("could not refresh tags for artist {artist}: {e}");
                }
            }
            for (album, artist) in index.list_albums()? {
                if let Err(e) = similarity.album_tags(&artist, &album, true) {
                    mpdcol::warning!("could not refresh tags for album {album} ({artist}): {e}");
                }
            }
        }
        Command::Rescan => {
            index.update_cache()?;
            index.all_tags()?;
            store
                .feed(&collections_cache, &index, true)
                .wrap_err("refreshing collections")?;
            store.update_cache(&collections_cache);
        }
    }

    Ok(())
}

fn finish(
    store: &mut CollectionStore,
    cache: &FsCache,
    index: &impl MusicIndex,
) -> Result<()> {
    if store.take_needs_write() {
        store.write_file(index)?;
    }
    store.update_cache(cache);
    Ok(())
}

/// Stand-in used when no last.fm API key is configured, so `Evaluator`
/// and `sync-similarity` still have a `LastfmClient` to type-check
/// against. Always returns no tags rather than erroring, since an
/// absent key is a configuration choice, not a query failure.
struct NullLastfmClient;

impl LastfmClient for NullLastfmClient {
    fn artist_tags(&self, _artist: &str) -> Result<Vec<(String, u32)>> {
        Ok(Vec::new())
    }

    fn album_tags(&self, _artist: &str, _album: &str) -> Result<Vec<(String, u32)>> {
        Ok(Vec::new())
    }
}
