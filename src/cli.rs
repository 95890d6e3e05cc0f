//! §4.9 CLI (ambient): a thin `clap` front end mapping sub-commands onto
//! `CollectionStore`/evaluator calls. No column formatting, paging, or
//! dialogs — those are the out-of-scope interactive shell's job.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mpdcol", about = "Algebraic query language over MPD song collections")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate a query and print one file path per line.
    Query {
        expression: String,
    },
    /// Evaluate `EXPR` and add the resulting songs to `ALIAS`.
    Add {
        alias: String,
        expression: String,
    },
    /// Evaluate `EXPR` and remove the resulting songs from `ALIAS`.
    Remove {
        alias: String,
        expression: String,
    },
    /// List known collection aliases.
    Collections,
    /// Refresh the artist/album tag caches from the similarity service
    /// for every artist/album currently in the library.
    SyncSimilarity,
    /// Force-refresh the song/tag cache.
    Rescan,
}
