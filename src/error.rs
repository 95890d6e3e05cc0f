//! Typed errors for the query language proper.
//!
//! Everything that is fatal *to a single query evaluation* lives here so
//! tests can match on an exact variant instead of scraping report text. I/O
//! failures around the language (disk, network, the daemon connection) stay
//! as `color_eyre::Report` — they're not part of the grammar.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum QueryError {
    #[error("illegal character '{0}'")]
    IllegalCharacter(char),

    #[error("Syntax error")]
    SyntaxError,

    #[error("Collection [{0}] does not exist")]
    UnknownCollection(String),

    #[error("Collection cycle detected at [{0}]")]
    CollectionCycle(String),

    #[error("Filter [{0}] does not exist")]
    UnknownFilter(String),

    #[error("Modifier [{0}] does not exist")]
    UnknownModifier(String),

    #[error("Error while executing `command` in collection [{alias}]")]
    CommandFailed { alias: String },
}

pub type QueryResult<T> = Result<T, QueryError>;
