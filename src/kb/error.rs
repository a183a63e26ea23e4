//! Knowledge-base storage error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or dumping a knowledge base.
#[derive(Error, Debug)]
pub enum KbError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A relation listed in the info file has rows but no data file.
    #[error("relation '{relation}' declares {declared_rows} rows but '{path}' does not exist")]
    MissingRelationFile {
        relation: String,
        declared_rows: usize,
        path: PathBuf,
    },

    /// A relation data file is shorter than its declared size.
    #[error("relation '{relation}': expected {expected} bytes, found {actual}")]
    ShortRead {
        relation: String,
        expected: u64,
        actual: u64,
    },

    /// A malformed line in the relation info file.
    #[error("bad relation info at line {line_no}: '{line}'")]
    BadRelationInfo { line_no: usize, line: String },

    /// Relation looked up by an unknown name.
    #[error("relation '{0}' not found")]
    RelationNotFound(String),
}

/// Result type for KB storage operations.
pub type KbResult<T> = Result<T, KbError>;
