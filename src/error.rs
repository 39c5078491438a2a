use crate::DocId;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting, indexing, or classifying points.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed line or token in the sparse text format.
    #[error("parse error: {0}")]
    Parse(String),

    /// A label id came out negative after 0-basing, which indicates a
    /// mismatch between the input encoding and the configured label base.
    #[error(
        "obtained negative label id {label} in line \"{line}\"; check whether the problem \
         is binary or multiclass and whether label ids are 0-based or 1-based"
    )]
    InvalidLabel { line: String, label: i64 },

    /// A missing column, a structurally wrong column type, or an output
    /// column name collision.
    #[error("schema error: {0}")]
    Schema(String),

    /// The supplied classification function failed for one point.
    #[error("failed to classify point {point_id}: {msg}")]
    Classification { point_id: DocId, msg: String },
}
