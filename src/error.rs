use thiserror::Error;

use crate::block::{Block, DocumentKind};
use crate::ids::Namespace;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("expected a {expected} document, found a {found}")]
    DocumentKindMismatch {
        expected: DocumentKind,
        found: DocumentKind,
    },

    #[error("block {block:?} declares {declared} bytes but only {available} remain")]
    TruncatedBlock {
        block: Block,
        declared: u64,
        available: u64,
    },

    #[error("unknown {namespace:?} identifier {id:?}")]
    UnknownIdentifier { namespace: Namespace, id: String },

    #[error(
        "cannot merge deltas {first_old}->{first_new} and {second_old}->{second_new}: {reason}"
    )]
    NonContiguousMerge {
        first_old: u32,
        first_new: u32,
        second_old: u32,
        second_new: u32,
        reason: &'static str,
    },

    #[error("{namespace:?} id {id} is {old:?} in the older snapshot but {new:?} in the newer one")]
    IdChainMismatch {
        namespace: Namespace,
        id: u32,
        old: String,
        new: Option<String>,
    },

    #[error("delta adds {namespace:?} ids above {delta_skip}, snapshot ends at {last_id}")]
    IdBaseMismatch {
        namespace: Namespace,
        delta_skip: u32,
        last_id: u32,
    },

    #[error("delta applies to version {expected}, snapshot is version {found}")]
    BaseVersionMismatch { expected: u32, found: u32 },

    #[error("failed to decompress block {block:?}")]
    DecompressionFailure {
        block: Block,
        source: std::io::Error,
    },

    #[error("failed to compress block")]
    CompressionFailure(#[source] std::io::Error),

    #[error("block {block:?} is malformed: {message}")]
    MalformedBlock { block: Block, message: String },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("shape {shape_id} has {points} point(s), at least 2 are required")]
    InvalidShape { shape_id: u32, points: usize },

    #[error("document header has no version")]
    MissingVersion,

    #[error("schema version {found} is not compatible with {expected}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("required table {0} is missing")]
    MissingTable(String),

    #[error("cannot read table {table}")]
    TableRead {
        table: String,
        #[source]
        source: csv::Error,
    },

    #[error("invalid value {value:?} for {table}.{column}")]
    InvalidValue {
        table: String,
        column: String,
        value: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FeedError {
    pub(crate) fn malformed_block(block: Block, message: impl ToString) -> Self {
        FeedError::MalformedBlock {
            block,
            message: message.to_string(),
        }
    }

    pub(crate) fn invalid_value(table: &str, column: &str, value: &str) -> Self {
        FeedError::InvalidValue {
            table: table.to_string(),
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}
