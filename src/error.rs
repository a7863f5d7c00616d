use thiserror::Error;

use crate::{file_manager::BlockId, parser::ParserError};

pub type DbResult<T> = Result<T, DbError>;

/// Every failure the engine can surface to a client
#[derive(Debug, Error)]
pub enum DbError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad block reference: {0}")]
    BadBlock(BlockId),

    #[error("buffer abort: timed out waiting for a free buffer to pin {0}")]
    BufferAbort(BlockId),

    #[error("lock abort: timed out waiting for a lock on {0}")]
    LockAbort(BlockId),

    #[error(transparent)]
    Syntax(#[from] ParserError),

    #[error("no such table: {0}")]
    TableNotFound(String),

    #[error("no such field: {0}")]
    FieldNotFound(String),

    #[error("{0} already exists")]
    DuplicateName(String),

    #[error("catalog error: {0}")]
    Schema(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("no such index: {0}")]
    IndexNotFound(String),

    #[error("index {index} has no entry for value {value} at {rid}")]
    RecordNotFound {
        index: String,
        value: String,
        rid: String,
    },

    #[error("block {0} is not pinned by this transaction")]
    NotPinned(BlockId),

    #[error("invalid log record: {0}")]
    InvalidLogRecord(String),

    #[error("scan does not support updates")]
    NotUpdatable,

    #[error("scan is not positioned on a record")]
    NoCurrentRecord,
}

impl DbError {
    /// Errors after which the transaction cannot continue and must be rolled back
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            DbError::Io(_)
                | DbError::BadBlock(_)
                | DbError::BufferAbort(_)
                | DbError::LockAbort(_)
                | DbError::InvalidLogRecord(_)
        )
    }
}
