use thiserror::Error;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("partition key '{0}' not found in document")]
    PartitionKeyNotFound(String),

    #[error("index key '{0}' not found in document")]
    IndexKeyNotFound(String),

    #[error("shard '{0}' not found")]
    ShardNotFound(String),

    #[error("shard '{0}' already exists")]
    ShardAlreadyExists(String),

    #[error("failed to persist shard '{id}': {source}")]
    ShardPersistFailure {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("encode failure: {0}")]
    EncodeFailure(String),

    #[error("codec failure: {0}")]
    CodecFailure(String),

    #[error("no document matched the predicate")]
    DocumentNotFound,

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("database directory is locked by another process")]
    LockContended,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::DecodeFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
