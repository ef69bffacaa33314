use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("link file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },

    #[error("could not persist links: {0}")]
    DurableWrite(#[source] std::io::Error),

    #[error("song {0} not found")]
    SongNotFound(String),

    #[error("invalid song name '{0}'")]
    InvalidName(String),

    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("filesystem error: {0}")]
    Fs(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
