use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache configuration: {0}")]
    Config(String),
    /// The resolver failed; its error is passed through untouched.
    #[error(transparent)]
    Resolver(anyhow::Error),
    #[error("cached response for {key} could not be read back")]
    UnreadableHit {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write cached response: {0}")]
    Io(#[from] io::Error),
}

/// Storage failures never fail a request; the response is served uncached.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("payload of {size} bytes exceeds cache capacity of {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("cache storage I/O failed: {0}")]
    Io(#[from] io::Error),
}
