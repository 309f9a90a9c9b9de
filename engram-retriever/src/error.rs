//! Error types shared across the index engine

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error type covering every failure class the engine surfaces.
///
/// Configuration errors are rejected at setup. Index corruption is recovered
/// automatically by a full rebuild at startup. Embedding and storage failures
/// are fatal to the current pass or search call; prior on-disk state is never
/// partially overwritten.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid threshold, top-k, interval, or other setup parameter
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// On-disk index unreadable or metadata schema unexpected
    #[error("index corruption: {message}")]
    IndexCorruption { message: String },

    /// The embedding provider failed
    #[error("embedding failed: {source}")]
    Embedding {
        #[from]
        source: engram_embed::EmbedError,
    },

    /// The metadata store failed
    #[error("storage failure: {source}")]
    Storage {
        #[from]
        source: sqlx::Error,
    },

    /// Disk I/O failed while persisting or loading the vector index
    #[error("storage failure: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The commit log collaborator failed
    #[error("commit log error: {message}")]
    Log { message: String },
}

impl EngineError {
    /// Create a configuration error with a custom message.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an index corruption error with a custom message.
    pub fn corruption<S: Into<String>>(message: S) -> Self {
        Self::IndexCorruption {
            message: message.into(),
        }
    }

    /// Create a commit log error with a custom message.
    pub fn log<S: Into<String>>(message: S) -> Self {
        Self::Log {
            message: message.into(),
        }
    }
}
