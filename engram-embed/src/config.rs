//! Embedding configuration

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the hash-based embedding provider.
///
/// The dimension fixes the length of every produced vector; the n-gram size
/// controls how much local context each hashed feature carries. Both are part
/// of the provider signature, so changing either forces downstream indexes to
/// rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Dimension of the produced embedding vectors
    pub dimension: usize,
    /// Size in bytes of the hashed character n-grams
    pub ngram_size: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            dimension: 256,
            ngram_size: 3,
        }
    }
}

impl EmbedConfig {
    /// Create a configuration with the given vector dimension and default
    /// n-gram size.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Set the n-gram size used for feature hashing.
    pub fn with_ngram_size(mut self, ngram_size: usize) -> Self {
        self.ngram_size = ngram_size;
        self
    }

    /// Validate the configuration, rejecting degenerate settings.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(EmbedError::invalid_config("dimension must be positive"));
        }
        if self.ngram_size == 0 {
            return Err(EmbedError::invalid_config("ngram_size must be positive"));
        }
        Ok(())
    }

    /// Stable identifier for this model configuration.
    pub fn model_id(&self) -> String {
        format!("hash-ngram{}-d{}", self.ngram_size, self.dimension)
    }
}
