//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::Result;
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result, inferring the dimension from the first
    /// vector (0 when empty).
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Implementations must be deterministic for a fixed configuration: the
/// index layer persists [`signature`](Self::signature) next to the vectors it
/// stores and forces a full rebuild whenever the signature changes.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Stable hash of the active embedding configuration.
    ///
    /// Two providers with the same signature must produce identical vectors
    /// for identical inputs.
    fn signature(&self) -> String {
        blake3::hash(format!("{}:{}", self.provider_name(), self.dimension()).as_bytes())
            .to_hex()
            .to_string()
    }
}

/// Deterministic embedding provider based on feature-hashed character n-grams.
///
/// Text is lowercased and whitespace-normalized, then every byte n-gram is
/// hashed with FNV into one of `dimension` buckets with a hash-derived sign.
/// The accumulated vector is L2-normalized, so cosine similarity between two
/// texts reflects their shared n-grams. Empty text maps to the zero vector.
#[derive(Debug, Clone)]
pub struct HashEmbedProvider {
    config: EmbedConfig,
}

impl HashEmbedProvider {
    /// Create a provider after validating the configuration.
    pub fn new(config: EmbedConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!("Initializing embedding provider: {}", config.model_id());
        Ok(Self { config })
    }

    /// The active configuration.
    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let dimension = self.config.dimension;
        let mut accumulator = vec![0f32; dimension];

        let normalized = text
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let bytes = normalized.as_bytes();

        if bytes.is_empty() {
            return accumulator;
        }

        let ngram = self.config.ngram_size.min(bytes.len());
        for window in bytes.windows(ngram) {
            let mut hasher = FnvHasher::default();
            hasher.write(window);
            let hash = hasher.finish();
            let bucket = (hash % dimension as u64) as usize;
            // High bit picks the sign so collisions partially cancel instead
            // of always inflating a bucket.
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            accumulator[bucket] += sign;
        }

        let norm: f32 = accumulator.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut accumulator {
                *value /= norm;
            }
        }
        accumulator
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        tracing::debug!("Generating embeddings for {} texts", texts.len());
        let embeddings = texts.iter().map(|text| self.embed_sync(text)).collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "hash-ngram"
    }

    fn signature(&self) -> String {
        blake3::hash(
            format!(
                "{}:{}:{}",
                self.provider_name(),
                self.config.model_id(),
                self.config.dimension
            )
            .as_bytes(),
        )
        .to_hex()
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tracing_test::traced_test;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    #[traced_test]
    async fn batch_embedding_is_logged() -> Result<()> {
        let provider = HashEmbedProvider::new(EmbedConfig::default())?;
        provider
            .embed_texts(&["one".to_string(), "two".to_string()])
            .await?;
        assert!(logs_contain("Generating embeddings for 2 texts"));
        Ok(())
    }

    #[tokio::test]
    async fn embeddings_are_deterministic() -> Result<()> {
        let provider = HashEmbedProvider::new(EmbedConfig::default())?;
        let first = provider.embed_text("add feature A").await?;
        let second = provider.embed_text("add feature A").await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn embeddings_have_configured_dimension_and_unit_norm() -> Result<()> {
        let provider = HashEmbedProvider::new(EmbedConfig::new(128))?;
        let vector = provider.embed_text("some memory snapshot text").await?;
        assert_eq!(vector.len(), 128);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[tokio::test]
    async fn empty_text_maps_to_zero_vector() -> Result<()> {
        let provider = HashEmbedProvider::new(EmbedConfig::default())?;
        let vector = provider.embed_text("").await?;
        assert!(vector.iter().all(|v| *v == 0.0));
        let whitespace = provider.embed_text("   \n\t ").await?;
        assert!(whitespace.iter().all(|v| *v == 0.0));
        Ok(())
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() -> Result<()> {
        let provider = HashEmbedProvider::new(EmbedConfig::default())?;
        let query = provider.embed_text("feature A").await?;
        let related = provider.embed_text("Add feature A").await?;
        let unrelated = provider.embed_text("Unrelated topic").await?;
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
        assert!(cosine(&query, &related) > 0.3);
        Ok(())
    }

    #[tokio::test]
    async fn case_and_whitespace_are_normalized() -> Result<()> {
        let provider = HashEmbedProvider::new(EmbedConfig::default())?;
        let plain = provider.embed_text("add feature a").await?;
        let shouty = provider.embed_text("  Add   FEATURE a ").await?;
        assert_eq!(plain, shouty);
        Ok(())
    }

    #[tokio::test]
    async fn batch_matches_single_embedding() -> Result<()> {
        let provider = HashEmbedProvider::new(EmbedConfig::default())?;
        let texts = vec!["first note".to_string(), "second note".to_string()];
        let batch = provider.embed_texts(&texts).await?;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dimension, provider.dimension());
        assert_eq!(batch.embeddings[0], provider.embed_text("first note").await?);
        Ok(())
    }

    #[tokio::test]
    async fn short_text_still_produces_a_vector() -> Result<()> {
        let provider = HashEmbedProvider::new(EmbedConfig::default())?;
        let vector = provider.embed_text("ab").await?;
        assert!(vector.iter().any(|v| *v != 0.0));
        Ok(())
    }

    #[test]
    fn signature_tracks_configuration() -> Result<()> {
        let small = HashEmbedProvider::new(EmbedConfig::new(64))?;
        let large = HashEmbedProvider::new(EmbedConfig::new(256))?;
        let same = HashEmbedProvider::new(EmbedConfig::new(64))?;
        assert_ne!(small.signature(), large.signature());
        assert_eq!(small.signature(), same.signature());
        Ok(())
    }
}
