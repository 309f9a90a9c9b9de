//! engram-embed: deterministic text embedding for the engram memory index.
//!
//! This crate defines the embedding boundary used by engram-retriever: the
//! [`EmbeddingProvider`] trait plus a self-contained, deterministic
//! implementation based on feature-hashed character n-grams. The provider is
//! pure: the same text and configuration always produce the same vector,
//! which is what lets the index layer detect configuration changes via
//! [`EmbeddingProvider::signature`] and rebuild when they happen.
//!
//! ## Key Modules
//!
//! - **[`config`]**: Embedding configuration and validation
//! - **[`provider`]**: The provider trait and [`provider::HashEmbedProvider`]
//! - **[`error`]**: Error types for embedding operations

pub mod config;
pub mod error;
pub mod provider;

pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, HashEmbedProvider};
