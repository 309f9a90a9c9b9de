//! Storage layer: durable slot-to-commit metadata next to the vector index.

pub mod metadata_store;

pub use metadata_store::{MetadataStore, SyncState};
