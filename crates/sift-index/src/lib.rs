//! Corpus indexing for sift: token-bounded chunking, per-file metadata
//! enrichment, an idempotent incremental indexer over a dual vector +
//! `SQLite` store, and a debounced filesystem watcher feeding it.
//!
//! The flow is watcher → debounced [`sift_core::ChangeEvent`] batches →
//! [`indexer::Indexer`] → [`store::ChunkStore`] mutation, with the
//! [`manifest::FileHashManifest`] recording what content each path last
//! contributed.

pub mod chunker;
pub mod error;
pub mod indexer;
pub mod manifest;
pub mod metadata;
pub mod store;
pub mod watcher;

pub use error::{IndexError, Result};
