//! Domain types, deterministic tokenization, and configuration for sift.
//!
//! Everything downstream (stores, indexer, retrieval, jobs) speaks the types
//! defined here: [`types::Chunk`] is the unit of indexing and retrieval,
//! [`types::ChangeEvent`] is the unit of change, and [`config::Config`] is
//! the single source of tunables.

pub mod config;
pub mod token;
pub mod types;

pub use config::{Config, ConfigError};
pub use types::{ChangeEvent, ChangeKind, Chunk, ChunkId, ChunkKind, ChunkMetadata, Ordinal, SearchHit};
