//! Storage adapters for sift: the [`VectorStore`] trait with in-memory and
//! Qdrant implementations, and the [`Embedder`] trait with HTTP and local
//! hashing implementations.
//!
//! Indexing and retrieval code depends only on the traits; which backend
//! runs underneath is a wiring decision made from configuration.

pub mod embedder;
pub mod in_memory_store;
pub mod qdrant_store;
pub mod vector_store;

pub use embedder::{EmbedError, Embedder, HashEmbedder, HttpEmbedder};
pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_store::QdrantStore;
pub use vector_store::{
    FieldCondition, FieldValue, Payload, ScoredVectorPoint, VectorFilter, VectorPoint,
    VectorStore, VectorStoreError,
};
