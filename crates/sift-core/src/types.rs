//! Core domain types shared across the workspace.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Current layout version of [`ChunkMetadata`]. Bump when fields change
/// meaning so stored payloads can be migrated or dropped.
pub const METADATA_VERSION: u32 = 1;

/// Position of a chunk within its source file.
///
/// `major` counts logical segments (declarations for code, the whole body
/// for plain text). `minor` is set only when a segment was too large for
/// one token window and had to be sliced; it counts windows within the
/// segment. Displayed as `"3"` or `"3.1"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ordinal {
    pub major: u32,
    pub minor: Option<u32>,
}

impl Ordinal {
    #[must_use]
    pub fn new(major: u32) -> Self {
        Self { major, minor: None }
    }

    #[must_use]
    pub fn windowed(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor: Some(minor),
        }
    }
}

impl std::fmt::Display for Ordinal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.minor {
            Some(minor) => write!(f, "{}.{minor}", self.major),
            None => write!(f, "{}", self.major),
        }
    }
}

impl std::str::FromStr for Ordinal {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((major, minor)) => Ok(Self {
                major: major.parse()?,
                minor: Some(minor.parse()?),
            }),
            None => Ok(Self {
                major: s.parse()?,
                minor: None,
            }),
        }
    }
}

/// Stable chunk identity: a UUIDv5 over `"{path}#{ordinal}"`.
///
/// Identical `(path, ordinal)` always derives the identical id, which is
/// what makes upserts idempotent and lets the manifest and vector store be
/// reconciled independently. The UUID form doubles as a valid Qdrant point
/// id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    #[must_use]
    pub fn derive(path: &str, ordinal: Ordinal) -> Self {
        let name = format!("{path}#{ordinal}");
        Self(uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, name.as_bytes()).to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChunkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a chunk came from source code or plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Code,
    Text,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Text => "text",
        }
    }
}

/// Per-chunk signals derived from the source file.
///
/// A fixed struct rather than an open map: every field has one meaning and
/// the `version` tag tracks layout changes across stored payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub version: u32,
    pub language: Option<String>,
    pub importance_score: f32,
    pub complexity_score: f32,
    pub comment_ratio: f32,
    pub has_tests: bool,
    pub has_documentation: bool,
    pub is_config: bool,
    pub is_generated: bool,
    pub truncated: bool,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            language: None,
            importance_score: 0.5,
            complexity_score: 0.0,
            comment_ratio: 0.0,
            has_tests: false,
            has_documentation: false,
            is_config: false,
            is_generated: false,
            truncated: false,
        }
    }
}

/// A token-bounded slice of a file, the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub path: String,
    pub ordinal: Ordinal,
    pub kind: ChunkKind,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Build a chunk, deriving its id from `(path, ordinal)`.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        ordinal: Ordinal,
        kind: ChunkKind,
        content: impl Into<String>,
        metadata: ChunkMetadata,
    ) -> Self {
        let path = path.into();
        let id = ChunkId::derive(&path, ordinal);
        Self {
            id,
            path,
            ordinal,
            kind,
            content: content.into(),
            metadata,
        }
    }

    /// Dedup key used by the hybrid merge and reranks.
    #[must_use]
    pub fn key(&self) -> (&str, Ordinal) {
        (&self.path, self.ordinal)
    }
}

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

/// A filesystem change, produced by the watcher and retired by the indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<PathBuf>,
    pub timestamp: SystemTime,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
            timestamp: SystemTime::now(),
        }
    }

    #[must_use]
    pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Moved,
            path: to.into(),
            old_path: Some(from.into()),
            timestamp: SystemTime::now(),
        }
    }
}

/// A scored retrieval result. Ephemeral: produced per query, consumed by
/// the optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}
