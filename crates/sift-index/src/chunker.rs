//! Declaration-aware chunking into token-bounded, overlapping windows.
//!
//! Code is first split at top-level declaration boundaries, then each
//! segment is token-windowed; plain text is windowed directly. Output is
//! fully deterministic: identical input always yields identical chunk ids
//! and ordinals, which is what makes re-indexing idempotent.

use std::sync::LazyLock;

use regex::Regex;

use sift_core::config::ChunkConfig;
use sift_core::token;
use sift_core::{Chunk, ChunkKind, ChunkMetadata, Ordinal};

/// A declaration boundary only opens a new segment once this many bytes
/// have accumulated since the previous split, so runs of tiny
/// declarations stay together in one segment.
const MIN_SEGMENT_CHARS: usize = 300;

static BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]{0,8}(?:pub(?:\([a-z]+\))?[ \t]+)?(?:export[ \t]+)?(?:default[ \t]+)?(?:public[ \t]+|private[ \t]+|protected[ \t]+)?(?:static[ \t]+)?(?:async[ \t]+)?(?:fn|func|function|def|class|struct|enum|trait|impl|interface|type|mod|module)\b",
    )
    .expect("boundary regex is valid")
});

/// Split a file into chunks.
///
/// Chunk metadata is left at its default here; the indexer overlays the
/// per-file metadata after enhancement. Ids depend only on
/// `(path, ordinal)`.
#[must_use]
pub fn chunk_file(path: &str, text: &str, kind: ChunkKind, config: &ChunkConfig) -> Vec<Chunk> {
    match kind {
        ChunkKind::Text => window_whole(path, text, kind, config.text_tokens, config.overlap_tokens),
        ChunkKind::Code => {
            let segments = split_declarations(text);
            if segments.len() < 2 {
                // No usable boundaries: window the file directly with plain
                // major ordinals, same as text.
                return window_whole(path, text, kind, config.code_tokens, config.overlap_tokens);
            }

            let mut chunks = Vec::new();
            let mut major = 0u32;
            for segment in segments {
                if token::count(segment) == 0 {
                    continue;
                }
                if token::count(segment) <= config.code_tokens {
                    chunks.push(Chunk::new(
                        path,
                        Ordinal::new(major),
                        kind,
                        segment.trim_matches('\n'),
                        ChunkMetadata::default(),
                    ));
                } else {
                    for (j, window) in token::windows(segment, config.code_tokens, config.overlap_tokens)
                        .into_iter()
                        .enumerate()
                    {
                        let minor = u32::try_from(j).unwrap_or(u32::MAX);
                        chunks.push(Chunk::new(
                            path,
                            Ordinal::windowed(major, minor),
                            kind,
                            window,
                            ChunkMetadata::default(),
                        ));
                    }
                }
                major += 1;
            }
            chunks
        }
    }
}

fn window_whole(
    path: &str,
    text: &str,
    kind: ChunkKind,
    limit: usize,
    overlap: usize,
) -> Vec<Chunk> {
    if token::count(text) == 0 {
        return Vec::new();
    }
    if token::count(text) <= limit {
        return vec![Chunk::new(
            path,
            Ordinal::new(0),
            kind,
            text.trim_matches('\n'),
            ChunkMetadata::default(),
        )];
    }
    token::windows(text, limit, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, window)| {
            let major = u32::try_from(i).unwrap_or(u32::MAX);
            Chunk::new(path, Ordinal::new(major), kind, window, ChunkMetadata::default())
        })
        .collect()
}

/// Cut `text` at declaration boundaries, honoring [`MIN_SEGMENT_CHARS`].
fn split_declarations(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut last = 0usize;
    for m in BOUNDARY_RE.find_iter(text) {
        let at = m.start();
        if at > last && at - last >= MIN_SEGMENT_CHARS {
            segments.push(&text[last..at]);
            last = at;
        }
    }
    segments.push(&text[last..]);
    segments
}
