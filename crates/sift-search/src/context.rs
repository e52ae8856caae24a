//! Formatting of optimized hits into a context payload.

use std::fmt::Write;

use sift_core::SearchHit;

/// Render hits as an XML block for injection into a consumer prompt.
#[must_use]
pub fn format_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut out = String::from("<context>\n");
    for hit in hits {
        let language = hit.chunk.metadata.language.as_deref().unwrap_or("unknown");
        let _ = writeln!(
            out,
            "  <chunk path=\"{}\" ordinal=\"{}\" score=\"{:.2}\" language=\"{}\" truncated=\"{}\">",
            hit.chunk.path,
            hit.chunk.ordinal,
            hit.score,
            language,
            hit.chunk.metadata.truncated,
        );
        out.push_str(&hit.chunk.content);
        out.push_str("\n  </chunk>\n");
    }
    out.push_str("</context>");
    out
}
