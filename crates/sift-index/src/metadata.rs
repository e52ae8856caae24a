//! Per-file metadata signals: language, complexity, and importance.
//!
//! [`Enhancer::enhance`] is a pure function of path + content (plus an
//! optional file age for the recency terms); it performs no I/O and is safe
//! to call repeatedly. The two scoring heuristics sit behind traits so they
//! can be swapped without touching the indexing pipeline.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use sift_core::{ChunkKind, ChunkMetadata};

/// Map an extension to a language identifier. Extension first; shebang
/// fallback for extensionless scripts.
#[must_use]
pub fn detect_language(path: &Path, content: &str) -> Option<&'static str> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let lang = match ext {
            "rs" => "rust",
            "py" | "pyi" => "python",
            "js" | "jsx" | "mjs" | "cjs" => "javascript",
            "ts" | "tsx" | "mts" | "cts" => "typescript",
            "go" => "go",
            "java" => "java",
            "c" | "h" => "c",
            "cpp" | "hpp" | "cc" | "hh" => "cpp",
            "rb" => "ruby",
            "cs" => "csharp",
            "sh" | "bash" | "zsh" => "shell",
            "md" | "markdown" => "markdown",
            "toml" => "toml",
            "yaml" | "yml" => "yaml",
            "json" | "jsonc" => "json",
            "txt" => "text",
            _ => "",
        };
        if !lang.is_empty() {
            return Some(lang);
        }
    }

    let first_line = content.lines().next().unwrap_or_default();
    if first_line.starts_with("#!") {
        if first_line.contains("python") {
            return Some("python");
        }
        if first_line.contains("node") {
            return Some("javascript");
        }
        if first_line.contains("bash") || first_line.contains("/sh") {
            return Some("shell");
        }
    }
    None
}

/// Whether a path should be chunked as code or plain text.
#[must_use]
pub fn chunk_kind_for(path: &Path) -> ChunkKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some(
            "rs" | "py" | "pyi" | "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" | "cts"
            | "go" | "java" | "c" | "h" | "cpp" | "hpp" | "cc" | "hh" | "rb" | "cs" | "sh"
            | "bash" | "zsh",
        ) => ChunkKind::Code,
        _ => ChunkKind::Text,
    }
}

static TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#\[(?:tokio::)?test\]|\bdef test_|\bit\(|\bdescribe\(|@Test\b|\bfunc Test[A-Z]")
        .expect("test regex is valid")
});

static DOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:///|//!|/\*\*)|^\s*"{3}|^\s*'{3}"#).expect("doc regex is valid")
});

static GENERATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)@generated|do not edit|auto-?generated|generated by")
        .expect("generated regex is valid")
});

static TYPED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w+\s*:\s*[A-Za-z_][\w\[\]<>,\s]*[=)\n,]|->\s*[A-Za-z_]|<[A-Z]\w*>")
        .expect("typed regex is valid")
});

static ERROR_HANDLING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\btry\b|\bcatch\b|\bexcept\b|\brescue\b|Result<|\.unwrap_or|if err != nil|\?;")
        .expect("error-handling regex is valid")
});

static CONTROL_FLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(if|elif|else|for|while|loop|match|switch|case|when|catch|except)\b")
        .expect("control-flow regex is valid")
});

/// Control-flow density heuristic, [0, 1].
pub trait ComplexityScorer: Send + Sync {
    fn score(&self, content: &str) -> f32;
}

/// Signals feeding importance scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportanceSignals {
    pub has_documentation: bool,
    pub has_tests: bool,
    pub has_types: bool,
    pub has_error_handling: bool,
    pub is_generated: bool,
    pub comment_ratio: f32,
    pub age: Option<Duration>,
}

/// Importance heuristic, [0, 1].
pub trait ImportanceScorer: Send + Sync {
    fn score(&self, signals: &ImportanceSignals) -> f32;
}

/// Weighted control-flow keywords per non-empty line.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordComplexity;

impl ComplexityScorer for KeywordComplexity {
    fn score(&self, content: &str) -> f32 {
        let lines = content.lines().filter(|l| !l.trim().is_empty()).count();
        if lines == 0 {
            return 0.0;
        }
        let mut weighted = 0.0f32;
        for m in CONTROL_FLOW_RE.find_iter(content) {
            weighted += match m.as_str() {
                "match" | "switch" | "case" | "when" => 1.5,
                "catch" | "except" => 1.3,
                "for" | "while" | "loop" => 1.2,
                _ => 1.0,
            };
        }
        #[expect(clippy::cast_precision_loss)]
        let per_line = weighted / lines as f32;
        // one branch every other line reads as maximally complex
        (per_line / 0.5).min(1.0)
    }
}

/// Base 0.5 adjusted by bounded additive terms, clamped to [0, 1].
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveImportance;

const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);
const MONTH: Duration = Duration::from_secs(30 * 24 * 3600);

impl ImportanceScorer for AdditiveImportance {
    fn score(&self, signals: &ImportanceSignals) -> f32 {
        let mut score = 0.5f32;
        if signals.has_documentation {
            score += 0.1;
        }
        if signals.has_tests {
            score += 0.1;
        }
        if signals.has_types {
            score += 0.05;
        }
        if signals.has_error_handling {
            score += 0.05;
        }
        if signals.is_generated {
            score -= 0.2;
        }
        match signals.age {
            Some(age) if age < WEEK => score += 0.1,
            Some(age) if age < MONTH => score += 0.05,
            _ => {}
        }
        if (0.1..=0.3).contains(&signals.comment_ratio) {
            score += 0.05;
        }
        score.clamp(0.0, 1.0)
    }
}

/// Derives [`ChunkMetadata`] for a file.
pub struct Enhancer {
    complexity: Box<dyn ComplexityScorer>,
    importance: Box<dyn ImportanceScorer>,
}

impl Default for Enhancer {
    fn default() -> Self {
        Self {
            complexity: Box::new(KeywordComplexity),
            importance: Box::new(AdditiveImportance),
        }
    }
}

impl std::fmt::Debug for Enhancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enhancer").finish_non_exhaustive()
    }
}

impl Enhancer {
    #[must_use]
    pub fn new(
        complexity: Box<dyn ComplexityScorer>,
        importance: Box<dyn ImportanceScorer>,
    ) -> Self {
        Self {
            complexity,
            importance,
        }
    }

    /// Compute metadata for one file. `age` is the time since the file was
    /// last modified; `None` skips the recency terms.
    #[must_use]
    pub fn enhance(&self, path: &Path, content: &str, age: Option<Duration>) -> ChunkMetadata {
        let comment_ratio = comment_ratio(content);
        let path_str = path.to_string_lossy();
        let has_tests = TEST_RE.is_match(content)
            || path_str.contains("test")
            || path_str.contains("spec");
        let is_generated = {
            let head: String = content.lines().take(10).collect::<Vec<_>>().join("\n");
            GENERATED_RE.is_match(&head) || path_str.contains("generated")
        };

        let signals = ImportanceSignals {
            has_documentation: DOC_RE.is_match(content),
            has_tests,
            has_types: TYPED_RE.is_match(content),
            has_error_handling: ERROR_HANDLING_RE.is_match(content),
            is_generated,
            comment_ratio,
            age,
        };

        ChunkMetadata {
            language: detect_language(path, content).map(str::to_owned),
            importance_score: self.importance.score(&signals),
            complexity_score: self.complexity.score(content),
            comment_ratio,
            has_tests,
            has_documentation: signals.has_documentation,
            is_config: is_config(path),
            is_generated,
            truncated: false,
            ..ChunkMetadata::default()
        }
    }
}

fn is_config(path: &Path) -> bool {
    if matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("toml" | "yaml" | "yml" | "json" | "ini" | "cfg" | "conf")
    ) {
        return true;
    }
    matches!(
        path.file_name().and_then(|n| n.to_str()),
        Some("Dockerfile" | "Makefile" | ".env" | ".gitignore")
    )
}

fn comment_ratio(content: &str) -> f32 {
    let mut total = 0usize;
    let mut comments = 0usize;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        total += 1;
        if trimmed.starts_with("//")
            || trimmed.starts_with('#') && !trimmed.starts_with("#!")
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*')
            || trimmed.starts_with("--")
        {
            comments += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    #[expect(clippy::cast_precision_loss)]
    let ratio = comments as f32 / total as f32;
    ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_by_extension() {
        assert_eq!(detect_language(Path::new("src/main.rs"), ""), Some("rust"));
        assert_eq!(detect_language(Path::new("app.py"), ""), Some("python"));
        assert_eq!(detect_language(Path::new("a.tsx"), ""), Some("typescript"));
        assert_eq!(detect_language(Path::new("Cargo.toml"), ""), Some("toml"));
    }

    #[test]
    fn detect_language_shebang_fallback() {
        assert_eq!(
            detect_language(Path::new("deploy"), "#!/usr/bin/env python\nprint()"),
            Some("python")
        );
        assert_eq!(
            detect_language(Path::new("run"), "#!/bin/bash\necho hi"),
            Some("shell")
        );
        assert_eq!(detect_language(Path::new("mystery"), "plain text"), None);
    }

    #[test]
    fn chunk_kind_split() {
        assert_eq!(chunk_kind_for(Path::new("a.rs")), ChunkKind::Code);
        assert_eq!(chunk_kind_for(Path::new("a.go")), ChunkKind::Code);
        assert_eq!(chunk_kind_for(Path::new("a.md")), ChunkKind::Text);
        assert_eq!(chunk_kind_for(Path::new("a.toml")), ChunkKind::Text);
        assert_eq!(chunk_kind_for(Path::new("no_ext")), ChunkKind::Text);
    }

    #[test]
    fn enhance_is_pure() {
        let enhancer = Enhancer::default();
        let content = "/// Adds numbers.\nfn add(a: u32, b: u32) -> u32 { a + b }\n";
        let a = enhancer.enhance(Path::new("src/math.rs"), content, None);
        let b = enhancer.enhance(Path::new("src/math.rs"), content, None);
        assert_eq!(a, b);
    }

    #[test]
    fn documented_tested_file_scores_above_base() {
        let enhancer = Enhancer::default();
        let content = "/// Doc.\nfn f() {}\n#[test]\nfn t() { f(); }\n";
        let meta = enhancer.enhance(Path::new("src/lib.rs"), content, None);
        assert!(meta.has_documentation);
        assert!(meta.has_tests);
        assert!(meta.importance_score > 0.5);
    }

    #[test]
    fn generated_file_scores_below_base() {
        let enhancer = Enhancer::default();
        let content = "// @generated by protoc. DO NOT EDIT.\npub struct Raw {}\n";
        let meta = enhancer.enhance(Path::new("src/raw.rs"), content, None);
        assert!(meta.is_generated);
        assert!(meta.importance_score < 0.5);
    }

    #[test]
    fn importance_clamped_to_unit_interval() {
        let scorer = AdditiveImportance;
        let all_on = ImportanceSignals {
            has_documentation: true,
            has_tests: true,
            has_types: true,
            has_error_handling: true,
            is_generated: false,
            comment_ratio: 0.2,
            age: Some(Duration::from_secs(3600)),
        };
        let score = scorer.score(&all_on);
        assert!((0.0..=1.0).contains(&score));
        assert!(score > 0.8);
    }

    #[test]
    fn recency_tiers() {
        let scorer = AdditiveImportance;
        let base = ImportanceSignals::default();
        let fresh = ImportanceSignals {
            age: Some(Duration::from_secs(24 * 3600)),
            ..base
        };
        let recent = ImportanceSignals {
            age: Some(Duration::from_secs(14 * 24 * 3600)),
            ..base
        };
        let stale = ImportanceSignals {
            age: Some(Duration::from_secs(90 * 24 * 3600)),
            ..base
        };
        assert!(scorer.score(&fresh) > scorer.score(&recent));
        assert!(scorer.score(&recent) > scorer.score(&stale));
        assert!((scorer.score(&stale) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn complexity_zero_for_flat_code() {
        let score = KeywordComplexity.score("let a = 1;\nlet b = 2;\n");
        assert!(score.abs() < f32::EPSILON);
    }

    #[test]
    fn complexity_grows_with_branching() {
        let flat = "a();\nb();\nc();\nd();\n";
        let branchy = "if x {\n} else if y {\n} else {\n}\nfor i in v {\n  match i {\n  }\n}\n";
        assert!(KeywordComplexity.score(branchy) > KeywordComplexity.score(flat));
        assert!(KeywordComplexity.score(branchy) <= 1.0);
    }

    #[test]
    fn comment_ratio_counts_line_comments() {
        let content = "// one\ncode();\n// two\nmore();\n";
        assert!((comment_ratio(content) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn comment_ratio_ignores_shebang() {
        let content = "#!/usr/bin/env bash\necho hi\n";
        assert!(comment_ratio(content).abs() < f32::EPSILON);
    }

    #[test]
    fn config_paths_flagged() {
        let enhancer = Enhancer::default();
        assert!(enhancer.enhance(Path::new("Cargo.toml"), "[package]", None).is_config);
        assert!(enhancer.enhance(Path::new("Dockerfile"), "FROM rust", None).is_config);
        assert!(!enhancer.enhance(Path::new("src/lib.rs"), "fn f() {}", None).is_config);
    }

    #[test]
    fn custom_scorers_are_used() {
        struct Flat;
        impl ComplexityScorer for Flat {
            fn score(&self, _: &str) -> f32 {
                0.25
            }
        }
        struct Fixed;
        impl ImportanceScorer for Fixed {
            fn score(&self, _: &ImportanceSignals) -> f32 {
                0.9
            }
        }
        let enhancer = Enhancer::new(Box::new(Flat), Box::new(Fixed));
        let meta = enhancer.enhance(Path::new("x.rs"), "if a { b } else { c }", None);
        assert!((meta.complexity_score - 0.25).abs() < f32::EPSILON);
        assert!((meta.importance_score - 0.9).abs() < f32::EPSILON);
    }
}
