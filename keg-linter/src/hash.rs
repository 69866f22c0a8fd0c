//! Formula hashing for change detection
//!
//! Computes a deterministic hash of formula content, ignoring whitespace,
//! empty lines, and comments, so reformatting a formula doesn't count as a
//! change when deciding whether a reinstall is needed.

use std::path::Path;

use crate::error::Result;

/// Compute a normalized hash of formula content.
///
/// Empty lines and comment-only lines are dropped and every remaining line
/// is trimmed before hashing with BLAKE3.
pub fn compute_formula_hash(content: &str) -> String {
    let normalized: String = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");

    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}

/// Compute hash from a file path.
pub fn hash_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    Ok(compute_formula_hash(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_consistency() {
        let content = "class Foo < Formula\n  desc \"foo\"\nend";
        assert_eq!(
            compute_formula_hash(content),
            compute_formula_hash("class Foo < Formula\n  desc \"foo\"\nend")
        );
    }

    #[test]
    fn test_hash_ignores_formatting() {
        let content1 = "class Foo < Formula\n\n    desc \"foo\"\n# note\nend";
        let content2 = "class Foo < Formula\n  desc \"foo\"\nend";
        assert_eq!(compute_formula_hash(content1), compute_formula_hash(content2));
    }

    #[test]
    fn test_hash_detects_changes() {
        let content1 = "class Foo < Formula\n  desc \"foo\"\nend";
        let content2 = "class Foo < Formula\n  desc \"bar\"\nend";
        assert_ne!(compute_formula_hash(content1), compute_formula_hash(content2));
    }
}
