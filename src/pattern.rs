//! Shell-style glob matching.
//!
//! `fnmatch` follows the classic shell semantics: `*` and `?` match any character,
//! separators included, and matching is case sensitive. `path_match` applies it per
//! path segment and refuses to match when the segment counts differ.

use glob::{MatchOptions, Pattern};
use std::borrow::Cow;

const FNMATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Match `name` against a single glob pattern.
///
/// A pattern that does not compile (an unclosed `[` for instance) only matches itself.
pub fn fnmatch(name: &str, pattern: &str) -> bool {
    match compile(pattern) {
        Ok(compiled) => compiled.matches_with(name, FNMATCH_OPTIONS),
        Err(_) => name == pattern,
    }
}

/// True when `name` matches at least one of `patterns`.
pub fn fnmatch_any<S: AsRef<str>>(name: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|p| fnmatch(name, p.as_ref()))
}

/// Match a `/`-separated relative path against a `/`-separated pattern, segment by segment.
pub fn path_match(path: &str, pattern: &str) -> bool {
    let path_parts: Vec<&str> = path.split('/').collect();
    let pattern_parts: Vec<&str> = pattern.split('/').collect();

    if path_parts.len() != pattern_parts.len() {
        return false;
    }

    path_parts
        .iter()
        .zip(pattern_parts.iter())
        .all(|(segment, pat)| fnmatch(segment, pat))
}

/// Check that a pattern compiles, returning the glob error message otherwise.
pub fn validate(pattern: &str) -> Result<(), String> {
    compile(pattern)
        .map(|_| ())
        .map_err(|e| format!("invalid glob pattern {:?}: {}", pattern, e.msg))
}

fn compile(pattern: &str) -> Result<Pattern, glob::PatternError> {
    Pattern::new(&collapse_stars(pattern))
}

/// Reduce every run of `*` to one. `**` means nothing special to fnmatch, and with
/// separators allowed to match a single `*` already covers it.
fn collapse_stars(pattern: &str) -> Cow<'_, str> {
    if !pattern.contains("**") {
        return Cow::Borrowed(pattern);
    }

    let mut collapsed = String::with_capacity(pattern.len());
    let mut previous_star = false;
    for c in pattern.chars() {
        if c == '*' && previous_star {
            continue;
        }
        previous_star = c == '*';
        collapsed.push(c);
    }
    Cow::Owned(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_fnmatch_basics() {
        assert!(fnmatch("lib-core", "lib-*"));
        assert!(fnmatch("lib-core", "*"));
        assert!(fnmatch("a", "?"));
        assert!(fnmatch("pkgA", "pkg[A-C]"));
        assert!(!fnmatch("pkgD", "pkg[A-C]"));
        assert!(!fnmatch("Lib-core", "lib-*"));
        assert!(!fnmatch("core", "lib-*"));
    }

    #[test]
    fn test_fnmatch_star_crosses_separators() {
        assert!(fnmatch("a/b", "*"));
        assert!(fnmatch(".hidden", "*"));
    }

    #[test]
    fn test_invalid_pattern_matches_literally() {
        assert!(fnmatch("[abc", "[abc"));
        assert!(!fnmatch("a", "[abc"));
        assert!(validate("[abc").is_err());
        assert!(validate("src/*").is_ok());
    }

    #[test]
    fn test_double_star_behaves_like_single_star() {
        assert!(validate("lib-**").is_ok());
        assert!(validate("**").is_ok());
        assert!(fnmatch("lib-core", "lib-**"));
        assert!(fnmatch("lib-core", "**core"));
        assert!(fnmatch("a/b", "a***"));
        assert!(!fnmatch("core", "lib-**"));
        assert_eq!(collapse_stars("a**b***c"), "a*b*c");
        assert_eq!(collapse_stars("[*]*"), "[*]*");
    }

    #[test]
    fn test_path_match_segment_counts() {
        assert!(path_match("src/x", "src/*"));
        assert!(!path_match("src", "src/*"));
        assert!(!path_match("src/a/b", "src/*"));
        assert!(path_match("houdini/python3.9libs", "houdini/python*libs"));
        assert!(path_match(".", "."));
        assert!(!path_match("src", "."));
    }

    #[test]
    fn test_fnmatch_any_is_logical_or() {
        let patterns = vec!["oa-*".to_string(), "bd-*".to_string()];
        assert!(fnmatch_any("oa-tools", &patterns));
        assert!(fnmatch_any("bd-core", &patterns));
        assert!(!fnmatch_any("misc", &patterns));
        assert!(!fnmatch_any::<String>("misc", &[]));
    }

    #[quickcheck]
    fn prop_extra_segment_never_matches(segments: Vec<String>) -> bool {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.replace('/', ""))
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return true;
        }
        let path = segments.join("/");
        let pattern = vec!["*"; segments.len() + 1].join("/");
        !path_match(&path, &pattern)
    }

    #[quickcheck]
    fn prop_all_stars_match_equal_depth(segments: Vec<String>) -> bool {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.replace('/', ""))
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return true;
        }
        let path = segments.join("/");
        let pattern = vec!["*"; segments.len()].join("/");
        path_match(&path, &pattern)
    }
}
