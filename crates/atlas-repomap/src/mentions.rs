//! Mention extraction from free-form request text.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Distinct word tokens in `text`.
///
/// # Examples
///
/// ```
/// use atlas_repomap::mentions::identifiers_in;
///
/// let idents = identifiers_in("Why does compute_total() call helper twice?");
/// assert!(idents.contains("compute_total"));
/// assert!(idents.contains("helper"));
/// assert!(!idents.contains("()"));
/// ```
pub fn identifiers_in(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// Candidates named in `text`, by relative path or by file name.
///
/// A bare file name only counts when it is distinctive (contains a dot or
/// is longer than three characters) and belongs to exactly one candidate.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use atlas_repomap::mentions::files_in;
///
/// let candidates: BTreeSet<String> =
///     ["src/parser.rs".to_string(), "src/lib.rs".to_string()].into();
/// let found = files_in("please fix parser.rs", &candidates);
/// assert_eq!(found, ["src/parser.rs".to_string()].into());
/// ```
pub fn files_in(text: &str, candidates: &BTreeSet<String>) -> BTreeSet<String> {
    let words: BTreeSet<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| ",;:!?\"'`()[]{}<>".contains(c)))
        .map(|w| w.trim_end_matches('.'))
        .filter(|w| !w.is_empty())
        .collect();

    let mut by_name: HashMap<&str, Vec<&String>> = HashMap::new();
    for candidate in candidates {
        if let Some(name) = Path::new(candidate).file_name().and_then(|n| n.to_str()) {
            by_name.entry(name).or_default().push(candidate);
        }
    }

    let mut found = BTreeSet::new();
    for candidate in candidates {
        let normalized = candidate.replace('\\', "/");
        if words.contains(candidate.as_str()) || words.contains(normalized.as_str()) {
            found.insert(candidate.clone());
        }
    }

    for (name, owners) in by_name {
        let distinctive = name.contains('.') || name.chars().count() > 3;
        if distinctive && owners.len() == 1 && words.contains(name) {
            found.insert(owners[0].clone());
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identifiers_are_split_on_punctuation() {
        let idents = identifiers_in("use `RepoMap::compute_map`, then x.y");
        assert_eq!(
            idents,
            set(&["RepoMap", "compute_map", "then", "use", "x", "y"])
        );
    }

    #[test]
    fn full_paths_are_matched() {
        let candidates = set(&["src/a.py", "src/b.py"]);
        let found = files_in("look at src/b.py.", &candidates);
        assert_eq!(found, set(&["src/b.py"]));
    }

    #[test]
    fn ambiguous_names_are_ignored() {
        let candidates = set(&["api/mod.rs", "db/mod.rs", "db/schema.rs"]);
        let found = files_in("mod.rs and schema.rs need work", &candidates);
        assert_eq!(found, set(&["db/schema.rs"]));
    }

    #[test]
    fn short_names_without_dots_are_ignored() {
        let candidates = set(&["bin/run", "scripts/deploy"]);
        let found = files_in("run deploy now", &candidates);
        assert_eq!(found, set(&["scripts/deploy"]));
    }

    #[test]
    fn nothing_mentioned() {
        let candidates = set(&["a.py"]);
        assert!(files_in("hello world", &candidates).is_empty());
        assert!(identifiers_in("  ...  ").is_empty());
    }
}
