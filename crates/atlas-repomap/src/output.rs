//! Rendering of per-file excerpts and the assembled map text.
//!
//! An excerpt keeps each line of interest plus the less-indented lines that
//! enclose it (its class, function or block headers). Shown lines are
//! prefixed with `│`; each run of hidden lines collapses to a single `⋮`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use rayon::prelude::*;

/// Longest rendered source line, in bytes.
const MAX_LINE_WIDTH: usize = 100;

/// What to show for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSelection {
    /// Only the file's path.
    Whole,
    /// An excerpt around these zero-based lines.
    Lines(BTreeSet<u32>),
}

impl FileSelection {
    /// Widen `self` so it also covers `other`.
    pub fn merge(&mut self, other: FileSelection) {
        let FileSelection::Lines(theirs) = other else {
            return;
        };
        match self {
            FileSelection::Lines(mine) => mine.extend(theirs),
            FileSelection::Whole => *self = FileSelection::Lines(theirs),
        }
    }
}

type RenderKey = (String, Vec<u32>, Option<SystemTime>);

/// Renders map text from file selections, caching excerpts by
/// `(file, lines, mtime)`.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use atlas_repomap::output::{FileSelection, TreeRenderer};
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::write(dir.path().join("a.py"), "class Cart:\n    def total(self):\n        return 1\n").unwrap();
///
/// let renderer = TreeRenderer::new(dir.path());
/// let mut selections = BTreeMap::new();
/// selections.insert("a.py".to_string(), FileSelection::Lines([1].into()));
/// selections.insert("README".to_string(), FileSelection::Whole);
///
/// let text = renderer.render_map(&selections);
/// assert_eq!(text, "README\n\na.py:\n│class Cart:\n│    def total(self):\n⋮\n");
/// ```
pub struct TreeRenderer {
    root: PathBuf,
    cache: Mutex<HashMap<RenderKey, String>>,
}

impl TreeRenderer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Render every selection, sorted by path, separated by blank lines.
    ///
    /// Files are rendered in parallel. A file that cannot be read renders
    /// as its bare path.
    pub fn render_map(&self, selections: &BTreeMap<String, FileSelection>) -> String {
        let sections: Vec<String> = selections
            .par_iter()
            .map(|(file, selection)| self.render_section(file, selection))
            .collect();

        let mut out = String::new();
        for section in sections {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&section);
        }
        out
    }

    fn render_section(&self, file: &str, selection: &FileSelection) -> String {
        let lines = match selection {
            FileSelection::Whole => return format!("{file}\n"),
            FileSelection::Lines(lines) if lines.is_empty() => return format!("{file}\n"),
            FileSelection::Lines(lines) => lines,
        };

        let path = self.root.join(file);
        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let key: RenderKey = (file.to_string(), lines.iter().copied().collect(), mtime);

        if let Some(hit) = self.cached(&key) {
            return hit;
        }

        let section = match std::fs::read_to_string(&path) {
            Ok(content) => format!("{file}:\n{}", render_excerpt(&content, lines)),
            Err(e) => {
                tracing::warn!(file, error = %e, "cannot read file for rendering");
                format!("{file}\n")
            }
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, section.clone());
        }
        section
    }

    fn cached(&self, key: &RenderKey) -> Option<String> {
        self.cache.lock().ok()?.get(key).cloned()
    }
}

/// Excerpt of `content` around the zero-based `lines_of_interest`.
///
/// # Examples
///
/// ```
/// use atlas_repomap::output::render_excerpt;
///
/// let source = "fn outer() {\n    let a = 1;\n    let b = 2;\n    inner();\n}\n";
/// let excerpt = render_excerpt(source, &[3].into());
/// assert_eq!(excerpt, "│fn outer() {\n⋮\n│    inner();\n⋮\n");
/// ```
pub fn render_excerpt(content: &str, lines_of_interest: &BTreeSet<u32>) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut shown: BTreeSet<usize> = BTreeSet::new();

    for &loi in lines_of_interest {
        let loi = loi as usize;
        if loi >= lines.len() {
            continue;
        }
        shown.insert(loi);

        let mut indent = indentation(lines[loi]);
        for j in (0..loi).rev() {
            if indent == 0 {
                break;
            }
            if lines[j].trim().is_empty() {
                continue;
            }
            let header_indent = indentation(lines[j]);
            if header_indent < indent {
                shown.insert(j);
                indent = header_indent;
            }
        }
    }

    // a one-line gap costs the same as its marker
    let gaps: Vec<usize> = shown
        .iter()
        .filter(|&&i| shown.contains(&(i + 2)) && !shown.contains(&(i + 1)))
        .map(|&i| i + 1)
        .collect();
    shown.extend(gaps);

    let mut out = String::new();
    let mut in_gap = false;
    for (i, line) in lines.iter().enumerate() {
        if shown.contains(&i) {
            let _ = writeln!(out, "│{}", truncate_line(line, MAX_LINE_WIDTH));
            in_gap = false;
        } else if !in_gap {
            out.push_str("⋮\n");
            in_gap = true;
        }
    }
    out
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn truncate_line(line: &str, max_len: usize) -> &str {
    if line.len() <= max_len {
        return line;
    }
    let mut end = max_len;
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PYTHON: &str = "\
import os

class Inventory:
    def __init__(self):
        self.items = []

    def add(self, item):
        self.items.append(item)

    def total(self):
        return len(self.items)


def main():
    inv = Inventory()
    inv.add(1)
";

    fn lines(items: &[u32]) -> BTreeSet<u32> {
        items.iter().copied().collect()
    }

    #[test]
    fn excerpt_includes_enclosing_headers() {
        let excerpt = render_excerpt(PYTHON, &lines(&[10]));
        assert_eq!(
            excerpt,
            "⋮\n│class Inventory:\n⋮\n│    def total(self):\n│        return len(self.items)\n⋮\n"
        );
    }

    #[test]
    fn one_line_gaps_are_closed() {
        let excerpt = render_excerpt(PYTHON, &lines(&[0, 2]));
        assert_eq!(excerpt, "│import os\n│\n│class Inventory:\n⋮\n");
    }

    #[test]
    fn headers_are_shared_between_lines() {
        let excerpt = render_excerpt(PYTHON, &lines(&[2, 4]));
        assert_eq!(
            excerpt,
            "⋮\n│class Inventory:\n│    def __init__(self):\n│        self.items = []\n⋮\n"
        );
    }

    #[test]
    fn top_level_lines_need_no_headers() {
        let excerpt = render_excerpt(PYTHON, &lines(&[13]));
        assert_eq!(excerpt, "⋮\n│def main():\n⋮\n");
    }

    #[test]
    fn out_of_range_lines_are_ignored() {
        assert_eq!(render_excerpt("x = 1\n", &lines(&[7])), "⋮\n");
    }

    #[test]
    fn long_lines_are_truncated_on_char_boundaries() {
        let long = format!("{}é", "a".repeat(99));
        let excerpt = render_excerpt(&long, &lines(&[0]));
        assert_eq!(excerpt, format!("│{}\n", "a".repeat(99)));
        assert_eq!(truncate_line("short", 100), "short");
    }

    #[test]
    fn selections_merge() {
        let mut selection = FileSelection::Whole;
        selection.merge(FileSelection::Lines(lines(&[3])));
        assert_eq!(selection, FileSelection::Lines(lines(&[3])));

        selection.merge(FileSelection::Lines(lines(&[1])));
        selection.merge(FileSelection::Whole);
        assert_eq!(selection, FileSelection::Lines(lines(&[1, 3])));
    }

    #[test]
    fn render_map_orders_sections_by_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("z.py"), "def last():\n    pass\n").unwrap();
        fs::write(dir.path().join("a.py"), "def first():\n    pass\n").unwrap();

        let renderer = TreeRenderer::new(dir.path());
        let mut selections = BTreeMap::new();
        selections.insert("z.py".to_string(), FileSelection::Lines(lines(&[0])));
        selections.insert("a.py".to_string(), FileSelection::Lines(lines(&[0])));
        selections.insert("m.txt".to_string(), FileSelection::Whole);

        let text = renderer.render_map(&selections);
        assert_eq!(
            text,
            "a.py:\n│def first():\n⋮\n\nm.txt\n\nz.py:\n│def last():\n⋮\n"
        );
    }

    #[test]
    fn rendering_is_cached_until_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        let stamp = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
        fs::write(&path, "def first():\n    pass\n").unwrap();
        fs::File::options().write(true).open(&path).unwrap().set_modified(stamp).unwrap();

        let renderer = TreeRenderer::new(dir.path());
        let mut selections = BTreeMap::new();
        selections.insert("a.py".to_string(), FileSelection::Lines(lines(&[0])));
        let first = renderer.render_map(&selections);

        fs::write(&path, "def other():\n    pass\n").unwrap();
        fs::File::options().write(true).open(&path).unwrap().set_modified(stamp).unwrap();
        assert_eq!(renderer.render_map(&selections), first);

        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(stamp + std::time::Duration::from_secs(1))
            .unwrap();
        assert!(renderer.render_map(&selections).contains("def other"));
    }

    #[test]
    fn unreadable_file_renders_as_path() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = TreeRenderer::new(dir.path());
        let mut selections = BTreeMap::new();
        selections.insert("gone.py".to_string(), FileSelection::Lines(lines(&[0])));
        assert_eq!(renderer.render_map(&selections), "gone.py\n");
    }
}
