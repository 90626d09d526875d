//! Definition and reference tags extracted from one source file.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::parser::{ParseError, StructuralParser};
use crate::walker::Language;

/// Whether a tag names a definition or a use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Definition,
    Reference,
}

/// One occurrence of an identifier in a file.
///
/// # Examples
///
/// ```
/// use atlas_repomap::tags::{Tag, TagKind};
///
/// let tag = Tag {
///     file: "src/a.py".into(),
///     name: "helper".into(),
///     kind: TagKind::Definition,
///     line: 3,
/// };
/// assert!(tag.is_definition());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Path relative to the repository root.
    pub file: String,
    /// The identifier text.
    pub name: String,
    pub kind: TagKind,
    /// Zero-based line of the occurrence.
    pub line: u32,
}

impl Tag {
    pub fn is_definition(&self) -> bool {
        self.kind == TagKind::Definition
    }
}

/// Turns file content into [`Tag`]s using a [`StructuralParser`].
///
/// Files whose parse yields definitions but no references fall back to a
/// plain identifier scan so that their uses still participate in ranking.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use atlas_repomap::parser::TreeSitterParser;
/// use atlas_repomap::tags::{TagExtractor, TagKind};
///
/// let extractor = TagExtractor::new(Arc::new(TreeSitterParser::new()));
/// let tags = extractor
///     .extract("b.py", "from a import helper\n\ndef run():\n    helper()\n")
///     .unwrap();
/// assert!(tags.iter().any(|t| t.name == "run" && t.kind == TagKind::Definition));
/// assert!(tags.iter().any(|t| t.name == "helper" && t.kind == TagKind::Reference));
/// ```
#[derive(Clone)]
pub struct TagExtractor {
    parser: Arc<dyn StructuralParser>,
}

impl TagExtractor {
    pub fn new(parser: Arc<dyn StructuralParser>) -> Self {
        Self { parser }
    }

    /// Extract tags for the file at `rel_path` with the given content.
    ///
    /// # Errors
    ///
    /// Propagates [`ParseError`] from the parser. Callers decide whether an
    /// unsupported language is worth logging.
    pub fn extract(&self, rel_path: &str, content: &str) -> Result<Vec<Tag>, ParseError> {
        let language = Language::from_path(Path::new(rel_path));
        let captures = self.parser.parse(language, content)?;

        let mut tags = Vec::with_capacity(captures.len());
        for capture in captures {
            let kind = if capture.label.starts_with("definition") {
                TagKind::Definition
            } else if capture.label.starts_with("reference") {
                TagKind::Reference
            } else {
                continue;
            };
            tags.push(Tag {
                file: rel_path.to_string(),
                name: capture.text,
                kind,
                line: capture.line,
            });
        }

        if !tags.iter().any(|t| t.kind == TagKind::Reference) {
            tags.extend(scan_identifiers(rel_path, content));
        }

        Ok(tags)
    }
}

/// Every identifier-looking token in `content`, as reference tags.
fn scan_identifiers(rel_path: &str, content: &str) -> Vec<Tag> {
    let mut tags = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        for token in line.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
            let starts_like_identifier = token
                .chars()
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_');
            if starts_like_identifier {
                tags.push(Tag {
                    file: rel_path.to_string(),
                    name: token.to_string(),
                    kind: TagKind::Reference,
                    line: line_no as u32,
                });
            }
        }
    }
    tags
}
