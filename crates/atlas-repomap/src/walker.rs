use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use atlas_core::AtlasError;

/// Leading bytes sniffed for a NUL when deciding a file is binary.
const SNIFF_LEN: usize = 8 * 1024;

/// A mappable file found under the repository root.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_repomap::walker::{Language, SourceFile};
///
/// let file = SourceFile {
///     path: PathBuf::from("lib/cart.rb"),
///     language: Language::Ruby,
/// };
/// assert_eq!(file.language.name(), "ruby");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Relative to the walked root.
    pub path: PathBuf,
    pub language: Language,
}

/// Languages with a tree-sitter grammar wired in, plus [`Language::Unknown`]
/// for everything else.
///
/// # Examples
///
/// ```
/// use atlas_repomap::walker::Language;
///
/// assert_eq!(Language::from_extension("pyi"), Language::Python);
/// assert_eq!(Language::from_extension("HPP"), Language::Cpp);
/// assert_eq!(Language::from_extension("kts"), Language::Kotlin);
/// assert_eq!(Language::from_extension("md"), Language::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    JavaScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Php,
    Kotlin,
    Swift,
    Unknown,
}

const EXTENSIONS: &[(Language, &[&str])] = &[
    (Language::Rust, &["rs"]),
    (Language::Python, &["py", "pyi"]),
    (Language::TypeScript, &["ts", "tsx", "mts", "cts"]),
    (Language::JavaScript, &["js", "jsx", "mjs", "cjs"]),
    (Language::Go, &["go"]),
    (Language::Java, &["java"]),
    (Language::C, &["c", "h"]),
    (Language::Cpp, &["cpp", "cc", "cxx", "hpp", "hxx", "hh"]),
    (Language::Ruby, &["rb", "rake"]),
    (Language::Php, &["php"]),
    (Language::Kotlin, &["kt", "kts"]),
    (Language::Swift, &["swift"]),
];

impl Language {
    /// Every language with a grammar.
    pub fn supported() -> impl Iterator<Item = Language> {
        EXTENSIONS.iter().map(|(lang, _)| *lang)
    }

    /// Case-insensitive lookup of an extension given without its dot.
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        EXTENSIONS
            .iter()
            .find(|(_, exts)| exts.contains(&ext.as_str()))
            .map_or(Language::Unknown, |(lang, _)| *lang)
    }

    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use atlas_repomap::walker::Language;
    ///
    /// assert_eq!(Language::from_path(Path::new("web/app.tsx")), Language::TypeScript);
    /// assert_eq!(Language::from_path(Path::new("Dockerfile")), Language::Unknown);
    /// ```
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => Self::from_extension(ext),
            None => Language::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::Unknown => "unknown",
        }
    }

    /// Grammar for this language, `None` for [`Language::Unknown`].
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        let grammar: tree_sitter::Language = match self {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::Ruby => tree_sitter_ruby::LANGUAGE.into(),
            Language::Php => tree_sitter_php::LANGUAGE_PHP.into(),
            Language::Kotlin => tree_sitter_kotlin_ng::LANGUAGE.into(),
            Language::Swift => tree_sitter_swift::LANGUAGE.into(),
            Language::Unknown => return None,
        };
        Some(grammar)
    }
}

/// Collect the mappable files under `root`.
///
/// Honors `.gitignore` and hidden-file rules. Files over `max_file_size`
/// bytes, binary files and files in an unknown language are left out.
/// Paths come back relative to `root`, in sorted order.
///
/// # Errors
///
/// Returns [`AtlasError::FileNotFound`] when `root` does not exist.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use atlas_repomap::walker::walk_repo;
///
/// for file in walk_repo(Path::new("."), 1 << 20).unwrap() {
///     println!("{} ({})", file.path.display(), file.language.name());
/// }
/// ```
pub fn walk_repo(root: &Path, max_file_size: u64) -> Result<Vec<SourceFile>, AtlasError> {
    if !root.exists() {
        return Err(AtlasError::FileNotFound(root.to_path_buf()));
    }

    let mut files: Vec<SourceFile> = ignore::WalkBuilder::new(root)
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter_map(|entry| candidate(root, entry.path(), max_file_size))
        .collect();

    files.sort_unstable_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(root = %root.display(), files = files.len(), "walked repository");
    Ok(files)
}

fn candidate(root: &Path, path: &Path, max_file_size: u64) -> Option<SourceFile> {
    let language = Language::from_path(path);
    if language == Language::Unknown {
        return None;
    }
    let size = std::fs::metadata(path).ok()?.len();
    if size > max_file_size {
        tracing::debug!(path = %path.display(), size, "skipping oversized file");
        return None;
    }
    if is_binary(path) {
        return None;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    Some(SourceFile {
        path: relative.to_path_buf(),
        language,
    })
}

/// Unreadable files count as binary.
fn is_binary(path: &Path) -> bool {
    let mut head = [0u8; SNIFF_LEN];
    let mut filled = 0;
    let Ok(mut file) = File::open(path) else {
        return true;
    };
    while filled < SNIFF_LEN {
        match file.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return true,
        }
    }
    head[..filled].contains(&0)
}
