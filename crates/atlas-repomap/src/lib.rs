//! Relevance-ranked, token-budgeted repository maps.
//!
//! Tags (definitions and references) are extracted per file with
//! tree-sitter and cached on disk by mtime. Files are linked into a weighted
//! reference graph, scored with personalized PageRank, and the best-ranked
//! definitions are rendered as indented excerpts sized to a token budget.
//!
//! [`RepoMap::compute_map`] runs the whole pipeline.

pub mod budget;
pub mod graph;
pub mod map_cache;
pub mod mentions;
pub mod output;
pub mod parser;
pub mod rank;
pub mod store;
pub mod tag_cache;
pub mod tags;
pub mod tokens;
pub mod walker;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use atlas_core::{AtlasConfig, AtlasError};
use rayon::prelude::*;

use crate::budget::BudgetedTreeBuilder;
use crate::graph::{GraphRequest, SymbolGraphBuilder};
use crate::map_cache::MapCache;
use crate::output::{FileSelection, TreeRenderer};
use crate::parser::{StructuralParser, TreeSitterParser};
use crate::rank::{RankedTag, RelevanceRanker, TagTarget};
use crate::store::{KvStore, SqliteStore};
use crate::tag_cache::{CacheStats, TagCache};
use crate::tags::{Tag, TagExtractor};
use crate::tokens::{EstimatingTokenizer, Tokenizer};

/// File name of the tag database inside the cache directory.
pub const TAG_DB_FILE: &str = "tags.db";

/// Advisory cancellation flag, shared between a running request and its
/// caller.
///
/// Checked between files during extraction and between budget probes. Once
/// cancelled it stays cancelled until [`reset`](Self::reset).
///
/// # Examples
///
/// ```
/// use atlas_repomap::CancelToken;
///
/// let token = CancelToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// token.reset();
/// assert!(!handle.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Extraction progress, reported once per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    /// The file just processed.
    pub file: String,
}

type ProgressFn = Box<dyn Fn(&Progress) + Send + Sync>;

/// The map engine for one repository.
///
/// Holds the durable tag cache, the map memo and the render cache, so one
/// instance should serve all requests for a repository.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_core::AtlasConfig;
/// use atlas_repomap::RepoMap;
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::write(dir.path().join("a.py"), "def helper():\n    return 1\n").unwrap();
/// std::fs::write(dir.path().join("b.py"), "from a import helper\n\ndef run():\n    helper()\n").unwrap();
///
/// let mut config = AtlasConfig::default();
/// config.cache.enabled = false;
/// let mut repo_map = RepoMap::new(dir.path(), config);
///
/// let files = [PathBuf::from("a.py"), PathBuf::from("b.py")];
/// let map = repo_map.compute_map(&[], &files, &[], &[], 1024, false).unwrap().unwrap();
/// assert!(map.contains("a.py:\n│def helper():"));
/// ```
pub struct RepoMap {
    root: PathBuf,
    tag_cache: TagCache,
    map_cache: MapCache,
    renderer: TreeRenderer,
    graph_builder: SymbolGraphBuilder,
    ranker: RelevanceRanker,
    budget: BudgetedTreeBuilder,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
}

impl RepoMap {
    /// Engine for `root` with the tree-sitter parser, the byte-estimating
    /// tokenizer and, when enabled, a SQLite tag cache under
    /// `config.cache.dir`.
    ///
    /// A corrupt cache database is recreated once; one that still cannot be
    /// opened is logged and the engine runs uncached.
    pub fn new(root: &Path, config: AtlasConfig) -> Self {
        let store: Option<Box<dyn KvStore>> = if config.cache.enabled {
            let db_path = root.join(&config.cache.dir).join(TAG_DB_FILE);
            match SqliteStore::open_or_recreate(&db_path) {
                Ok(store) => Some(Box::new(store)),
                Err(e) => {
                    tracing::warn!(
                        path = %db_path.display(),
                        error = %e,
                        "cannot open tag cache, running uncached"
                    );
                    None
                }
            }
        } else {
            None
        };

        Self::with_parts(
            root,
            config,
            Arc::new(TreeSitterParser::new()),
            Arc::new(EstimatingTokenizer),
            store,
        )
    }

    /// Engine with explicit collaborators.
    pub fn with_parts(
        root: &Path,
        config: AtlasConfig,
        parser: Arc<dyn StructuralParser>,
        tokenizer: Arc<dyn Tokenizer>,
        store: Option<Box<dyn KvStore>>,
    ) -> Self {
        let threshold = Duration::from_millis(config.budget.auto_refresh_threshold_ms);
        Self {
            root: root.to_path_buf(),
            tag_cache: TagCache::new(store, TagExtractor::new(parser)),
            map_cache: MapCache::new(config.map.refresh, threshold),
            renderer: TreeRenderer::new(root),
            graph_builder: SymbolGraphBuilder::new(config.ranking.clone()),
            ranker: RelevanceRanker::new(&config.ranking),
            budget: BudgetedTreeBuilder::new(tokenizer, &config.budget),
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Report per-file extraction progress to `callback`.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// A handle that cancels requests on this engine.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tag_cache(&self) -> &TagCache {
        &self.tag_cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.tag_cache.stats()
    }

    /// Drop the durable tags and the map memo.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Database`] if the tag store cannot be cleared.
    pub fn clear_caches(&mut self) -> Result<(), AtlasError> {
        self.map_cache.clear();
        self.tag_cache
            .clear()
            .map_err(|e| AtlasError::Database(e.to_string()))
    }

    /// Render a map of `other_files`, ranked by relevance to `chat_files`
    /// and the mentions, within `max_tokens`.
    ///
    /// Paths may be relative to the root or absolute under it. Chat files are
    /// always included; they are removed from `other_files`. Returns
    /// `Ok(None)` when there is nothing to map, when no rendering fits the
    /// budget, or when the request was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidBudget`] when `max_tokens` is zero.
    pub fn compute_map(
        &mut self,
        chat_files: &[PathBuf],
        other_files: &[PathBuf],
        mentioned_files: &[PathBuf],
        mentioned_idents: &[String],
        max_tokens: usize,
        force_refresh: bool,
    ) -> Result<Option<String>, AtlasError> {
        if max_tokens == 0 {
            return Err(AtlasError::InvalidBudget(max_tokens));
        }

        let chat: BTreeSet<String> = chat_files.iter().map(|p| self.relative(p)).collect();
        let other: BTreeSet<String> = other_files
            .iter()
            .map(|p| self.relative(p))
            .filter(|p| !chat.contains(p))
            .collect();
        let mentioned: BTreeSet<String> =
            mentioned_files.iter().map(|p| self.relative(p)).collect();
        let idents: BTreeSet<String> = mentioned_idents.iter().cloned().collect();

        if other.is_empty() {
            tracing::debug!("no candidate files to map");
            return Ok(None);
        }

        let key = self
            .map_cache
            .key(&chat, &other, max_tokens, &mentioned, &idents);
        if let Some(hit) = self.map_cache.lookup(&key, force_refresh) {
            tracing::debug!(policy = %self.map_cache.policy(), "reusing cached map");
            return Ok(hit);
        }

        let started = Instant::now();
        let request = GraphRequest {
            chat_files: &chat,
            other_files: &other,
            mentioned_files: &mentioned,
            mentioned_idents: &idents,
        };
        let map = self.generate(request, max_tokens);

        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let elapsed = started.elapsed();
        tracing::debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            found = map.is_some(),
            "computed map"
        );
        self.map_cache.store(key, map.clone(), elapsed);
        Ok(map)
    }

    fn generate(&self, request: GraphRequest<'_>, max_tokens: usize) -> Option<String> {
        let tags = self.collect_tags(request.chat_files, request.other_files)?;

        let (graph, personalization) = self.graph_builder.build(request, &tags);
        let ranks = self.ranker.rank(&graph, personalization.as_deref());
        let ranked = self.ranker.rank_tags(&graph, &ranks, request.chat_files);

        let mut always: BTreeMap<String, FileSelection> = BTreeMap::new();
        for file in request.chat_files {
            let lines: BTreeSet<u32> = graph.definitions_in(file).map(|(_, line)| line).collect();
            let selection = if lines.is_empty() {
                FileSelection::Whole
            } else {
                FileSelection::Lines(lines)
            };
            always.insert(file.clone(), selection);
        }

        self.budget.search(
            ranked.len(),
            max_tokens,
            |k| self.renderer.render_map(&selections(&always, &ranked[..k])),
            &self.cancel,
        )
    }

    fn collect_tags(
        &self,
        chat: &BTreeSet<String>,
        other: &BTreeSet<String>,
    ) -> Option<BTreeMap<String, Vec<Tag>>> {
        let files: Vec<&String> = chat.iter().chain(other.iter()).collect();
        let total = files.len();
        let done = AtomicUsize::new(0);

        let extracted: Vec<(String, Vec<Tag>)> = files
            .par_iter()
            .filter_map(|file| {
                if self.cancel.is_cancelled() {
                    return None;
                }
                let tags = self.tag_cache.get(&self.root, file);
                let done = done.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(report) = &self.progress {
                    report(&Progress {
                        done,
                        total,
                        file: (*file).clone(),
                    });
                }
                Some(((*file).clone(), tags))
            })
            .collect();

        if self.cancel.is_cancelled() {
            tracing::debug!("tag extraction cancelled");
            return None;
        }
        Some(extracted.into_iter().collect())
    }

    /// Root-relative, forward-slash form of `path`.
    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }
}

/// Selections for the always-shown files plus a ranked prefix.
fn selections(
    always: &BTreeMap<String, FileSelection>,
    ranked: &[RankedTag],
) -> BTreeMap<String, FileSelection> {
    let mut out = always.clone();
    for tag in ranked {
        let selection = match &tag.target {
            TagTarget::Symbol { line, .. } => FileSelection::Lines(BTreeSet::from([*line])),
            TagTarget::WholeFile => FileSelection::Whole,
        };
        match out.entry(tag.file.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(selection);
            }
            Entry::Occupied(mut slot) => slot.get_mut().merge(selection),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    use atlas_core::RefreshPolicy;

    use crate::store::MemoryStore;

    fn uncached_config() -> AtlasConfig {
        let mut config = AtlasConfig::default();
        config.cache.enabled = false;
        config
    }

    fn write_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.py"),
            "def helper():\n    return 1\n\ndef compute_total(xs):\n    return sum(xs)\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.py"),
            "from a import compute_total\n\ndef report():\n    return compute_total([1])\n",
        )
        .unwrap();
        dir
    }

    fn files(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn zero_budget_is_rejected() {
        let dir = write_repo();
        let mut repo_map = RepoMap::new(dir.path(), uncached_config());
        let err = repo_map
            .compute_map(&[], &files(&["a.py"]), &[], &[], 0, false)
            .unwrap_err();
        assert!(matches!(err, AtlasError::InvalidBudget(0)));
    }

    #[test]
    fn no_candidates_means_no_map() {
        let dir = write_repo();
        let mut repo_map = RepoMap::new(dir.path(), uncached_config());
        let map = repo_map
            .compute_map(&files(&["a.py"]), &files(&["a.py"]), &[], &[], 1024, false)
            .unwrap();
        assert_eq!(map, None);
    }

    #[test]
    fn absolute_paths_are_made_relative() {
        let dir = write_repo();
        let mut repo_map = RepoMap::new(dir.path(), uncached_config());
        let absolute = vec![dir.path().join("a.py"), dir.path().join("b.py")];
        let map = repo_map
            .compute_map(&[], &absolute, &[], &[], 1024, false)
            .unwrap()
            .unwrap();
        assert!(map.contains("a.py:\n"));
        assert!(!map.contains(&dir.path().display().to_string()));
    }

    #[test]
    fn chat_files_are_always_rendered_with_their_definitions() {
        let dir = write_repo();
        let mut repo_map = RepoMap::new(dir.path(), uncached_config());
        let map = repo_map
            .compute_map(&files(&["b.py"]), &files(&["a.py", "b.py"]), &[], &[], 1024, false)
            .unwrap()
            .unwrap();
        assert!(map.contains("b.py:\n"));
        assert!(map.contains("│def report():"));
        assert!(map.contains("│def compute_total(xs):"));
    }

    #[test]
    fn progress_is_reported_per_file() {
        let dir = write_repo();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut repo_map = RepoMap::new(dir.path(), uncached_config())
            .on_progress(move |p| sink.lock().unwrap().push((p.done, p.total)));

        repo_map
            .compute_map(&[], &files(&["a.py", "b.py"]), &[], &[], 1024, false)
            .unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn cancelled_request_returns_none_and_is_not_cached() {
        let dir = write_repo();
        let mut config = uncached_config();
        config.map.refresh = RefreshPolicy::Files;
        let mut repo_map = RepoMap::new(dir.path(), config);
        let cancel = repo_map.cancel_token();

        cancel.cancel();
        let map = repo_map
            .compute_map(&[], &files(&["a.py", "b.py"]), &[], &[], 1024, false)
            .unwrap();
        assert_eq!(map, None);

        cancel.reset();
        let map = repo_map
            .compute_map(&[], &files(&["a.py", "b.py"]), &[], &[], 1024, false)
            .unwrap();
        assert!(map.is_some());
    }

    #[test]
    fn manual_policy_serves_the_last_map_until_forced() {
        let dir = write_repo();
        let mut config = uncached_config();
        config.map.refresh = RefreshPolicy::Manual;
        let mut repo_map = RepoMap::new(dir.path(), config);

        let first = repo_map
            .compute_map(&[], &files(&["a.py", "b.py"]), &[], &[], 1024, false)
            .unwrap();
        let narrowed = repo_map
            .compute_map(&[], &files(&["a.py"]), &[], &[], 1024, false)
            .unwrap();
        assert_eq!(first, narrowed);

        let forced = repo_map
            .compute_map(&[], &files(&["a.py"]), &[], &[], 1024, true)
            .unwrap();
        assert_ne!(first, forced);
    }

    #[test]
    fn injected_store_backs_the_tag_cache() {
        let dir = write_repo();
        let mut repo_map = RepoMap::with_parts(
            dir.path(),
            uncached_config(),
            Arc::new(TreeSitterParser::new()),
            Arc::new(EstimatingTokenizer),
            Some(Box::new(MemoryStore::default())),
        );

        for _ in 0..2 {
            repo_map
                .compute_map(&[], &files(&["a.py", "b.py"]), &[], &[], 1024, true)
                .unwrap();
        }
        let stats = repo_map.cache_stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entries, Some(2));

        repo_map.clear_caches().unwrap();
        assert_eq!(repo_map.cache_stats().entries, Some(0));
    }

    #[test]
    fn selections_merge_prefix_into_always_shown_files() {
        let mut always = BTreeMap::new();
        always.insert("chat.py".to_string(), FileSelection::Lines([0].into()));
        let ranked = vec![
            RankedTag {
                file: "lib.py".into(),
                target: TagTarget::Symbol { name: "f".into(), line: 4 },
                score: 1.0,
            },
            RankedTag {
                file: "lib.py".into(),
                target: TagTarget::Symbol { name: "g".into(), line: 9 },
                score: 0.5,
            },
            RankedTag {
                file: "other.py".into(),
                target: TagTarget::WholeFile,
                score: 0.1,
            },
        ];

        let out = selections(&always, &ranked);
        assert_eq!(out["chat.py"], FileSelection::Lines([0].into()));
        assert_eq!(out["lib.py"], FileSelection::Lines([4, 9].into()));
        assert_eq!(out["other.py"], FileSelection::Whole);
    }
}
