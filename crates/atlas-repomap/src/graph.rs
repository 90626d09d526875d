//! File-level reference graph.
//!
//! Nodes are candidate files; an edge `a -> b` tagged with an identifier
//! means `a` references a name that `b` defines. Parallel edges for distinct
//! identifiers are kept.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use atlas_core::RankingConfig;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::tags::{Tag, TagKind};

/// Edge payload: the identifier linking the files and its weight.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolEdge {
    pub ident: String,
    pub weight: f64,
}

/// The file sets a graph is built for.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use atlas_repomap::graph::GraphRequest;
///
/// let chat: BTreeSet<String> = ["src/main.rs".to_string()].into();
/// let empty = BTreeSet::new();
/// let other: BTreeSet<String> = ["src/lib.rs".to_string()].into();
/// let request = GraphRequest {
///     chat_files: &chat,
///     other_files: &other,
///     mentioned_files: &empty,
///     mentioned_idents: &empty,
/// };
/// assert_eq!(request.chat_files.len(), 1);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct GraphRequest<'a> {
    pub chat_files: &'a BTreeSet<String>,
    pub other_files: &'a BTreeSet<String>,
    pub mentioned_files: &'a BTreeSet<String>,
    pub mentioned_idents: &'a BTreeSet<String>,
}

/// Directed multigraph over candidate files.
pub struct SymbolGraph {
    graph: DiGraph<String, SymbolEdge>,
    index: HashMap<String, NodeIndex>,
    /// Definition lines per (file, identifier).
    definitions: BTreeMap<(String, String), BTreeSet<u32>>,
}

impl SymbolGraph {
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node position of `file`, if it is a candidate.
    pub fn index_of(&self, file: &str) -> Option<usize> {
        self.index.get(file).map(|idx| idx.index())
    }

    /// File at node position `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is not below [`node_count`](Self::node_count).
    pub fn file(&self, i: usize) -> &str {
        &self.graph[NodeIndex::new(i)]
    }

    /// Files in node order (sorted by path).
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(String::as_str)
    }

    /// Every edge as `(source, target, payload)` in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, &SymbolEdge)> {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), e.weight()))
    }

    /// Outgoing edges of node `i`.
    pub fn out_edges(&self, i: usize) -> impl Iterator<Item = (usize, &SymbolEdge)> {
        self.graph
            .edges_directed(NodeIndex::new(i), Direction::Outgoing)
            .map(|e| (e.target().index(), e.weight()))
    }

    /// Sum of outgoing edge weights for every node.
    pub fn out_weights(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.node_count()];
        for (src, _, edge) in self.edges() {
            totals[src] += edge.weight;
        }
        totals
    }

    /// Lines where `file` defines `ident`.
    pub fn definition_lines(&self, file: &str, ident: &str) -> Option<&BTreeSet<u32>> {
        self.definitions.get(&(file.to_string(), ident.to_string()))
    }

    /// All `(identifier, line)` definitions in `file`, ordered by identifier.
    pub fn definitions_in<'a>(&'a self, file: &'a str) -> impl Iterator<Item = (&'a str, u32)> + 'a {
        self.definitions
            .iter()
            .filter(move |((f, _), _)| f == file)
            .flat_map(|((_, ident), lines)| lines.iter().map(move |l| (ident.as_str(), *l)))
    }
}

/// Builds a [`SymbolGraph`] and its personalization vector from tags.
///
/// # Examples
///
/// ```
/// use std::collections::{BTreeMap, BTreeSet};
/// use atlas_core::RankingConfig;
/// use atlas_repomap::graph::{GraphRequest, SymbolGraphBuilder};
/// use atlas_repomap::tags::{Tag, TagKind};
///
/// let tag = |file: &str, name: &str, kind| Tag {
///     file: file.into(),
///     name: name.into(),
///     kind,
///     line: 0,
/// };
/// let mut tags = BTreeMap::new();
/// tags.insert("a.py".to_string(), vec![tag("a.py", "helper", TagKind::Definition)]);
/// tags.insert("b.py".to_string(), vec![tag("b.py", "helper", TagKind::Reference)]);
///
/// let other: BTreeSet<String> = ["a.py".to_string(), "b.py".to_string()].into();
/// let empty = BTreeSet::new();
/// let request = GraphRequest {
///     chat_files: &empty,
///     other_files: &other,
///     mentioned_files: &empty,
///     mentioned_idents: &empty,
/// };
///
/// let (graph, personalization) = SymbolGraphBuilder::new(RankingConfig::default()).build(request, &tags);
/// assert_eq!(graph.node_count(), 2);
/// assert_eq!(graph.edge_count(), 1);
/// assert!(personalization.is_none());
/// ```
pub struct SymbolGraphBuilder {
    config: RankingConfig,
}

impl SymbolGraphBuilder {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// Build the graph for `request` from per-file tags.
    ///
    /// Tags for files outside the chat and other sets are ignored. The
    /// personalization vector is `None` when no files were mentioned;
    /// otherwise mentioned candidates get `100 / node_count` and the rest 0.
    pub fn build(
        &self,
        request: GraphRequest<'_>,
        tags: &BTreeMap<String, Vec<Tag>>,
    ) -> (SymbolGraph, Option<Vec<f64>>) {
        let files: BTreeSet<&String> = request
            .chat_files
            .iter()
            .chain(request.other_files.iter())
            .collect();

        let mut graph = DiGraph::with_capacity(files.len(), 0);
        let mut index = HashMap::with_capacity(files.len());
        for file in &files {
            let idx = graph.add_node((*file).clone());
            index.insert((*file).clone(), idx);
        }

        let mut definers: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut references: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();
        let mut definitions: BTreeMap<(String, String), BTreeSet<u32>> = BTreeMap::new();

        for file in &files {
            let Some(file_tags) = tags.get(*file) else {
                continue;
            };
            for tag in file_tags {
                match tag.kind {
                    TagKind::Definition => {
                        definers.entry(tag.name.as_str()).or_default().insert(file.as_str());
                        definitions
                            .entry(((*file).clone(), tag.name.clone()))
                            .or_default()
                            .insert(tag.line);
                    }
                    TagKind::Reference => {
                        *references
                            .entry(tag.name.as_str())
                            .or_default()
                            .entry(file.as_str())
                            .or_default() += 1;
                    }
                }
            }
        }

        for (ident, referencers) in &references {
            let Some(ident_definers) = definers.get(ident) else {
                continue;
            };
            let mul = self.identifier_multiplier(ident, ident_definers.len(), request.mentioned_idents);

            for (referencer, count) in referencers {
                let mut weight = mul * (*count as f64).sqrt();
                if request.chat_files.contains(*referencer) {
                    weight *= self.config.chat_referencer_multiplier;
                }
                for definer in ident_definers {
                    graph.add_edge(
                        index[*referencer],
                        index[*definer],
                        SymbolEdge {
                            ident: (*ident).to_string(),
                            weight,
                        },
                    );
                }
            }
        }

        let personalization = if request.mentioned_files.is_empty() {
            None
        } else {
            let share = 100.0 / files.len().max(1) as f64;
            let vector = graph
                .node_weights()
                .map(|file| {
                    if request.mentioned_files.contains(file) {
                        share
                    } else {
                        0.0
                    }
                })
                .collect();
            Some(vector)
        };

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built symbol graph"
        );

        (
            SymbolGraph {
                graph,
                index,
                definitions,
            },
            personalization,
        )
    }

    /// Weight multiplier for edges carrying `ident`.
    pub fn identifier_multiplier(
        &self,
        ident: &str,
        definer_count: usize,
        mentioned: &BTreeSet<String>,
    ) -> f64 {
        let mut mul = 1.0;
        if mentioned.contains(ident) {
            mul *= self.config.mentioned_ident_multiplier;
        }
        if is_structured(ident) && ident.chars().count() >= self.config.structured_ident_min_len {
            mul *= self.config.structured_ident_multiplier;
        }
        if ident.starts_with('_') {
            mul *= self.config.private_ident_multiplier;
        }
        if definer_count > self.config.overloaded_definer_threshold {
            mul *= self.config.overloaded_ident_multiplier;
        }
        mul
    }
}

/// snake_case, kebab-case or camelCase.
fn is_structured(ident: &str) -> bool {
    let has_alpha = ident.chars().any(char::is_alphabetic);
    let snake = ident.contains('_') && has_alpha;
    let kebab = ident.contains('-') && has_alpha;
    let camel = ident.chars().any(char::is_uppercase) && ident.chars().any(char::is_lowercase);
    snake || kebab || camel
}
