//! Personalized PageRank over the file graph, and the ranked tag list
//! derived from it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use atlas_core::RankingConfig;

use crate::graph::SymbolGraph;

/// A personalization vector with no mass to normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RankingDegenerate;

/// What a ranked entry points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagTarget {
    /// A definition of `name` at zero-based `line`.
    Symbol { name: String, line: u32 },
    /// The file itself, for files without ranked definitions.
    WholeFile,
}

/// One entry of the ranked output.
///
/// # Examples
///
/// ```
/// use atlas_repomap::rank::{RankedTag, TagTarget};
///
/// let tag = RankedTag {
///     file: "a.py".into(),
///     target: TagTarget::Symbol { name: "compute_total".into(), line: 0 },
///     score: 0.42,
/// };
/// assert_eq!(tag.name(), Some("compute_total"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RankedTag {
    pub file: String,
    pub target: TagTarget,
    pub score: f64,
}

impl RankedTag {
    pub fn name(&self) -> Option<&str> {
        match &self.target {
            TagTarget::Symbol { name, .. } => Some(name),
            TagTarget::WholeFile => None,
        }
    }

    pub fn line(&self) -> Option<u32> {
        match &self.target {
            TagTarget::Symbol { line, .. } => Some(*line),
            TagTarget::WholeFile => None,
        }
    }
}

/// Scores files with weighted PageRank and turns the scores into a
/// deterministic [`RankedTag`] order.
///
/// # Examples
///
/// ```
/// use std::collections::{BTreeMap, BTreeSet};
/// use atlas_core::RankingConfig;
/// use atlas_repomap::graph::{GraphRequest, SymbolGraphBuilder};
/// use atlas_repomap::rank::RelevanceRanker;
///
/// let files: BTreeSet<String> = ["a.rs".to_string(), "b.rs".to_string()].into();
/// let empty = BTreeSet::new();
/// let request = GraphRequest {
///     chat_files: &empty,
///     other_files: &files,
///     mentioned_files: &empty,
///     mentioned_idents: &empty,
/// };
/// let (graph, personalization) =
///     SymbolGraphBuilder::new(RankingConfig::default()).build(request, &BTreeMap::new());
///
/// let ranks = RelevanceRanker::new(&RankingConfig::default()).rank(&graph, personalization.as_deref());
/// assert!((ranks.iter().sum::<f64>() - 1.0).abs() < 1e-9);
/// ```
pub struct RelevanceRanker {
    damping: f64,
    max_iterations: usize,
    tolerance: f64,
}

impl RelevanceRanker {
    pub fn new(config: &RankingConfig) -> Self {
        Self {
            damping: config.damping,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }

    /// Per-node scores, indexed like the graph's nodes. Sums to 1.
    ///
    /// A personalization vector without positive mass is dropped and the
    /// ranking recomputed uniformly.
    pub fn rank(&self, graph: &SymbolGraph, personalization: Option<&[f64]>) -> Vec<f64> {
        match self.pagerank(graph, personalization) {
            Ok(ranks) => ranks,
            Err(RankingDegenerate) => {
                tracing::warn!("personalization has no mass, ranking without it");
                // uniform personalization always has mass
                self.pagerank(graph, None).unwrap_or_default()
            }
        }
    }

    fn pagerank(
        &self,
        graph: &SymbolGraph,
        personalization: Option<&[f64]>,
    ) -> Result<Vec<f64>, RankingDegenerate> {
        let n = graph.node_count();
        if n == 0 {
            return Ok(Vec::new());
        }
        let uniform = 1.0 / n as f64;

        let teleport: Vec<f64> = match personalization {
            Some(weights) => {
                let total: f64 = weights.iter().take(n).filter(|w| **w > 0.0).sum();
                if !(total > 0.0 && total.is_finite()) {
                    return Err(RankingDegenerate);
                }
                (0..n)
                    .map(|i| weights.get(i).copied().filter(|w| *w > 0.0).unwrap_or(0.0) / total)
                    .collect()
            }
            None => vec![uniform; n],
        };

        let out_weight = graph.out_weights();
        let edges: Vec<(usize, usize, f64)> = graph
            .edges()
            .filter(|(src, _, _)| out_weight[*src] > 0.0)
            .map(|(src, dst, e)| (src, dst, e.weight / out_weight[src]))
            .collect();

        let mut ranks = vec![uniform; n];
        for iteration in 0..self.max_iterations {
            let previous = ranks;
            let dangling: f64 = (0..n)
                .filter(|i| out_weight[*i] <= 0.0)
                .map(|i| previous[i])
                .sum();

            ranks = vec![0.0; n];
            for &(src, dst, share) in &edges {
                ranks[dst] += self.damping * previous[src] * share;
            }
            for (i, rank) in ranks.iter_mut().enumerate() {
                *rank += (self.damping * dangling + (1.0 - self.damping)) * teleport[i];
            }

            let err: f64 = ranks
                .iter()
                .zip(&previous)
                .map(|(a, b)| (a - b).abs())
                .sum();
            if err < n as f64 * self.tolerance {
                tracing::debug!(iterations = iteration + 1, "pagerank converged");
                return Ok(ranks);
            }
        }

        tracing::debug!(
            iterations = self.max_iterations,
            "pagerank hit the iteration cap"
        );
        Ok(ranks)
    }

    /// Distribute node scores onto the definitions they point at and order
    /// the result.
    ///
    /// Each node's score is split across its outgoing edges in proportion to
    /// edge weight; the share lands on `(target file, identifier)`. Every
    /// definition line of that identifier in that file becomes one entry.
    /// Chat files are excluded. Candidate files with no scored definition
    /// enter as [`TagTarget::WholeFile`] entries carrying their node score,
    /// and the whole list is ordered by [`compare_ranked`].
    pub fn rank_tags(
        &self,
        graph: &SymbolGraph,
        ranks: &[f64],
        chat_files: &BTreeSet<String>,
    ) -> Vec<RankedTag> {
        let out_weight = graph.out_weights();
        let mut scores: BTreeMap<(usize, &str), f64> = BTreeMap::new();
        for (src, dst, edge) in graph.edges() {
            if out_weight[src] <= 0.0 {
                continue;
            }
            let share = ranks.get(src).copied().unwrap_or(0.0) * edge.weight / out_weight[src];
            *scores.entry((dst, edge.ident.as_str())).or_default() += share;
        }

        let mut ranked = Vec::new();
        for ((node, ident), score) in scores {
            let file = graph.file(node);
            if chat_files.contains(file) {
                continue;
            }
            let Some(lines) = graph.definition_lines(file, ident) else {
                continue;
            };
            for line in lines {
                ranked.push(RankedTag {
                    file: file.to_string(),
                    target: TagTarget::Symbol {
                        name: ident.to_string(),
                        line: *line,
                    },
                    score,
                });
            }
        }

        let covered: HashSet<String> = ranked.iter().map(|t| t.file.clone()).collect();
        let whole_files: Vec<RankedTag> = graph
            .files()
            .enumerate()
            .filter(|(_, file)| !chat_files.contains(*file) && !covered.contains(*file))
            .map(|(i, file)| RankedTag {
                file: file.to_string(),
                target: TagTarget::WholeFile,
                score: ranks.get(i).copied().unwrap_or(0.0),
            })
            .collect();

        ranked.extend(whole_files);
        ranked.sort_by(compare_ranked);
        ranked
    }
}

/// Score descending, then file, name and line ascending.
fn compare_ranked(a: &RankedTag, b: &RankedTag) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.file.cmp(&b.file))
        .then_with(|| a.name().cmp(&b.name()))
        .then_with(|| a.line().cmp(&b.line()))
}
