use std::sync::Arc;

use atlas_core::BudgetConfig;

use crate::tokens::Tokenizer;
use crate::CancelToken;

/// Chooses how many ranked tags to render so the map fits a token budget.
///
/// Token cost is not monotonic in the number of tags (neighbouring lines
/// merge), so the search keeps the largest feasible rendering seen rather
/// than trusting the last probe.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use atlas_core::BudgetConfig;
/// use atlas_repomap::budget::BudgetedTreeBuilder;
/// use atlas_repomap::tokens::EstimatingTokenizer;
/// use atlas_repomap::CancelToken;
///
/// let builder = BudgetedTreeBuilder::new(Arc::new(EstimatingTokenizer), &BudgetConfig::default());
///
/// // each tag renders as 40 bytes, i.e. 10 estimated tokens
/// let render = |k: usize| "x".repeat(40 * k);
/// let text = builder.search(100, 50, render, &CancelToken::new()).unwrap();
/// assert!(text.len() / 4 <= 50);
/// ```
pub struct BudgetedTreeBuilder {
    tokenizer: Arc<dyn Tokenizer>,
    early_exit_tolerance: f64,
    tokens_per_tag: usize,
}

impl BudgetedTreeBuilder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, config: &BudgetConfig) -> Self {
        Self {
            tokenizer,
            early_exit_tolerance: config.early_exit_tolerance,
            tokens_per_tag: config.tokens_per_tag_estimate.max(1),
        }
    }

    /// Search prefix lengths `0..=tag_count` of the ranked list.
    ///
    /// `render(k)` must produce the map for the first `k` ranked tags plus
    /// any always-included content. Returns the non-empty rendering with
    /// the most tokens not exceeding `max_tokens`, or `None` if no probe
    /// fits or the request was cancelled.
    pub fn search<F>(
        &self,
        tag_count: usize,
        max_tokens: usize,
        mut render: F,
        cancel: &CancelToken,
    ) -> Option<String>
    where
        F: FnMut(usize) -> String,
    {
        let budget = max_tokens as f64;
        let mut lo = 0usize;
        let mut hi = tag_count;
        let mut mid = (max_tokens / self.tokens_per_tag).min(tag_count);
        let mut best: Option<(String, usize)> = None;

        while lo <= hi {
            if cancel.is_cancelled() {
                tracing::debug!("budget search cancelled");
                return None;
            }

            let text = render(mid);
            let tokens = self.tokenizer.count_tokens(&text);
            let feasible = tokens <= max_tokens && !text.is_empty();
            tracing::trace!(prefix = mid, tokens, feasible, "budget probe");

            let better = best.as_ref().map_or(true, |(_, seen)| tokens > *seen);
            if feasible && better {
                best = Some((text, tokens));
            }

            let error = (tokens as f64 - budget).abs() / budget;
            if feasible && error < self.early_exit_tolerance {
                break;
            }

            if tokens < max_tokens {
                lo = mid + 1;
            } else {
                if mid == 0 {
                    break;
                }
                hi = mid - 1;
            }
            mid = (lo + hi) / 2;
        }

        match best {
            Some((text, tokens)) => {
                tracing::debug!(tokens, max_tokens, "map fits budget");
                Some(text)
            }
            None => {
                tracing::info!(max_tokens, "no rendering fits the token budget");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// One token per byte keeps the arithmetic obvious.
    fn builder(config: &BudgetConfig) -> BudgetedTreeBuilder {
        BudgetedTreeBuilder::new(Arc::new(|text: &str| text.len()), config)
    }

    fn defaults() -> BudgetConfig {
        BudgetConfig::default()
    }

    #[test]
    fn generous_budget_takes_everything() {
        let text = builder(&defaults())
            .search(10, 10_000, |k| "ab".repeat(k), &CancelToken::new())
            .unwrap();
        assert_eq!(text.len(), 20);
    }

    #[test]
    fn result_never_exceeds_budget() {
        for budget in [1usize, 7, 33, 100, 250, 999] {
            let result = builder(&defaults()).search(
                200,
                budget,
                |k| "abcdefg".repeat(k),
                &CancelToken::new(),
            );
            if let Some(text) = result {
                assert!(text.len() <= budget, "budget {budget}: {}", text.len());
                assert!(!text.is_empty());
            }
        }
    }

    #[test]
    fn seed_probe_is_budget_over_tokens_per_tag() {
        let probes = RefCell::new(Vec::new());
        let config = BudgetConfig {
            tokens_per_tag_estimate: 10,
            ..defaults()
        };
        builder(&config).search(
            100,
            200,
            |k| {
                probes.borrow_mut().push(k);
                "0123456789".repeat(k)
            },
            &CancelToken::new(),
        );
        // 20 tags at 10 tokens hits the budget exactly
        assert_eq!(probes.into_inner(), vec![20]);
    }

    #[test]
    fn bisects_toward_the_budget() {
        let probes = RefCell::new(Vec::new());
        let config = BudgetConfig {
            early_exit_tolerance: 0.0,
            ..defaults()
        };
        let text = builder(&config)
            .search(
                64,
                100,
                |k| {
                    probes.borrow_mut().push(k);
                    "x".repeat(7 * k)
                },
                &CancelToken::new(),
            )
            .unwrap();

        // 14 tags is the largest prefix within 100 tokens
        assert_eq!(text.len(), 98);
        assert!(probes.into_inner().len() > 1);
    }

    #[test]
    fn tolerates_non_monotonic_costs() {
        // k=5 is cheap, k=6 explodes, k=7 is cheap again but over budget
        let cost = |k: usize| match k {
            6 => 500,
            7 => 120,
            k => 15 * k,
        };
        let config = BudgetConfig {
            early_exit_tolerance: 0.0,
            tokens_per_tag_estimate: 10,
            ..defaults()
        };
        let text = builder(&config)
            .search(10, 100, |k| "y".repeat(cost(k)), &CancelToken::new())
            .unwrap();
        assert!(text.len() <= 100);
        assert_eq!(text.len(), 75);
    }

    #[test]
    fn empty_rendering_is_never_a_result() {
        let result = builder(&defaults()).search(
            2,
            1,
            |k| "some tag text\n".repeat(k),
            &CancelToken::new(),
        );
        assert_eq!(result, None);
    }

    #[test]
    fn always_included_content_over_budget_is_infeasible() {
        let result = builder(&defaults()).search(
            5,
            10,
            |k| format!("{}{}", "c".repeat(50), "t".repeat(k)),
            &CancelToken::new(),
        );
        assert_eq!(result, None);
    }

    #[test]
    fn cancelled_search_returns_none() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = builder(&defaults()).search(10, 1000, |k| "a".repeat(k), &cancel);
        assert_eq!(result, None);
    }
}
