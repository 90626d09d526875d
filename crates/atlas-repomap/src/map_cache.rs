//! In-memory memo of rendered maps, governed by a [`RefreshPolicy`].

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use atlas_core::RefreshPolicy;

/// Identity of a map request.
///
/// Mentions only take part under [`RefreshPolicy::Auto`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapKey {
    chat_files: Vec<String>,
    other_files: Vec<String>,
    max_tokens: usize,
    mentioned_files: Option<Vec<String>>,
    mentioned_idents: Option<Vec<String>>,
}

/// Memo of rendered maps.
///
/// - `manual`: the last computed map is returned for every request until a
///   refresh is forced.
/// - `files`: maps are reused per file set and budget, ignoring mentions.
/// - `auto`: maps are reused per full key, but only once some computation
///   has been slower than the threshold.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use std::time::Duration;
/// use atlas_core::RefreshPolicy;
/// use atlas_repomap::map_cache::MapCache;
///
/// let files: BTreeSet<String> = ["a.py".to_string()].into();
/// let none = BTreeSet::new();
///
/// let mut cache = MapCache::new(RefreshPolicy::Files, Duration::from_secs(1));
/// let key = cache.key(&none, &files, 512, &none, &none);
/// assert!(cache.lookup(&key, false).is_none());
///
/// cache.store(key.clone(), Some("a.py\n".into()), Duration::from_millis(5));
/// assert_eq!(cache.lookup(&key, false), Some(Some("a.py\n".to_string())));
/// assert!(cache.lookup(&key, true).is_none());
/// ```
#[derive(Debug)]
pub struct MapCache {
    policy: RefreshPolicy,
    threshold: Duration,
    entries: HashMap<MapKey, Option<String>>,
    last: Option<Option<String>>,
    /// Set once a computation exceeded `threshold`.
    slow_seen: bool,
}

impl MapCache {
    pub fn new(policy: RefreshPolicy, threshold: Duration) -> Self {
        Self {
            policy,
            threshold,
            entries: HashMap::new(),
            last: None,
            slow_seen: false,
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Build the key for a request under the current policy.
    pub fn key(
        &self,
        chat_files: &BTreeSet<String>,
        other_files: &BTreeSet<String>,
        max_tokens: usize,
        mentioned_files: &BTreeSet<String>,
        mentioned_idents: &BTreeSet<String>,
    ) -> MapKey {
        let with_mentions = self.policy == RefreshPolicy::Auto;
        MapKey {
            chat_files: chat_files.iter().cloned().collect(),
            other_files: other_files.iter().cloned().collect(),
            max_tokens,
            mentioned_files: with_mentions.then(|| mentioned_files.iter().cloned().collect()),
            mentioned_idents: with_mentions.then(|| mentioned_idents.iter().cloned().collect()),
        }
    }

    /// A reusable result for `key`, if the policy allows one.
    ///
    /// The outer `Option` is the cache hit; the inner one is the stored
    /// result, which may itself be "no map fits".
    pub fn lookup(&self, key: &MapKey, force_refresh: bool) -> Option<Option<String>> {
        if force_refresh {
            return None;
        }
        match self.policy {
            RefreshPolicy::Manual => self.last.clone(),
            RefreshPolicy::Files => self.entries.get(key).cloned(),
            RefreshPolicy::Auto if self.slow_seen => self.entries.get(key).cloned(),
            RefreshPolicy::Auto => None,
        }
    }

    /// Record a freshly computed result and how long it took.
    pub fn store(&mut self, key: MapKey, map: Option<String>, elapsed: Duration) {
        if elapsed > self.threshold && !self.slow_seen {
            tracing::debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                "map computation is slow, enabling reuse"
            );
            self.slow_seen = true;
        }
        if self.policy == RefreshPolicy::Manual {
            self.last = Some(map);
        } else {
            self.last = Some(map.clone());
            self.entries.insert(key, map);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const FAST: Duration = Duration::from_millis(10);
    const SLOW: Duration = Duration::from_millis(1500);

    #[test]
    fn manual_returns_last_map_for_any_request() {
        let mut cache = MapCache::new(RefreshPolicy::Manual, Duration::from_secs(1));
        let none = BTreeSet::new();
        let first = cache.key(&none, &set(&["a.py"]), 100, &none, &none);
        let other = cache.key(&none, &set(&["b.py"]), 900, &none, &none);

        assert_eq!(cache.lookup(&first, false), None);
        cache.store(first, Some("map".into()), FAST);

        assert_eq!(cache.lookup(&other, false), Some(Some("map".into())));
        assert_eq!(cache.lookup(&other, true), None);
    }

    #[test]
    fn manual_keeps_only_the_last_map() {
        let mut cache = MapCache::new(RefreshPolicy::Manual, Duration::from_secs(1));
        let none = BTreeSet::new();
        for (i, file) in ["a.py", "b.py", "c.py"].into_iter().enumerate() {
            let key = cache.key(&none, &set(&[file]), 100, &none, &none);
            cache.store(key, Some(format!("map {i}")), FAST);
        }

        assert!(cache.entries.is_empty());
        let any = cache.key(&none, &set(&["z.py"]), 1, &none, &none);
        assert_eq!(cache.lookup(&any, false), Some(Some("map 2".into())));
    }

    #[test]
    fn files_policy_ignores_mentions() {
        let cache = MapCache::new(RefreshPolicy::Files, Duration::from_secs(1));
        let none = BTreeSet::new();
        let files = set(&["a.py", "b.py"]);

        let plain = cache.key(&none, &files, 100, &none, &none);
        let mentioned = cache.key(&none, &files, 100, &set(&["a.py"]), &set(&["helper"]));
        assert_eq!(plain, mentioned);

        let other_budget = cache.key(&none, &files, 200, &none, &none);
        assert_ne!(plain, other_budget);
    }

    #[test]
    fn auto_policy_keys_include_mentions() {
        let cache = MapCache::new(RefreshPolicy::Auto, Duration::from_secs(1));
        let none = BTreeSet::new();
        let files = set(&["a.py"]);

        let plain = cache.key(&none, &files, 100, &none, &none);
        let mentioned = cache.key(&none, &files, 100, &none, &set(&["helper"]));
        assert_ne!(plain, mentioned);
    }

    #[test]
    fn auto_policy_reuses_only_after_a_slow_run() {
        let mut cache = MapCache::new(RefreshPolicy::Auto, Duration::from_secs(1));
        let none = BTreeSet::new();
        let key = cache.key(&none, &set(&["a.py"]), 100, &none, &none);

        cache.store(key.clone(), Some("fast".into()), FAST);
        assert_eq!(cache.lookup(&key, false), None);

        cache.store(key.clone(), Some("slow".into()), SLOW);
        assert_eq!(cache.lookup(&key, false), Some(Some("slow".into())));

        // stays enabled once seen
        cache.store(key.clone(), Some("fast again".into()), FAST);
        assert_eq!(cache.lookup(&key, false), Some(Some("fast again".into())));
    }

    #[test]
    fn infeasible_results_are_cached_too() {
        let mut cache = MapCache::new(RefreshPolicy::Files, Duration::from_secs(1));
        let none = BTreeSet::new();
        let key = cache.key(&none, &set(&["a.py"]), 1, &none, &none);

        cache.store(key.clone(), None, FAST);
        assert_eq!(cache.lookup(&key, false), Some(None));

        cache.clear();
        assert_eq!(cache.lookup(&key, false), None);
    }
}
