use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AtlasError;
use crate::types::RefreshPolicy;

/// Relative error under which a budget probe is accepted immediately.
pub const DEFAULT_EARLY_EXIT_TOLERANCE: f64 = 0.15;

/// Average tokens per ranked tag, used only to seed the budget search.
pub const DEFAULT_TOKENS_PER_TAG: usize = 25;

/// Wall-clock cost above which the `auto` refresh policy starts reusing maps.
pub const DEFAULT_AUTO_REFRESH_THRESHOLD_MS: u64 = 1000;

/// PageRank damping factor.
pub const DEFAULT_DAMPING: f64 = 0.85;

/// Top-level configuration loaded from `.atlas.toml`.
///
/// Supports layered resolution: CLI flags > local config > defaults.
///
/// # Examples
///
/// ```
/// use atlas_core::AtlasConfig;
///
/// let config = AtlasConfig::default();
/// assert_eq!(config.map.max_tokens, 1024);
/// assert_eq!(config.budget.tokens_per_tag_estimate, 25);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    /// Map generation settings.
    #[serde(default)]
    pub map: MapConfig,
    /// Durable tag cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Symbol weighting and PageRank settings.
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Token budget search settings.
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl AtlasConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Io`] if the file cannot be read, or
    /// [`AtlasError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use atlas_core::AtlasConfig;
    /// use std::path::Path;
    ///
    /// let config = AtlasConfig::from_file(Path::new(".atlas.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, AtlasError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use atlas_core::{AtlasConfig, RefreshPolicy};
    ///
    /// let toml = r#"
    /// [map]
    /// max_tokens = 2048
    /// refresh = "files"
    /// "#;
    /// let config = AtlasConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.map.max_tokens, 2048);
    /// assert_eq!(config.map.refresh, RefreshPolicy::Files);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, AtlasError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// Map generation configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::{MapConfig, RefreshPolicy};
///
/// let config = MapConfig::default();
/// assert_eq!(config.max_tokens, 1024);
/// assert_eq!(config.refresh, RefreshPolicy::Auto);
/// assert_eq!(config.max_file_size, 1_048_576);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    /// Token budget for the rendered map (default: 1024).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// When a previously rendered map may be reused (default: auto).
    #[serde(default)]
    pub refresh: RefreshPolicy,
    /// Files larger than this many bytes are never candidates (default: 1 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_max_tokens() -> usize {
    1024
}

fn default_max_file_size() -> u64 {
    1_048_576
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            refresh: RefreshPolicy::default(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Durable tag cache configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::CacheConfig;
///
/// let config = CacheConfig::default();
/// assert!(config.enabled);
/// assert_eq!(config.dir.to_str(), Some(".atlas.cache"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory, relative to the repository root unless absolute.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Disable to always re-parse files (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".atlas.cache")
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            enabled: true,
        }
    }
}

/// Identifier weighting and PageRank configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::RankingConfig;
///
/// let config = RankingConfig::default();
/// assert_eq!(config.damping, 0.85);
/// assert_eq!(config.chat_referencer_multiplier, 50.0);
/// assert_eq!(config.overloaded_definer_threshold, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// PageRank damping factor (default: 0.85).
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// Multiplier for identifiers the caller mentioned (default: 10).
    #[serde(default = "default_ten")]
    pub mentioned_ident_multiplier: f64,
    /// Multiplier for long snake/kebab/camel-case identifiers (default: 10).
    #[serde(default = "default_ten")]
    pub structured_ident_multiplier: f64,
    /// Minimum length for the structured-identifier boost (default: 8).
    #[serde(default = "default_structured_min_len")]
    pub structured_ident_min_len: usize,
    /// Multiplier for `_private` identifiers (default: 0.1).
    #[serde(default = "default_tenth")]
    pub private_ident_multiplier: f64,
    /// Multiplier for identifiers defined in many files (default: 0.1).
    #[serde(default = "default_tenth")]
    pub overloaded_ident_multiplier: f64,
    /// More definers than this marks an identifier as overloaded (default: 5).
    #[serde(default = "default_overloaded_threshold")]
    pub overloaded_definer_threshold: usize,
    /// Multiplier for edges whose referencer is a chat file (default: 50).
    #[serde(default = "default_chat_multiplier")]
    pub chat_referencer_multiplier: f64,
    /// Power-iteration cap (default: 100).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Per-node convergence tolerance (default: 1e-6).
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_damping() -> f64 {
    DEFAULT_DAMPING
}

fn default_ten() -> f64 {
    10.0
}

fn default_tenth() -> f64 {
    0.1
}

fn default_structured_min_len() -> usize {
    8
}

fn default_overloaded_threshold() -> usize {
    5
}

fn default_chat_multiplier() -> f64 {
    50.0
}

fn default_max_iterations() -> usize {
    100
}

fn default_tolerance() -> f64 {
    1.0e-6
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            damping: default_damping(),
            mentioned_ident_multiplier: default_ten(),
            structured_ident_multiplier: default_ten(),
            structured_ident_min_len: default_structured_min_len(),
            private_ident_multiplier: default_tenth(),
            overloaded_ident_multiplier: default_tenth(),
            overloaded_definer_threshold: default_overloaded_threshold(),
            chat_referencer_multiplier: default_chat_multiplier(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

/// Token budget search configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::BudgetConfig;
///
/// let config = BudgetConfig::default();
/// assert_eq!(config.early_exit_tolerance, 0.15);
/// assert_eq!(config.tokens_per_tag_estimate, 25);
/// assert_eq!(config.auto_refresh_threshold_ms, 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Accept a probe whose relative error is under this (default: 0.15).
    #[serde(default = "default_early_exit_tolerance")]
    pub early_exit_tolerance: f64,
    /// Seed estimate of tokens per ranked tag (default: 25).
    #[serde(default = "default_tokens_per_tag")]
    pub tokens_per_tag_estimate: usize,
    /// Pipeline cost that enables caching under `auto` refresh (default: 1000 ms).
    #[serde(default = "default_auto_refresh_threshold_ms")]
    pub auto_refresh_threshold_ms: u64,
}

fn default_early_exit_tolerance() -> f64 {
    DEFAULT_EARLY_EXIT_TOLERANCE
}

fn default_tokens_per_tag() -> usize {
    DEFAULT_TOKENS_PER_TAG
}

fn default_auto_refresh_threshold_ms() -> u64 {
    DEFAULT_AUTO_REFRESH_THRESHOLD_MS
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            early_exit_tolerance: default_early_exit_tolerance(),
            tokens_per_tag_estimate: default_tokens_per_tag(),
            auto_refresh_threshold_ms: default_auto_refresh_threshold_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = AtlasConfig::default();
        assert_eq!(config.map.max_tokens, 1024);
        assert_eq!(config.map.refresh, RefreshPolicy::Auto);
        assert!(config.cache.enabled);
        assert_eq!(config.ranking.damping, 0.85);
        assert_eq!(config.ranking.mentioned_ident_multiplier, 10.0);
        assert_eq!(config.ranking.private_ident_multiplier, 0.1);
        assert_eq!(config.ranking.structured_ident_min_len, 8);
        assert_eq!(config.budget.early_exit_tolerance, 0.15);
        assert_eq!(config.budget.tokens_per_tag_estimate, 25);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[map]
max_tokens = 4096
refresh = "manual"
max_file_size = 2048

[cache]
dir = "/tmp/atlas-cache"
enabled = false

[ranking]
damping = 0.9
chat_referencer_multiplier = 20.0

[budget]
early_exit_tolerance = 0.05
tokens_per_tag_estimate = 40
"#;
        let config = AtlasConfig::from_toml(toml).unwrap();
        assert_eq!(config.map.max_tokens, 4096);
        assert_eq!(config.map.refresh, RefreshPolicy::Manual);
        assert_eq!(config.map.max_file_size, 2048);
        assert_eq!(config.cache.dir, PathBuf::from("/tmp/atlas-cache"));
        assert!(!config.cache.enabled);
        assert_eq!(config.ranking.damping, 0.9);
        assert_eq!(config.ranking.chat_referencer_multiplier, 20.0);
        // Unset fields in a present section keep their defaults
        assert_eq!(config.ranking.overloaded_definer_threshold, 5);
        assert_eq!(config.budget.early_exit_tolerance, 0.05);
        assert_eq!(config.budget.tokens_per_tag_estimate, 40);
        assert_eq!(config.budget.auto_refresh_threshold_ms, 1000);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = AtlasConfig::from_toml("").unwrap();
        assert_eq!(config.map.max_tokens, 1024);
        assert_eq!(config.cache.dir, PathBuf::from(".atlas.cache"));
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = AtlasConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_refresh_policy_is_rejected() {
        let result = AtlasConfig::from_toml("[map]\nrefresh = \"sometimes\"\n");
        assert!(result.is_err());
    }
}
