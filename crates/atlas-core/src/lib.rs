//! Core types, configuration, and error handling for Atlas.
//!
//! This crate provides the shared foundation used by the other Atlas crates:
//! - [`AtlasError`]: unified error type using `thiserror`
//! - [`AtlasConfig`]: configuration loaded from `.atlas.toml`
//! - Shared types: [`RefreshPolicy`]

mod config;
mod error;
mod types;

pub use config::{
    AtlasConfig, BudgetConfig, CacheConfig, MapConfig, RankingConfig,
    DEFAULT_AUTO_REFRESH_THRESHOLD_MS, DEFAULT_DAMPING, DEFAULT_EARLY_EXIT_TOLERANCE,
    DEFAULT_TOKENS_PER_TAG,
};
pub use error::AtlasError;
pub use types::RefreshPolicy;

/// A convenience `Result` type for Atlas operations.
pub type Result<T> = std::result::Result<T, AtlasError>;
