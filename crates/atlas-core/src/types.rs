use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// When a previously rendered repository map may be reused.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use atlas_core::RefreshPolicy;
///
/// let policy: RefreshPolicy = "files".parse().unwrap();
/// assert_eq!(policy, RefreshPolicy::Files);
///
/// let policy: RefreshPolicy = serde_json::from_str("\"manual\"").unwrap();
/// assert_eq!(policy, RefreshPolicy::Manual);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// Always return the last computed map until a refresh is forced.
    Manual,
    /// Reuse a cached map keyed only by file identity and budget.
    Files,
    /// Reuse a cached map (keyed by files, budget and mentions) once the
    /// pipeline has proven itself expensive.
    #[default]
    Auto,
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshPolicy::Manual => write!(f, "manual"),
            RefreshPolicy::Files => write!(f, "files"),
            RefreshPolicy::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(RefreshPolicy::Manual),
            "files" => Ok(RefreshPolicy::Files),
            "auto" => Ok(RefreshPolicy::Auto),
            other => Err(format!("unknown refresh policy: {other}")),
        }
    }
}
