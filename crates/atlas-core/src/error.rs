use std::path::PathBuf;

/// The error type shared by the Atlas crates.
///
/// Engine internals keep narrower error types and fold into this one at
/// their public boundary; the binary turns it into a `miette` report.
///
/// # Examples
///
/// ```
/// use atlas_core::AtlasError;
///
/// let err = AtlasError::Config("unknown refresh policy".into());
/// assert!(err.to_string().contains("unknown refresh policy"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value was rejected.
    #[error("configuration error: {0}")]
    Config(String),

    /// The durable tag store failed and could not be repaired.
    #[error("tag store error: {0}")]
    Database(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("no such file or directory: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A map was requested with a token budget of zero.
    #[error("invalid token budget: {0} (must be greater than zero)")]
    InvalidBudget(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_with_their_message() {
        let err: AtlasError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked").into();
        assert!(matches!(err, AtlasError::Io(_)));
        assert_eq!(err.to_string(), "I/O failure: locked");
    }

    #[test]
    fn toml_errors_convert() {
        let err: AtlasError = toml::from_str::<toml::Value>("[map").unwrap_err().into();
        assert!(err.to_string().starts_with("invalid TOML"));
    }

    #[test]
    fn missing_path_is_displayed() {
        let err = AtlasError::FileNotFound(PathBuf::from("repo/missing"));
        assert_eq!(err.to_string(), "no such file or directory: repo/missing");
    }

    #[test]
    fn invalid_budget_mentions_value() {
        let err = AtlasError::InvalidBudget(0);
        assert!(err.to_string().contains("invalid token budget: 0"));
    }
}
