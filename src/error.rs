use thiserror::Error;

/// Classifies remote fetch errors for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The remote authority could not be reached
    Unreachable,
    /// The fetch exceeded the per-cycle time budget
    Timeout,
    /// The response body could not be decoded
    Decode,
    /// The remote authority answered with an error payload
    Remote,
    /// Cursor pagination did not advance (missing or repeated end cursor)
    Pagination,
}

/// Classifies persistent store errors for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Reading stored records failed
    Read,
    /// Writing or deleting a record failed
    Write,
    /// Stored data exists but cannot be decoded
    Corrupt,
}

/// Redirect engine error types
#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("Invalid rule pattern '{pattern}': {source}")]
    RuleCompile {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule has neither a path pattern nor a domain pattern")]
    EmptyPattern,

    #[error("Fetch error: {message}")]
    Fetch {
        kind: FetchErrorKind,
        message: String,
    },

    #[error("Store error: {message}")]
    Store {
        kind: StoreErrorKind,
        message: String,
    },

    #[error("Reconcile error: {0}")]
    Reconcile(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RedirectError {
    pub(crate) fn fetch(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self::Fetch {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self::Store {
            kind,
            message: message.into(),
        }
    }

    /// True for rule pattern failures (bad regex or missing pattern).
    pub fn is_compile_error(&self) -> bool {
        matches!(self, Self::RuleCompile { .. } | Self::EmptyPattern)
    }

    /// True for failures talking to the remote authority.
    pub fn is_fetch_error(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }

    /// True for failures of the durable store.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

pub type Result<T> = std::result::Result<T, RedirectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kind_is_matchable() {
        let err = RedirectError::fetch(FetchErrorKind::Timeout, "fetch exceeded 30s");
        match &err {
            RedirectError::Fetch { kind, .. } => {
                assert!(matches!(kind, FetchErrorKind::Timeout));
            }
            _ => panic!("expected Fetch"),
        }
        assert!(err.is_fetch_error());
        assert!(!err.is_store_error());
    }

    #[test]
    fn test_store_error_kind_is_matchable() {
        let err = RedirectError::store(StoreErrorKind::Corrupt, "bad json");
        match &err {
            RedirectError::Store { kind, .. } => {
                assert!(matches!(kind, StoreErrorKind::Corrupt));
            }
            _ => panic!("expected Store"),
        }
        assert!(err.is_store_error());
    }

    #[test]
    fn test_compile_error_display_includes_pattern() {
        let source = regex::Regex::new("/a/(").unwrap_err();
        let err = RedirectError::RuleCompile {
            pattern: "/a/(".into(),
            source,
        };
        assert!(err.is_compile_error());
        let display = format!("{}", err);
        assert!(display.contains("/a/("), "got: {}", display);
    }

    #[test]
    fn test_empty_pattern_is_compile_error() {
        assert!(RedirectError::EmptyPattern.is_compile_error());
        assert!(!RedirectError::Reconcile("dup".into()).is_compile_error());
    }
}
