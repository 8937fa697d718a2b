use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which part of the request a rule is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    /// Matched against the request path only
    PathPattern,
    /// Matched against the full absolute URL (scheme + host + path)
    DomainPattern,
}

/// Redirect record as published by the remote authority.
///
/// `id` is the unit of reconciliation. `from_url` / `from_domain` become the
/// rule pattern and `to_url` the target template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub id: String,
    #[serde(rename = "fromURL", default)]
    pub from_url: String,
    /// Empty unless this is a domain rule
    #[serde(rename = "fromDomain", default)]
    pub from_domain: String,
    #[serde(rename = "toURL")]
    pub to_url: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Redirect {
    /// Create a path redirect
    pub fn new(
        id: impl Into<String>,
        from_url: impl Into<String>,
        to_url: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            from_url: from_url.into(),
            from_domain: String::new(),
            to_url: to_url.into(),
            updated_at,
        }
    }

    /// Turn this record into a domain redirect
    pub fn with_domain(mut self, from_domain: impl Into<String>) -> Self {
        self.from_domain = from_domain.into();
        self
    }

    pub fn match_kind(&self) -> MatchKind {
        if self.from_domain.is_empty() {
            MatchKind::PathPattern
        } else {
            MatchKind::DomainPattern
        }
    }

    /// The pattern string the index keys this record's rule by
    pub fn pattern(&self) -> &str {
        match self.match_kind() {
            MatchKind::PathPattern => &self.from_url,
            MatchKind::DomainPattern => &self.from_domain,
        }
    }

    /// True if both records resolve to the same rule identity in the index
    pub fn same_pattern(&self, other: &Redirect) -> bool {
        self.match_kind() == other.match_kind() && self.pattern() == other.pattern()
    }
}

/// Cursor pagination info
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

/// One edge of a paginated redirect connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectEdge {
    pub node: Redirect,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Paginated redirect connection as returned by the remote authority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectConnection {
    #[serde(default)]
    pub edges: Vec<RedirectEdge>,
    #[serde(default)]
    pub page_info: PageInfo,
}

impl RedirectConnection {
    /// Flatten the connection into a page
    pub fn into_page(self) -> RedirectPage {
        RedirectPage {
            redirects: self.edges.into_iter().map(|e| e.node).collect(),
            has_next_page: self.page_info.has_next_page,
            end_cursor: self.page_info.end_cursor,
        }
    }
}

/// One page of redirects from a remote source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectPage {
    pub redirects: Vec<Redirect>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl RedirectPage {
    /// A single page holding the complete set
    pub fn complete(redirects: Vec<Redirect>) -> Self {
        Self {
            redirects,
            has_next_page: false,
            end_cursor: None,
        }
    }
}
