use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::{RedirectError, Result};
use crate::types::MatchKind;

/// `$N` placeholders in a target template
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(\d+)").expect("PLACEHOLDER: hardcoded regex is invalid")
});

/// Characters that make a path segment dynamic. `.` is deliberately absent:
/// `file.html` is treated as a static segment.
const SEGMENT_METACHARS: &[char] = &[
    '\\', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$',
];

/// A compiled redirect directive
#[derive(Debug, Clone)]
pub struct Rule {
    kind: MatchKind,
    /// Original pattern string, the rule's identity
    pattern: String,
    compiled: Regex,
    target: String,
}

impl Rule {
    /// Compile a rule. A non-empty `domain_pattern` makes it a domain rule,
    /// otherwise `path_pattern` is used.
    pub fn compile(path_pattern: &str, domain_pattern: &str, target: &str) -> Result<Self> {
        let (kind, pattern) = if !domain_pattern.is_empty() {
            (MatchKind::DomainPattern, domain_pattern)
        } else if !path_pattern.is_empty() {
            (MatchKind::PathPattern, path_pattern)
        } else {
            return Err(RedirectError::EmptyPattern);
        };

        let compiled = Regex::new(pattern).map_err(|source| RedirectError::RuleCompile {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            kind,
            pattern: pattern.to_string(),
            compiled,
            target: target.to_string(),
        })
    }

    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn set_target(&mut self, target: &str) {
        self.target = target.to_string();
    }

    /// Match `url` and build the resolved target
    pub fn apply(&self, url: &str) -> Option<String> {
        let caps = self.compiled.captures(url)?;
        Some(expand_target(&self.target, &caps))
    }
}

/// Substitute `$1, $2, …` in `target` with captured groups.
///
/// A placeholder whose index is zero or beyond the group count stays literal.
/// A group that exists but did not participate expands to the empty string.
pub fn expand_target(target: &str, caps: &Captures<'_>) -> String {
    if !target.contains('$') {
        return target.to_string();
    }

    PLACEHOLDER
        .replace_all(target, |m: &Captures<'_>| {
            match m[1].parse::<usize>() {
                Ok(n) if n >= 1 && n < caps.len() => {
                    caps.get(n).map_or("", |g| g.as_str()).to_string()
                }
                _ => m[0].to_string(),
            }
        })
        .into_owned()
}

/// First-segment part of a bucket key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum SegmentKey {
    /// Literal first segment
    Static(String),
    /// First segment contains regex syntax
    Wildcard,
}

/// Bucket location of a path rule: `(segment count, first segment)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct BucketKey {
    pub segments: usize,
    pub first: SegmentKey,
}

impl BucketKey {
    /// Key for a path pattern
    pub fn for_pattern(pattern: &str) -> Self {
        let (segments, first) = url_key(pattern);
        let first = first.strip_suffix('$').unwrap_or(first);
        let first = if first.contains(SEGMENT_METACHARS) {
            SegmentKey::Wildcard
        } else {
            SegmentKey::Static(first.to_string())
        };

        Self { segments, first }
    }
}

/// `(segment count, first segment)` of a request path
pub(crate) fn url_key(url: &str) -> (usize, &str) {
    let segments = url.split('/').count();
    let first = url.split('/').nth(1).unwrap_or("");
    (segments, first)
}
