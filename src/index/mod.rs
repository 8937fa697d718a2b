//! Rule index.
//!
//! Path rules are sharded by `(segment count, first segment)` so a lookup only
//! scans the handful of rules that could possibly match. Domain rules are kept
//! in one ordered list and matched against the full URL.

mod rule;

pub use rule::{expand_target, Rule};

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::MatchKind;
use rule::{url_key, BucketKey, SegmentKey};

/// Rule index interface.
///
/// Implementations must be safe to query from many threads while a single
/// writer mutates them.
pub trait RedirectIndex: Send + Sync {
    /// Compile and insert a rule. On error nothing is inserted.
    fn index_rule(&self, path_pattern: &str, domain_pattern: &str, target: &str) -> Result<()>;

    /// Resolve `url` against the indexed rules
    fn match_url(&self, url: &str) -> Option<String>;

    /// Replace the target of the rule with this exact pattern.
    /// Returns false (and changes nothing) when no such rule exists.
    fn update(&self, path_pattern: &str, domain_pattern: &str, target: &str) -> bool;

    /// Remove the first rule with this exact pattern.
    /// Returns false when no such rule exists.
    fn delete(&self, path_pattern: &str, domain_pattern: &str) -> bool;

    /// Number of rules held
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every rule
    fn clear(&self);
}

/// Rule counts by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub path_rules: usize,
    pub domain_rules: usize,
    /// Non-empty path buckets (static and wildcard)
    pub buckets: usize,
}

/// All path rules sharing one segment count
#[derive(Debug, Default)]
struct LengthBucket {
    by_prefix: HashMap<String, Vec<Rule>>,
    /// Rules whose first segment is a regex, scanned after `by_prefix`
    wildcard: Vec<Rule>,
}

impl LengthBucket {
    fn rules_mut(&mut self, first: &SegmentKey) -> Option<&mut Vec<Rule>> {
        match first {
            SegmentKey::Static(prefix) => self.by_prefix.get_mut(prefix),
            SegmentKey::Wildcard => Some(&mut self.wildcard),
        }
    }

    fn is_empty(&self) -> bool {
        self.by_prefix.is_empty() && self.wildcard.is_empty()
    }
}

#[derive(Debug, Default)]
struct IndexInner {
    paths: HashMap<usize, LengthBucket>,
    domains: Vec<Rule>,
}

impl IndexInner {
    fn path_rules_mut(&mut self, pattern: &str) -> Option<&mut Vec<Rule>> {
        let key = BucketKey::for_pattern(pattern);
        self.paths.get_mut(&key.segments)?.rules_mut(&key.first)
    }

    /// Remove empty vectors and buckets left behind by a delete
    fn prune(&mut self, pattern: &str) {
        let key = BucketKey::for_pattern(pattern);
        if let Some(bucket) = self.paths.get_mut(&key.segments) {
            if let SegmentKey::Static(prefix) = &key.first {
                if bucket.by_prefix.get(prefix).is_some_and(Vec::is_empty) {
                    bucket.by_prefix.remove(prefix);
                }
            }
            if bucket.is_empty() {
                self.paths.remove(&key.segments);
            }
        }
    }
}

/// Length/prefix bucketed rule index behind a single reader/writer lock.
#[derive(Debug, Default)]
pub struct RuleIndex {
    inner: RwLock<IndexInner>,
}

impl RuleIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an already compiled rule
    pub fn insert(&self, rule: Rule) {
        let mut inner = self.inner.write();
        match rule.kind() {
            MatchKind::DomainPattern => inner.domains.push(rule),
            MatchKind::PathPattern => {
                let key = BucketKey::for_pattern(rule.pattern());
                let bucket = inner.paths.entry(key.segments).or_default();
                match key.first {
                    SegmentKey::Static(prefix) => {
                        bucket.by_prefix.entry(prefix).or_default().push(rule)
                    }
                    SegmentKey::Wildcard => bucket.wildcard.push(rule),
                }
            }
        }
    }

    /// Current rule counts
    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read();
        let mut stats = IndexStats {
            domain_rules: inner.domains.len(),
            ..IndexStats::default()
        };
        for bucket in inner.paths.values() {
            for rules in bucket.by_prefix.values() {
                stats.path_rules += rules.len();
                stats.buckets += 1;
            }
            if !bucket.wildcard.is_empty() {
                stats.path_rules += bucket.wildcard.len();
                stats.buckets += 1;
            }
        }
        stats
    }

    fn match_domain(inner: &IndexInner, url: &str) -> Option<String> {
        inner.domains.iter().find_map(|rule| rule.apply(url))
    }

    fn match_path(inner: &IndexInner, url: &str) -> Option<String> {
        let (segments, first) = url_key(url);
        let bucket = inner.paths.get(&segments)?;

        bucket
            .by_prefix
            .get(first)
            .into_iter()
            .flatten()
            .chain(bucket.wildcard.iter())
            .find_map(|rule| rule.apply(url))
    }
}

impl RedirectIndex for RuleIndex {
    fn index_rule(&self, path_pattern: &str, domain_pattern: &str, target: &str) -> Result<()> {
        // Compile outside the lock so writers stay short.
        let rule = Rule::compile(path_pattern, domain_pattern, target)?;
        self.insert(rule);
        Ok(())
    }

    fn match_url(&self, url: &str) -> Option<String> {
        let inner = self.inner.read();

        if is_absolute(url) {
            if let Some(target) = Self::match_domain(&inner, url) {
                return Some(target);
            }
        }

        Self::match_path(&inner, url)
    }

    fn update(&self, path_pattern: &str, domain_pattern: &str, target: &str) -> bool {
        let mut inner = self.inner.write();

        let rules = if !domain_pattern.is_empty() {
            Some(&mut inner.domains)
        } else {
            inner.path_rules_mut(path_pattern)
        };
        let pattern = if domain_pattern.is_empty() {
            path_pattern
        } else {
            domain_pattern
        };

        match rules.and_then(|rules| rules.iter_mut().find(|r| r.pattern() == pattern)) {
            Some(rule) => {
                rule.set_target(target);
                true
            }
            None => false,
        }
    }

    fn delete(&self, path_pattern: &str, domain_pattern: &str) -> bool {
        let mut inner = self.inner.write();

        if !domain_pattern.is_empty() {
            return match inner.domains.iter().position(|r| r.pattern() == domain_pattern) {
                Some(pos) => {
                    inner.domains.remove(pos);
                    true
                }
                None => false,
            };
        }

        let removed = match inner.path_rules_mut(path_pattern) {
            Some(rules) => match rules.iter().position(|r| r.pattern() == path_pattern) {
                Some(pos) => {
                    rules.remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        };
        if removed {
            inner.prune(path_pattern);
        }
        removed
    }

    fn len(&self) -> usize {
        let stats = self.stats();
        stats.path_rules + stats.domain_rules
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        inner.paths.clear();
        inner.domains.clear();
    }
}

/// True if `url` carries an http(s) scheme prefix
pub(crate) fn is_absolute(url: &str) -> bool {
    let has_prefix = |prefix: &str| {
        url.get(..prefix.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(prefix))
    };
    has_prefix("http://") || has_prefix("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_rule_with_capture() {
        let index = RuleIndex::new();
        index.index_rule("/a/(.*)", "", "/b/$1").unwrap();
        assert_eq!(index.match_url("/a/x").as_deref(), Some("/b/x"));
    }

    #[test]
    fn test_domain_rule() {
        let index = RuleIndex::new();
        index
            .index_rule("", "old\\.com$", "https://new.com/")
            .unwrap();
        assert_eq!(
            index.match_url("https://old.com").as_deref(),
            Some("https://new.com/")
        );
        assert!(index.match_url("https://other.com").is_none());
    }

    #[test]
    fn test_domain_rules_not_checked_for_relative_urls() {
        let index = RuleIndex::new();
        index.index_rule("", "old", "https://new.com/").unwrap();
        assert!(index.match_url("/old").is_none());
    }

    #[test]
    fn test_domain_rules_in_insertion_order() {
        let index = RuleIndex::new();
        index.index_rule("", "example\\.com", "https://first/").unwrap();
        index.index_rule("", "example\\.com/x", "https://second/").unwrap();
        assert_eq!(
            index.match_url("https://example.com/x").as_deref(),
            Some("https://first/")
        );
    }

    #[test]
    fn test_buckets_do_not_leak() {
        let index = RuleIndex::new();
        index.index_rule("/a/(.*)", "", "/one/$1").unwrap();
        index.index_rule("/b/(.*)/(.*)", "", "/two/$1/$2").unwrap();

        // Different segment count: /a rule must not answer a 4-segment url
        assert!(index.match_url("/a/x/y").is_none());
        // Different prefix: /b rule must not answer /a
        assert_eq!(index.match_url("/a/x").as_deref(), Some("/one/x"));
        assert_eq!(index.match_url("/b/x/y").as_deref(), Some("/two/x/y"));

        let stats = index.stats();
        assert_eq!(stats.path_rules, 2);
        assert_eq!(stats.buckets, 2);
    }

    #[test]
    fn test_wildcard_first_segment() {
        let index = RuleIndex::new();
        index.index_rule("/(.*)/careers", "", "/jobs/$1").unwrap();
        index.index_rule("/team/careers", "", "/static").unwrap();

        assert_eq!(index.match_url("/team/careers").as_deref(), Some("/static"));
        assert_eq!(index.match_url("/sales/careers").as_deref(), Some("/jobs/sales"));
    }

    #[test]
    fn test_update_changes_target_only() {
        let index = RuleIndex::new();
        index.index_rule("/a/(.*)", "", "/b/$1").unwrap();
        assert!(index.update("/a/(.*)", "", "/c/$1"));
        assert_eq!(index.match_url("/a/x").as_deref(), Some("/c/x"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_update_domain_rule() {
        let index = RuleIndex::new();
        index.index_rule("", "old\\.com$", "https://new.com/").unwrap();
        assert!(index.update("", "old\\.com$", "https://newer.com/"));
        assert_eq!(
            index.match_url("https://old.com").as_deref(),
            Some("https://newer.com/")
        );
    }

    #[test]
    fn test_update_missing_is_noop() {
        let index = RuleIndex::new();
        index.index_rule("/a/(.*)", "", "/b/$1").unwrap();
        assert!(!index.update("/a/(.+)", "", "/c/$1"));
        assert!(!index.update("/zzz", "", "/c"));
        assert_eq!(index.match_url("/a/x").as_deref(), Some("/b/x"));
    }

    #[test]
    fn test_delete() {
        let index = RuleIndex::new();
        index.index_rule("/a/(.*)", "", "/b/$1").unwrap();
        index.index_rule("", "old\\.com$", "https://new.com/").unwrap();

        assert!(index.delete("/a/(.*)", ""));
        assert!(index.match_url("/a/x").is_none());
        assert!(index.delete("", "old\\.com$"));
        assert!(index.match_url("https://old.com").is_none());

        assert!(index.is_empty());
        assert_eq!(index.stats().buckets, 0);
        assert!(!index.delete("/a/(.*)", ""));
    }

    #[test]
    fn test_delete_removes_first_duplicate_only() {
        let index = RuleIndex::new();
        index.index_rule("/a", "", "/first").unwrap();
        index.index_rule("/a", "", "/second").unwrap();

        assert!(index.delete("/a", ""));
        assert_eq!(index.match_url("/a").as_deref(), Some("/second"));
    }

    #[test]
    fn test_compile_failure_inserts_nothing() {
        let index = RuleIndex::new();
        let err = index.index_rule("/a/(", "", "/b").unwrap_err();
        assert!(err.is_compile_error());
        assert!(index.is_empty());
    }

    #[test]
    fn test_absolute_url_falls_back_to_path_buckets() {
        let index = RuleIndex::new();
        // "https://x/y" splits into 4 segments with an empty first segment
        index.index_rule("https://x/(.*)", "", "/y/$1").unwrap();
        assert_eq!(index.match_url("https://x/z").as_deref(), Some("/y/z"));
    }

    #[test]
    fn test_root_rule() {
        let index = RuleIndex::new();
        index.index_rule("^/$", "", "/home").unwrap();
        assert_eq!(index.match_url("/").as_deref(), Some("/home"));
        assert!(index.match_url("/x").is_none());
    }

    #[test]
    fn test_is_absolute() {
        assert!(is_absolute("http://a"));
        assert!(is_absolute("HTTPS://a"));
        assert!(!is_absolute("/a"));
        assert!(!is_absolute("ftp://a"));
    }

    #[test]
    fn test_clear() {
        let index = RuleIndex::new();
        index.index_rule("/a", "", "/b").unwrap();
        index.clear();
        assert!(index.is_empty());
    }
}
