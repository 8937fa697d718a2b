use url::Url;

use crate::index::is_absolute;

/// An inbound request reduced to the two forms rules are matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    /// `scheme://host[:port]`, lower-cased
    origin: Option<String>,
    /// Origin followed by the path, lower-cased
    absolute: Option<String>,
    /// Path only, lower-cased, without query or fragment
    path: String,
}

impl RequestUrl {
    /// Normalize a raw request URL.
    ///
    /// Absolute `http(s)` URLs yield both forms; anything else is taken as a
    /// bare path. Query strings and fragments are dropped.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if is_absolute(raw) {
            if let Ok(url) = Url::parse(raw) {
                if let Some(host) = url.host_str() {
                    let origin = match url.port() {
                        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                        None => format!("{}://{}", url.scheme(), host),
                    };
                    let path = url.path().to_lowercase();
                    // Keep "https://old.com" as given instead of the parser's "https://old.com/"
                    let absolute = if path == "/" && !has_explicit_path(raw) {
                        origin.clone()
                    } else {
                        format!("{}{}", origin, path)
                    };
                    return Self {
                        absolute: Some(absolute.to_lowercase()),
                        origin: Some(origin.to_lowercase()),
                        path,
                    };
                }
            }
        }

        Self {
            origin: None,
            absolute: None,
            path: strip_query(raw).to_lowercase(),
        }
    }

    /// Build from what a hosting layer knows: TLS state, Host header and path
    pub fn from_parts(tls: bool, host: &str, path: &str) -> Self {
        let scheme = if tls { "https" } else { "http" };
        let path = strip_query(path).to_lowercase();
        let path = if path.is_empty() { "/".to_string() } else { path };

        if host.is_empty() {
            return Self {
                origin: None,
                absolute: None,
                path,
            };
        }

        let origin = format!("{}://{}", scheme, host).to_lowercase();
        Self {
            absolute: Some(format!("{}{}", origin, path)),
            origin: Some(origin),
            path,
        }
    }

    pub fn absolute(&self) -> Option<&str> {
        self.absolute.as_deref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve a rule target against this request's origin.
    ///
    /// Absolute targets are returned unchanged; relative targets are prefixed
    /// with the origin when there is one.
    pub fn resolve_target(&self, target: &str) -> String {
        match &self.origin {
            Some(origin) if !is_absolute(target) => {
                if target.starts_with('/') {
                    format!("{}{}", origin, target)
                } else {
                    format!("{}/{}", origin, target)
                }
            }
            _ => target.to_string(),
        }
    }
}

fn strip_query(raw: &str) -> &str {
    raw.split(['?', '#']).next().unwrap_or(raw)
}

/// True if something follows the authority in an absolute URL
fn has_explicit_path(raw: &str) -> bool {
    raw.split_once("://")
        .map(|(_, rest)| strip_query(rest).contains('/'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute() {
        let req = RequestUrl::parse("https://Example.com/Dedicated/Host?x=1#top");
        assert_eq!(req.origin(), Some("https://example.com"));
        assert_eq!(req.absolute(), Some("https://example.com/dedicated/host"));
        assert_eq!(req.path(), "/dedicated/host");
    }

    #[test]
    fn test_parse_bare_host() {
        let req = RequestUrl::parse("https://old.com");
        assert_eq!(req.absolute(), Some("https://old.com"));
        assert_eq!(req.path(), "/");

        let req = RequestUrl::parse("https://old.com/");
        assert_eq!(req.absolute(), Some("https://old.com/"));
    }

    #[test]
    fn test_parse_keeps_non_default_port() {
        let req = RequestUrl::parse("http://localhost:8081/a");
        assert_eq!(req.absolute(), Some("http://localhost:8081/a"));

        let req = RequestUrl::parse("https://example.com:443/a");
        assert_eq!(req.absolute(), Some("https://example.com/a"));
    }

    #[test]
    fn test_parse_path_only() {
        let req = RequestUrl::parse("/School/Assignments?page=2");
        assert_eq!(req.absolute(), None);
        assert_eq!(req.origin(), None);
        assert_eq!(req.path(), "/school/assignments");
    }

    #[test]
    fn test_from_parts() {
        let req = RequestUrl::parse("http://example.com/a");
        assert_eq!(RequestUrl::from_parts(false, "Example.com", "/a"), req);

        let req = RequestUrl::from_parts(true, "example.com", "");
        assert_eq!(req.absolute(), Some("https://example.com/"));

        let req = RequestUrl::from_parts(true, "", "/a");
        assert_eq!(req.absolute(), None);
    }

    #[test]
    fn test_resolve_target() {
        let req = RequestUrl::parse("https://example.com/dedicated/host");
        assert_eq!(req.resolve_target("/host"), "https://example.com/host");
        assert_eq!(req.resolve_target("host"), "https://example.com/host");
        assert_eq!(req.resolve_target("https://new.com/"), "https://new.com/");

        let req = RequestUrl::parse("/dedicated/host");
        assert_eq!(req.resolve_target("/host"), "/host");
    }
}
