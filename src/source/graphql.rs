use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::RemoteSource;
use crate::error::{FetchErrorKind, RedirectError, Result};
use crate::types::{Redirect, RedirectConnection, RedirectPage};

/// Supplies a bearer token for each request. Acquisition and refresh are the
/// caller's concern.
pub type TokenProvider = Box<dyn Fn() -> Result<String> + Send + Sync>;

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const PAGINATED_QUERY: &str = "query Redirects($hostId: String!, $first: Int!, $after: String) { \
redirects(hostId: $hostId, first: $first, after: $after) { \
edges { cursor node { id fromURL fromDomain toURL updatedAt } } \
pageInfo { hasNextPage endCursor } } }";

const LIST_QUERY: &str = "query Redirects($hostId: String!) { \
redirects(hostId: $hostId) { id fromURL fromDomain toURL updatedAt } }";

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<RedirectsData>,
    #[serde(default)]
    errors: Vec<GraphQlErrorMessage>,
}

#[derive(Deserialize)]
struct GraphQlErrorMessage {
    message: String,
}

#[derive(Deserialize)]
struct RedirectsData {
    redirects: RedirectsField,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RedirectsField {
    List(Vec<Redirect>),
    Connection(RedirectConnection),
}

/// Remote source speaking GraphQL over blocking HTTP
pub struct GraphQlSource {
    endpoint: String,
    host_id: String,
    /// Page size; zero selects the unpaginated query
    page_size: usize,
    token: Option<TokenProvider>,
    agent: ureq::Agent,
}

impl GraphQlSource {
    /// Create a source for `server_url`; `/graphql` is appended when missing.
    pub fn new(server_url: &str, host_id: impl Into<String>) -> Self {
        let server_url = server_url.trim_end_matches('/');
        let endpoint = if server_url.ends_with("/graphql") {
            server_url.to_string()
        } else {
            format!("{}/graphql", server_url)
        };

        Self {
            endpoint,
            host_id: host_id.into(),
            page_size: 0,
            token: None,
            agent: build_agent(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Request pages of `size` redirects (zero disables pagination)
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Bound every HTTP request by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    /// Set the bearer token provider
    pub fn with_token_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Result<String> + Send + Sync + 'static,
    {
        self.token = Some(Box::new(provider));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, after: Option<&str>) -> Result<String> {
        let request = if self.page_size == 0 {
            GraphQlRequest {
                query: LIST_QUERY,
                variables: json!({ "hostId": self.host_id }),
            }
        } else {
            GraphQlRequest {
                query: PAGINATED_QUERY,
                variables: json!({
                    "hostId": self.host_id,
                    "first": self.page_size,
                    "after": after,
                }),
            }
        };
        Ok(serde_json::to_string(&request)?)
    }
}

impl RemoteSource for GraphQlSource {
    fn fetch_page(&self, after: Option<&str>) -> Result<RedirectPage> {
        let body = self.request_body(after)?;

        let mut request = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json");
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token()?));
        }

        let response = request.send(body.as_bytes()).map_err(map_http_error)?;
        let (_, body) = response.into_parts();
        let reply: GraphQlResponse = serde_json::from_reader(body.into_reader()).map_err(|e| {
            RedirectError::fetch(FetchErrorKind::Decode, format!("Invalid response: {}", e))
        })?;

        decode_reply(reply)
    }
}

fn decode_reply(reply: GraphQlResponse) -> Result<RedirectPage> {
    if !reply.errors.is_empty() {
        let messages: Vec<String> = reply.errors.into_iter().map(|e| e.message).collect();
        return Err(RedirectError::fetch(
            FetchErrorKind::Remote,
            messages.join("; "),
        ));
    }

    match reply.data {
        Some(RedirectsData {
            redirects: RedirectsField::List(redirects),
        }) => Ok(RedirectPage::complete(redirects)),
        Some(RedirectsData {
            redirects: RedirectsField::Connection(connection),
        }) => Ok(connection.into_page()),
        None => Err(RedirectError::fetch(
            FetchErrorKind::Decode,
            "Response carries neither data nor errors",
        )),
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn map_http_error(err: ureq::Error) -> RedirectError {
    match err {
        ureq::Error::Timeout(_) => {
            RedirectError::fetch(FetchErrorKind::Timeout, format!("Request timed out: {}", err))
        }
        ureq::Error::StatusCode(code) => RedirectError::fetch(
            FetchErrorKind::Remote,
            format!("Server answered HTTP {}", code),
        ),
        other => RedirectError::fetch(
            FetchErrorKind::Unreachable,
            format!("GraphQL server not reachable: {}", other),
        ),
    }
}
