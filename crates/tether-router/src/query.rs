//! The discovery query: a one-shot HTTP GET against the router.
//!
//! The query is the only network dependency of this crate, so it sits
//! behind a small trait. Production uses [`HttpRouteQuery`]; tests script
//! the outcome.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The router's answer: current endpoints plus their lifetime in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteDocument {
    pub server: String,
    #[serde(default)]
    pub secondary: Option<String>,
    pub ttl: i64,
}

/// Discovery failure. Always recovered locally via the fallback set; never
/// surfaced to connection callers.
#[derive(Debug)]
pub enum QueryError {
    /// The request did not complete (DNS, connect, timeout).
    Unreachable(String),
    /// The router answered with a non-success status.
    Status(u16),
    /// The response body was not a valid route document.
    Malformed(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Unreachable(e) => write!(f, "router unreachable: {e}"),
            QueryError::Status(code) => write!(f, "router returned status {code}"),
            QueryError::Malformed(e) => write!(f, "malformed route document: {e}"),
        }
    }
}

impl std::error::Error for QueryError {}

/// A stateless request/response function resolving the route document for
/// an application id.
pub trait RouteQuery: Send + Sync + 'static {
    fn fetch(
        &self,
        app_id: &str,
    ) -> impl Future<Output = Result<RouteDocument, QueryError>> + Send;
}

/// Production query against the well-known router address.
pub struct HttpRouteQuery {
    client: reqwest::Client,
    router_url: String,
}

impl HttpRouteQuery {
    /// `router_url` is the scheme+host of the router, e.g.
    /// `https://router.tether-realtime.net`.
    pub fn new(router_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("default reqwest client");
        Self {
            client,
            router_url: router_url.into(),
        }
    }
}

impl RouteQuery for HttpRouteQuery {
    async fn fetch(&self, app_id: &str) -> Result<RouteDocument, QueryError> {
        let url = format!("{}/v1/route?appId={}&secure=1", self.router_url, app_id);
        tracing::debug!(%url, "querying realtime router");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QueryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Status(status.as_u16()));
        }

        response
            .json::<RouteDocument>()
            .await
            .map_err(|e| QueryError::Malformed(e.to_string()))
    }
}
