//! Transport port and its HTTP implementation.
//!
//! One dispatch is exactly one call on a [`Transport`]. Transports return the
//! raw JSON body; classifying it into entities and views is the caller's job,
//! so a malformed response can be told apart from a failed request.
//!
//! # Routes
//!
//! | Operation | Request |
//! |---|---|
//! | create | `POST /{endpoint}/create-{endpoint}` |
//! | update | `PATCH /{endpoint}/update-{endpoint}?id={id}` |
//! | delete | `DELETE /{endpoint}/delete-{endpoint}?id={id}` |
//! | list | `GET /{endpoint}/find-many?page=..&limit=..&..` |
//! | detail | `GET /{endpoint}/find-by-id?id={id}` |

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::{Map, Value};

use crate::domain::{EntityId, ListQuery};
use crate::error::TransportError;

/// Deferred transport call.
pub type TransportFuture = BoxFuture<'static, Result<Value, TransportError>>;

// =============================================================================
// Transport Port
// =============================================================================

/// Remote resource endpoint.
///
/// Every method returns a deferred future; nothing is sent until it is
/// awaited. Implementations never retry.
pub trait Transport: Send + Sync {
    /// Creates an entity; returns the created entity.
    fn create(&self, endpoint: &str, payload: &Map<String, Value>) -> TransportFuture;

    /// Updates an entity; returns the updated entity.
    fn update(&self, endpoint: &str, id: &EntityId, payload: &Map<String, Value>)
    -> TransportFuture;

    /// Deletes an entity; returns the deleted entity or an empty body.
    fn delete(&self, endpoint: &str, id: &EntityId) -> TransportFuture;

    /// Reads one page; returns a `{ data, meta }` envelope.
    fn find_many(&self, endpoint: &str, query: &ListQuery) -> TransportFuture;

    /// Reads one entity.
    fn find_by_id(&self, endpoint: &str, id: &EntityId) -> TransportFuture;

    /// Name for logging.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Routes
// =============================================================================

/// One HTTP-shaped request against a resource endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `POST /{endpoint}/create-{endpoint}`.
    Create,
    /// `PATCH /{endpoint}/update-{endpoint}?id=`.
    Update(EntityId),
    /// `DELETE /{endpoint}/delete-{endpoint}?id=`.
    Delete(EntityId),
    /// `GET /{endpoint}/find-many?..`.
    FindMany(ListQuery),
    /// `GET /{endpoint}/find-by-id?id=`.
    FindById(EntityId),
}

impl Route {
    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::Create => Method::POST,
            Self::Update(_) => Method::PATCH,
            Self::Delete(_) => Method::DELETE,
            Self::FindMany(_) | Self::FindById(_) => Method::GET,
        }
    }

    /// Path relative to the base URL.
    #[must_use]
    pub fn path(&self, endpoint: &str) -> String {
        match self {
            Self::Create => format!("/{endpoint}/create-{endpoint}"),
            Self::Update(_) => format!("/{endpoint}/update-{endpoint}"),
            Self::Delete(_) => format!("/{endpoint}/delete-{endpoint}"),
            Self::FindMany(_) => format!("/{endpoint}/find-many"),
            Self::FindById(_) => format!("/{endpoint}/find-by-id"),
        }
    }

    /// Query-string pairs.
    #[must_use]
    pub fn query(&self) -> Vec<(String, String)> {
        match self {
            Self::Create => Vec::new(),
            Self::Update(id) | Self::Delete(id) | Self::FindById(id) => {
                vec![("id".to_string(), id.to_string())]
            }
            Self::FindMany(query) => query.to_pairs(),
        }
    }
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// Fallback base URL when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";

/// [`Transport`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport against `base_url` (trailing slashes are ignored).
    #[must_use]
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Base URL in use.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send(&self, endpoint: &str, route: Route, body: Option<Map<String, Value>>) -> TransportFuture {
        let client = self.client.clone();
        let url = format!("{}{}", self.base_url, route.path(endpoint));
        let timeout = self.timeout;

        async move { execute_http_io(&client, &url, &route, body.as_ref(), timeout).await }.boxed()
    }
}

impl Transport for HttpTransport {
    fn create(&self, endpoint: &str, payload: &Map<String, Value>) -> TransportFuture {
        self.send(endpoint, Route::Create, Some(payload.clone()))
    }

    fn update(
        &self,
        endpoint: &str,
        id: &EntityId,
        payload: &Map<String, Value>,
    ) -> TransportFuture {
        self.send(endpoint, Route::Update(id.clone()), Some(payload.clone()))
    }

    fn delete(&self, endpoint: &str, id: &EntityId) -> TransportFuture {
        self.send(endpoint, Route::Delete(id.clone()), None)
    }

    fn find_many(&self, endpoint: &str, query: &ListQuery) -> TransportFuture {
        self.send(endpoint, Route::FindMany(query.clone()), None)
    }

    fn find_by_id(&self, endpoint: &str, id: &EntityId) -> TransportFuture {
        self.send(endpoint, Route::FindById(id.clone()), None)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Performs one HTTP exchange.
#[allow(clippy::cast_possible_truncation)] // Timeout in ms will not exceed u64
async fn execute_http_io(
    client: &reqwest::Client,
    url: &str,
    route: &Route,
    body: Option<&Map<String, Value>>,
    timeout: Duration,
) -> Result<Value, TransportError> {
    let timeout_ms = timeout.as_millis() as u64;

    let mut request = client
        .request(route.method(), url)
        .query(&route.query())
        .timeout(timeout);
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = request.send().await.map_err(|error| {
        if error.is_timeout() {
            TransportError::Timeout(timeout_ms)
        } else {
            // Connect, builder and redirect failures: no response was received.
            TransportError::ConnectionFailed(error.to_string())
        }
    })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| {
        if error.is_timeout() {
            TransportError::Timeout(timeout_ms)
        } else {
            TransportError::Decode(error.to_string())
        }
    })?;

    if status.is_success() {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|error| TransportError::Decode(error.to_string()))
    } else if status == reqwest::StatusCode::NOT_FOUND {
        Err(TransportError::NotFound(format!("{} {url}", route.method())))
    } else {
        Err(TransportError::Status {
            status: status.as_u16(),
            message: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Route::Create, Method::POST, "/water-supply/create-water-supply")]
    #[case(Route::Update(EntityId::new("w1")), Method::PATCH, "/water-supply/update-water-supply")]
    #[case(Route::Delete(EntityId::new("w1")), Method::DELETE, "/water-supply/delete-water-supply")]
    #[case(Route::FindMany(ListQuery::default()), Method::GET, "/water-supply/find-many")]
    #[case(Route::FindById(EntityId::new("w1")), Method::GET, "/water-supply/find-by-id")]
    fn test_route_method_and_path(
        #[case] route: Route,
        #[case] method: Method,
        #[case] path: &str,
    ) {
        assert_eq!(route.method(), method);
        assert_eq!(route.path("water-supply"), path);
    }

    #[rstest]
    fn test_route_query_pairs() {
        assert!(Route::Create.query().is_empty());
        assert_eq!(
            Route::Delete(EntityId::new("w1")).query(),
            vec![("id".to_string(), "w1".to_string())]
        );
        let query = ListQuery::new(2, 5).with_filter("status", "pending");
        assert_eq!(
            Route::FindMany(query).query(),
            vec![
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "5".to_string()),
                ("status".to_string(), "pending".to_string()),
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_unsendable_request_is_connection_failed() {
        let result = HttpTransport::new(Some("not a url".to_string()), Duration::from_secs(1))
            .find_many("igp", &ListQuery::default())
            .await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[rstest]
    fn test_http_transport_trims_base_url() {
        let transport = HttpTransport::new(
            Some("http://council.local/api/".to_string()),
            Duration::from_secs(1),
        );
        assert_eq!(transport.base_url(), "http://council.local/api");
        assert_eq!(
            HttpTransport::new(None, Duration::from_secs(1)).base_url(),
            DEFAULT_BASE_URL
        );
    }
}
