//! A canned-response registry for tests.
//!
//! [`MockService`] is a tower service that answers requests from a table of
//! routes keyed by method and path, and records every request it sees.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt as _;
use hyperdriver::Body;
use parking_lot::Mutex;

/// A response to hand out for a route.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl MockResponse {
    /// An empty response with `status`.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// An empty `200 OK`.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// A JSON body with `200 OK`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::ok()
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
    }

    /// Add a header.
    ///
    /// # Panics
    /// If the value is not a valid header value.
    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        let value = HeaderValue::from_str(value).expect("valid mock header value");
        self.headers.append(name, value);
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    fn into_response(self) -> http::Response<Body> {
        let mut response = http::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// A request seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method
    pub method: Method,
    /// Path and query
    pub path: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<String, VecDeque<MockResponse>>,
    requests: Vec<RecordedRequest>,
}

impl State {
    /// Exact path and query first, then the path alone.
    fn respond(&mut self, method: &Method, uri: &http::Uri) -> MockResponse {
        let full = route_key(method, uri.path_and_query().map_or("/", |pq| pq.as_str()));
        let bare = route_key(method, uri.path());

        for key in [full, bare] {
            if let Some(queue) = self.routes.get_mut(&key) {
                // The last response sticks.
                let response = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if let Some(response) = response {
                    return response;
                }
            }
        }

        MockResponse::new(StatusCode::NOT_FOUND)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(r#"{"errors":[{"code":"NOT_FOUND","message":"no mock response configured"}]}"#)
    }
}

fn route_key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

/// A tower service answering from canned responses.
///
/// Clones share routes and the request log.
#[derive(Debug, Clone, Default)]
pub struct MockService {
    state: Arc<Mutex<State>>,
}

impl MockService {
    /// A mock with no routes: every request gets `404`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method path`.
    ///
    /// `path` may include a query string, which must then match exactly.
    /// Responses are handed out in order, the last one repeats.
    pub fn add(&self, method: Method, path: &str, response: MockResponse) -> &Self {
        self.state
            .lock()
            .routes
            .entry(route_key(&method, path))
            .or_default()
            .push_back(response);
        self
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Requests seen for `method` whose path (without query) is `path`.
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|request| {
                request.method == method
                    && request.path.split('?').next() == Some(path)
            })
            .cloned()
            .collect()
    }
}

impl tower::Service<http::Request<Body>> for MockService {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let state = self.state.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();

            let mut state = state.lock();
            let response = state.respond(&parts.method, &parts.uri);
            state.requests.push(RecordedRequest {
                method: parts.method,
                path: parts
                    .uri
                    .path_and_query()
                    .map_or_else(|| "/".to_string(), |pq| pq.to_string()),
                headers: parts.headers,
                body,
            });

            Ok(response.into_response())
        })
    }
}
