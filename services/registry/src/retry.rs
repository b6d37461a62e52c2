use std::time::Duration;

use http::{Method, StatusCode};
use hyperdriver::Body;
use tower::retry::Policy;

/// Retry idempotent registry requests with exponential backoff.
///
/// Only `GET` and `HEAD` are retried: blob uploads and manifest pushes are left
/// to the caller, since a repeated `PUT` or `POST` may not be safe.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// The initial delay for the backoff
    pub delay: Duration,

    /// The exponent to increase the delay by
    pub exponent: u32,

    /// The maximum delay for the backoff
    pub max_delay: Duration,
}

impl Backoff {
    /// Create a new backoff policy.
    pub fn new(delay: Duration, exponent: u32, max_delay: Duration) -> Self {
        Self {
            delay,
            exponent,
            max_delay,
        }
    }

    /// Disable retries entirely.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, 0, Duration::ZERO)
    }

    /// Increment the backoff delay
    pub fn increment(&self) -> Option<Self> {
        let delay = self.delay.checked_mul(self.exponent)?;

        if delay.is_zero() || delay >= self.max_delay {
            return None;
        }

        Some(Self {
            delay,
            exponent: self.exponent,
            max_delay: self.max_delay,
        })
    }

    /// Honor the registry's `Retry-After` header, continuing as normal afterwards.
    fn rate_limited(&self, delay: Duration) -> Self {
        Self {
            delay: delay.min(self.max_delay),
            exponent: self.exponent,
            max_delay: self.max_delay,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), 2, Duration::from_secs(10))
    }
}

fn idempotent(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

fn retry_after(res: &http::Response<Body>) -> Option<Duration> {
    res.headers()
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl<E> Policy<http::Request<Body>, http::Response<Body>, E> for Backoff {
    type Future = tokio::time::Sleep;

    fn retry(
        &mut self,
        req: &mut http::Request<Body>,
        result: &mut Result<http::Response<Body>, E>,
    ) -> Option<Self::Future> {
        if !idempotent(req.method()) {
            return None;
        }

        let next = self.increment()?;
        let wait = match result {
            Ok(res) => match res.status() {
                StatusCode::REQUEST_TIMEOUT => {
                    tracing::debug!("retrying request to {} due to timeout", req.uri());
                    next.delay
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    tracing::debug!("retrying request to {} due to rate limit", req.uri());
                    retry_after(res)
                        .map(|delay| self.rate_limited(delay).delay)
                        .unwrap_or(next.delay)
                }
                status if status.is_server_error() => {
                    tracing::debug!("retrying request to {} due to {}", req.uri(), status);
                    next.delay
                }
                _ => return None,
            },
            Err(_) => {
                tracing::warn!("retrying request to {} due to error", req.uri());
                next.delay
            }
        };

        *self = next;
        Some(tokio::time::sleep(wait))
    }

    fn clone_request(&mut self, req: &http::Request<Body>) -> Option<http::Request<Body>> {
        if !idempotent(req.method()) {
            return None;
        }
        try_clone_request(req)
    }
}

fn try_clone_request(req: &http::Request<Body>) -> Option<http::Request<Body>> {
    let body = req.body().try_clone()?;

    let mut next = http::Request::builder()
        .method(req.method().clone())
        .uri(req.uri().clone())
        .version(req.version())
        .body(body)
        .ok()?;

    *next.extensions_mut() = req.extensions().clone();
    *next.headers_mut() = req.headers().clone();

    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_until_max() {
        let backoff = Backoff::new(Duration::from_millis(100), 2, Duration::from_millis(500));
        let next = backoff.increment().unwrap();
        assert_eq!(next.delay, Duration::from_millis(200));
        let next = next.increment().unwrap();
        assert_eq!(next.delay, Duration::from_millis(400));
        assert!(next.increment().is_none());

        assert!(Backoff::none().increment().is_none());
    }

    #[tokio::test]
    async fn only_idempotent_requests_retry() {
        let mut policy = Backoff::default();

        let mut put = http::Request::put("https://r.example/v2/app/manifests/v1")
            .body(Body::empty())
            .unwrap();
        let mut result: Result<_, ()> = Ok(http::Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(Body::empty())
            .unwrap());
        assert!(policy.retry(&mut put, &mut result).is_none());

        let mut get = http::Request::get("https://r.example/v2/app/manifests/v1")
            .body(Body::empty())
            .unwrap();
        assert!(policy.retry(&mut get, &mut result).is_some());

        let mut not_found: Result<_, ()> = Ok(http::Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap());
        assert!(policy.retry(&mut get, &mut not_found).is_none());
    }
}
