//! Outbound HTTP transport.

use crate::error::TransportError;
use crate::guard::ValidatedTarget;
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default time budget of one attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A signed request ready to send.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Guarded destination.
    pub target: ValidatedTarget,
    /// Complete header set, signature included.
    pub headers: HeaderMap,
    /// JSON body, exactly as signed.
    pub body: Vec<u8>,
}

/// Sends delivery requests.
///
/// # Dyn Compatibility
///
/// Explicit `Pin<Box<dyn Future>>` return so the worker can hold an
/// `Arc<dyn Transport>` and tests can substitute a scripted one.
pub trait Transport: Send + Sync {
    /// POST the request and return the response status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response was received.
    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, TransportError>> + Send + '_>>;
}

/// Whether a response status warrants another attempt.
///
/// Timeouts (408), throttling (429) and server errors are transient;
/// everything else is the destination's final word.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// `reqwest` transport.
///
/// Each request gets a client whose resolver is overridden with the
/// guarded address, so the connection goes exactly where the guard looked.
/// Redirects are never followed.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HttpTransport {
    /// Transport with the given per-attempt timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn post(&self, request: OutboundRequest) -> Result<u16, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(Policy::none())
            .resolve(&request.target.host, request.target.addr)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let response = client
            .post(request.target.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

        Ok(response.status().as_u16())
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, TransportError>> + Send + '_>> {
        Box::pin(self.post(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 599] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [200, 301, 400, 401, 403, 404, 410, 422] {
            assert!(!is_retryable_status(status), "{status}");
        }
    }
}
