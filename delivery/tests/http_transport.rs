//! Tests for the reqwest transport against a local mock server.
//!
//! The guard refuses loopback destinations, so these tests build the
//! [`ValidatedTarget`] by hand to reach the mock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use intake_delivery::{HttpTransport, OutboundRequest, Transport, TransportError, ValidatedTarget};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Url;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request_to(server: &MockServer, host: &str) -> OutboundRequest {
    let addr = *server.address();
    let url = Url::parse(&format!("http://{host}:{}/hook", addr.port())).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("x-intake-signature", HeaderValue::from_static("sha256=abc"));
    OutboundRequest {
        target: ValidatedTarget {
            url,
            host: host.to_string(),
            addr,
        },
        headers,
        body: br#"{"ok":true}"#.to_vec(),
    }
}

#[tokio::test]
async fn posts_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("x-intake-signature", "sha256=abc"))
        .and(body_string(r#"{"ok":true}"#))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let status = HttpTransport::default()
        .send(request_to(&server, "127.0.0.1"))
        .await
        .expect("send");
    assert_eq!(status, 204);
}

#[tokio::test]
async fn connection_is_pinned_to_the_checked_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // The name does not resolve anywhere; only the pinned address is used.
    let status = HttpTransport::default()
        .send(request_to(&server, "hooks.invalid"))
        .await
        .expect("send");
    assert_eq!(status, 200);
}

#[tokio::test]
async fn error_statuses_are_returned_as_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let status = HttpTransport::default()
        .send(request_to(&server, "127.0.0.1"))
        .await
        .expect("send");
    assert_eq!(status, 503);
}

#[tokio::test]
async fn redirects_are_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(307).insert_header("location", "http://169.254.169.254/latest"),
        )
        .mount(&server)
        .await;

    let status = HttpTransport::default()
        .send(request_to(&server, "127.0.0.1"))
        .await
        .expect("send");
    assert_eq!(status, 307);
}

#[tokio::test]
async fn slow_destinations_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = HttpTransport::new(Duration::from_millis(100))
        .send(request_to(&server, "127.0.0.1"))
        .await
        .expect_err("timeout");
    assert_eq!(err, TransportError::Timeout(Duration::from_millis(100)));
}
