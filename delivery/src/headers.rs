//! Destination header sanitizing.

use crate::signing::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;

/// Headers the transport owns. A destination may not set them.
pub const RESERVED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "content-type",
    SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
];

/// Build the custom header map for a destination.
///
/// Reserved headers are dropped, as are names or values that are not valid
/// HTTP. `Authorization` and other credentials pass through unchanged.
#[must_use]
pub fn sanitize_headers(custom: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in custom {
        let lowered = name.to_ascii_lowercase();
        if RESERVED_HEADERS.contains(&lowered.as_str()) {
            tracing::debug!(header = %lowered, "Dropping reserved destination header");
            continue;
        }
        match (
            HeaderName::from_bytes(lowered.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid destination header"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_headers_are_stripped() {
        let custom = BTreeMap::from([
            ("Host".to_string(), "internal.corp".to_string()),
            ("Content-Length".to_string(), "0".to_string()),
            ("X-Intake-Signature".to_string(), "sha256=forged".to_string()),
            ("x-intake-timestamp".to_string(), "0".to_string()),
            ("Transfer-Encoding".to_string(), "chunked".to_string()),
            ("Authorization".to_string(), "Bearer abc".to_string()),
            ("X-Tenant".to_string(), "acme".to_string()),
        ]);

        let headers = sanitize_headers(&custom);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers["authorization"], "Bearer abc");
        assert_eq!(headers["x-tenant"], "acme");
        assert!(!headers.contains_key("host"));
        assert!(!headers.contains_key(SIGNATURE_HEADER));
    }

    #[test]
    fn invalid_headers_are_dropped() {
        let custom = BTreeMap::from([
            ("bad header".to_string(), "x".to_string()),
            ("x-ok".to_string(), "line\nbreak".to_string()),
        ]);
        assert!(sanitize_headers(&custom).is_empty());
    }
}
