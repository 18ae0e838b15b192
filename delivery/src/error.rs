//! Error types for webhook delivery.

use intake_core::error::LifecycleError;
use thiserror::Error;

/// Why a destination URL was refused.
///
/// Every variant except [`GuardError::Resolution`] is permanent: the
/// destination will be refused again on the next attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// The URL does not parse.
    #[error("Invalid destination URL '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// Only `http` and `https` are delivered to.
    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    /// The URL has no host component.
    #[error("Destination URL has no host")]
    MissingHost,

    /// The host is a local name such as `localhost`.
    #[error("Destination host '{0}' is a local name")]
    LocalHostname(String),

    /// The host is, or resolves to, a non-public address.
    #[error("Destination host '{host}' resolves to blocked address {addr}")]
    BlockedAddress {
        /// Host as written in the URL.
        host: String,
        /// First blocked address found.
        addr: std::net::IpAddr,
    },

    /// The host could not be resolved.
    #[error("Could not resolve destination host '{host}': {reason}")]
    Resolution {
        /// Host as written in the URL.
        host: String,
        /// Resolver message.
        reason: String,
    },
}

impl GuardError {
    /// Whether a later attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Resolution { .. })
    }
}

/// Failure to complete an HTTP exchange.
///
/// All transport errors are retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The attempt exceeded its time budget.
    #[error("Delivery timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection could not be established.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Any other request failure.
    #[error("Request failed: {0}")]
    Request(String),
}

/// Errors surfaced by the delivery worker itself.
///
/// Failed deliveries are not errors: they are recorded on the submission.
/// These variants cover the cases where recording is impossible.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Loading the submission or recording an attempt failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The webhook body could not be serialized.
    #[error("Failed to serialize delivery payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resolution_failures_are_retryable() {
        assert!(
            GuardError::Resolution {
                host: "hooks.example.com".to_string(),
                reason: "timeout".to_string(),
            }
            .is_retryable()
        );
        assert!(!GuardError::UnsupportedScheme("ftp".to_string()).is_retryable());
        assert!(!GuardError::LocalHostname("localhost".to_string()).is_retryable());
    }
}
