//! # Intake Delivery
//!
//! Outbound webhook delivery for finalized submissions.
//!
//! ```text
//! LifecycleManager ──fan-out──▶ DeliveryDispatcher ──mpsc──▶ DeliveryWorker
//!        ▲                                                     │
//!        └──────────────── record_delivery(attempt) ◀──────────┘
//! ```
//!
//! Before every attempt the destination passes the [`guard::UrlGuard`];
//! refused destinations fail closed without a network call. Requests are
//! signed with HMAC-SHA256 and retried with the destination's exponential
//! backoff policy. Exhausted retries are recorded on the submission and
//! never change its lifecycle state.
//!
//! ## Example
//!
//! ```ignore
//! let (dispatcher, jobs) = DeliveryDispatcher::channel([EventType::SubmissionFinalized], 1024);
//! let manager = Arc::new(
//!     LifecycleManager::builder(storage, events, registry)
//!         .listener(Arc::new(dispatcher))
//!         .build()?,
//! );
//! let worker = DeliveryWorker::new(
//!     manager.clone(),
//!     UrlGuard::system(),
//!     Arc::new(HttpTransport::default()),
//!     Signer::new(secret),
//! );
//! tokio::spawn(Arc::new(worker).run(jobs, shutdown_rx));
//! ```

/// Fan-out listener queueing delivery jobs
pub mod dispatcher;

/// Error types
pub mod error;

/// Destination URL policy
pub mod guard;

/// Destination header sanitizing
pub mod headers;

/// HMAC request signing
pub mod signing;

/// HTTP transport
pub mod transport;

/// The retrying delivery worker
pub mod worker;

pub use dispatcher::{DeliveryDispatcher, DeliveryJob};
pub use error::{DeliveryError, GuardError, TransportError};
pub use guard::{DnsResolver, HostResolver, StaticResolver, UrlGuard, ValidatedTarget};
pub use signing::Signer;
pub use transport::{HttpTransport, OutboundRequest, Transport};
pub use worker::{DeliveryReport, DeliveryWorker};
