//! # Intake Testing
//!
//! Testing utilities for the submission lifecycle engine.
//!
//! This crate provides:
//! - Deterministic implementations of the environment traits (clocks, ids)
//! - The in-memory backends of `intake-runtime`, re-exported
//! - A recording event listener and an in-memory file storage
//! - Fixtures for intake definitions and actors
//! - Conformance checks every storage backend must pass
//!
//! ## Example
//!
//! ```
//! use intake_testing::{ManualClock, SequentialIdGenerator, test_clock};
//! use intake_core::environment::{Clock, IdGenerator};
//!
//! let clock = ManualClock::new(test_clock().now());
//! clock.advance(chrono::Duration::seconds(5));
//!
//! let ids = SequentialIdGenerator::new();
//! assert_eq!(ids.submission_id().as_str(), "sub_000001");
//! ```

use chrono::{DateTime, Utc};
use intake_core::environment::{Clock, IdGenerator};
use intake_core::ids::{EventId, ResumeToken, SubmissionId};

pub mod conformance;
pub mod files;
pub mod fixtures;
pub mod listeners;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, EventId, IdGenerator, ResumeToken, SubmissionId, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use intake_testing::mocks::FixedClock;
    /// use intake_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// A clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep a handle while the
    /// manager under test owns another.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward (or backward, with a negative duration).
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_clock().now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Predictable ids: `sub_000001`, `evt_000001`, `rtok_000001`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIdGenerator {
        submissions: AtomicU64,
        events: AtomicU64,
        tokens: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Start every sequence at 1.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn next(counter: &AtomicU64) -> u64 {
            counter.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn submission_id(&self) -> SubmissionId {
            SubmissionId::new(format!("sub_{:06}", Self::next(&self.submissions)))
        }

        fn event_id(&self) -> EventId {
            EventId::new(format!("evt_{:06}", Self::next(&self.events)))
        }

        fn resume_token(&self) -> ResumeToken {
            ResumeToken::new(format!("rtok_{:06}", Self::next(&self.tokens)))
        }
    }
}

// Re-export commonly used items
pub use files::InMemoryFileStorage;
pub use listeners::{FailingListener, RecordingListener};
pub use intake_runtime::memory::{InMemoryEventStore, InMemorySubmissionStore};
pub use mocks::{FixedClock, ManualClock, SequentialIdGenerator, test_clock};
