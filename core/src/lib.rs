//! # Intake Core
//!
//! Domain types, the submission state machine and the storage contracts of
//! the submission lifecycle engine.
//!
//! Submissions are structured data collected jointly by automated agents and
//! humans. Every field carries provenance, every change is an event, and
//! every change is guarded by a rotating resume token.
//!
//! ## Core Concepts
//!
//! - **Submission**: the mutable snapshot ([`submission::Submission`])
//! - **Event**: an immutable, versioned fact ([`event::SubmissionEvent`])
//! - **State Machine**: pure `(state, trigger) → next state | rejection`
//! - **Event Log**: append-only source of truth ([`event_store::EventStore`])
//! - **Submission Store**: keyed snapshots ([`submission_store::SubmissionStorage`])
//! - **Environment**: injected clock and id generation
//!
//! ## Architecture Principles
//!
//! - Pure state machine, imperative orchestration in `intake-runtime`
//! - Storage injected through traits, never global
//! - Closed error enum with stable codes
//!
//! ## Example
//!
//! ```
//! use intake_core::state_machine::{transition, SubmissionState, Trigger};
//!
//! let state = transition(SubmissionState::Draft, Trigger::FieldUpdate { changed: true })?;
//! let state = transition(state, Trigger::Submit { has_approval_gates: true })?;
//! assert_eq!(state, SubmissionState::NeedsReview);
//! # Ok::<(), intake_core::state_machine::InvalidTransition>(())
//! ```

// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod actor;
pub mod collaborators;
pub mod delivery;
pub mod error;
pub mod event;
pub mod event_store;
pub mod ids;
pub mod intake;
pub mod listener;
pub mod retry;
pub mod state_machine;
pub mod submission;
pub mod submission_store;

pub use actor::{Actor, ActorKind};
pub use error::LifecycleError;
pub use event::{EventType, SubmissionEvent};
pub use ids::{EventId, IntakeId, ResumeToken, SubmissionId, Version};
pub use state_machine::SubmissionState;
pub use submission::Submission;

/// Environment traits for dependency injection.
///
/// All sources of non-determinism (time, randomness) sit behind these
/// traits so tests can pin them down.
pub mod environment {
    use crate::ids::{EventId, ResumeToken, SubmissionId};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::{DateTime, Utc};
    use rand::RngCore;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use intake_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of identifiers and resume tokens.
    pub trait IdGenerator: Send + Sync {
        /// New submission id.
        fn submission_id(&self) -> SubmissionId;

        /// New, globally unique event id.
        fn event_id(&self) -> EventId;

        /// New resume token. Must be unguessable in production.
        fn resume_token(&self) -> ResumeToken;
    }

    /// Number of random bytes in a resume token.
    pub const RESUME_TOKEN_BYTES: usize = 32;

    /// UUID ids and cryptographically random tokens.
    ///
    /// - submission ids: `sub_<uuid, simple form>`
    /// - event ids: `evt_<uuid>`
    /// - resume tokens: `rtok_<base64url of 32 random bytes>`
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RandomIdGenerator;

    impl IdGenerator for RandomIdGenerator {
        fn submission_id(&self) -> SubmissionId {
            SubmissionId::new(format!("sub_{}", uuid::Uuid::new_v4().simple()))
        }

        fn event_id(&self) -> EventId {
            EventId::new(format!("evt_{}", uuid::Uuid::new_v4()))
        }

        fn resume_token(&self) -> ResumeToken {
            let mut bytes = [0u8; RESUME_TOKEN_BYTES];
            rand::thread_rng().fill_bytes(&mut bytes);
            ResumeToken::new(format!("rtok_{}", URL_SAFE_NO_PAD.encode(bytes)))
        }
    }

}
