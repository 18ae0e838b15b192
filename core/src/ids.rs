//! Strong identifier types and per-submission versioning.
//!
//! This module defines the newtypes used throughout the lifecycle engine:
//! [`SubmissionId`], [`IntakeId`], [`EventId`], the opaque [`ResumeToken`],
//! and [`Version`], the per-submission event sequence number.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string (no validation).
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert the identifier into its inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.trim().is_empty() {
                    return Err(ParseIdError(format!(
                        "{} cannot be empty",
                        stringify!($name)
                    )));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique identifier of a submission.
    ///
    /// # Examples
    ///
    /// ```
    /// use intake_core::ids::SubmissionId;
    ///
    /// let id = SubmissionId::new("sub_123");
    /// assert_eq!(id.as_str(), "sub_123");
    /// ```
    SubmissionId
);

string_id!(
    /// Identifier of an intake definition.
    IntakeId
);

string_id!(
    /// Globally unique event identifier.
    ///
    /// The Event Log rejects a second event carrying an `EventId` it has
    /// already stored.
    EventId
);

/// Opaque, rotating capability string.
///
/// A resume token is both the handoff credential embedded in resume links and
/// the optimistic-concurrency guard of a submission: every mutating call must
/// present the token last returned for that submission.
///
/// `Debug` output is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(String);

impl ResumeToken {
    /// Wrap an existing token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a presented token in constant time.
    ///
    /// # Examples
    ///
    /// ```
    /// use intake_core::ids::ResumeToken;
    ///
    /// let token = ResumeToken::new("rtok_abc");
    /// assert!(token.matches("rtok_abc"));
    /// assert!(!token.matches("rtok_abd"));
    /// ```
    #[must_use]
    pub fn matches(&self, presented: &str) -> bool {
        constant_time_eq::constant_time_eq(self.0.as_bytes(), presented.as_bytes())
    }

    /// Hex SHA-256 of a presented token.
    ///
    /// Lets a snapshot remember a spent token without storing it.
    #[must_use]
    pub fn digest(presented: &str) -> String {
        hex::encode(Sha256::digest(presented.as_bytes()))
    }

    /// Whether `presented` hashes to `digest`, in constant time.
    #[must_use]
    pub fn matches_digest(digest: &str, presented: &str) -> bool {
        !digest.is_empty()
            && constant_time_eq::constant_time_eq(digest.as_bytes(), Self::digest(presented).as_bytes())
    }
}

impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResumeToken(<redacted>)")
    }
}

impl From<&str> for ResumeToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResumeToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-submission event version.
///
/// The first event of a submission has version 1; [`Version::INITIAL`] (0)
/// means "no events yet". Versions of one submission form the gapless
/// sequence `1..=N`.
///
/// # Examples
///
/// ```
/// use intake_core::ids::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert_eq!(v1.value(), 1);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The version of a submission with no events.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
    fn parse_submission_id() {
        let id: SubmissionId = "sub_1".parse().expect("parse should succeed");
        assert_eq!(id, SubmissionId::new("sub_1"));
    }

    #[test]
    fn parse_empty_id_fails() {
        assert!("".parse::<IntakeId>().is_err());
        assert!("   ".parse::<EventId>().is_err());
    }

    #[test]
    fn resume_token_debug_is_redacted() {
        let token = ResumeToken::new("rtok_secret");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn resume_token_rejects_prefix() {
        let token = ResumeToken::new("rtok_abcdef");
        assert!(!token.matches("rtok_abc"));
        assert!(!token.matches(""));
    }

    #[test]
    fn spent_tokens_are_recognized_by_digest() {
        let digest = ResumeToken::digest("rtok_spent");
        assert_eq!(digest.len(), 64);
        assert!(!digest.contains("spent"));
        assert!(ResumeToken::matches_digest(&digest, "rtok_spent"));
        assert!(!ResumeToken::matches_digest(&digest, "rtok_other"));
        assert!(!ResumeToken::matches_digest("", ""));
    }

    #[test]
    fn version_sequence() {
        let v1 = Version::INITIAL.next();
        let v2 = v1.next();
        assert!(Version::INITIAL.is_initial());
        assert!(v1 < v2);
        assert_eq!(u64::from(v2), 2);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&SubmissionId::new("sub_9")).expect("serialize");
        assert_eq!(json, "\"sub_9\"");
        let json = serde_json::to_string(&Version::new(3)).expect("serialize");
        assert_eq!(json, "3");
    }
}
