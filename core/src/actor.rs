//! Actors: who caused a change.
//!
//! Every event and every field value is attributed to an [`Actor`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of identity behind an action.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// An automated agent (LLM tool call, integration, bot).
    Agent,
    /// A human user.
    Human,
    /// The engine itself (expiry scanner, delivery worker).
    System,
}

impl ActorKind {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Human => "human",
            Self::System => "system",
        }
    }

    /// Parse the wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(Self::Agent),
            "human" => Some(Self::Human),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity attributed to an action.
///
/// # Examples
///
/// ```
/// use intake_core::actor::{Actor, ActorKind};
///
/// let agent = Actor::agent("onboarding-bot").with_name("Onboarding Bot");
/// assert_eq!(agent.kind, ActorKind::Agent);
/// assert_eq!(agent.name.as_deref(), Some("Onboarding Bot"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Kind of identity.
    pub kind: ActorKind,
    /// Stable identifier within its kind.
    pub id: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Actor {
    /// Create an actor of the given kind.
    #[must_use]
    pub fn new(kind: ActorKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: None,
        }
    }

    /// Create an agent actor.
    #[must_use]
    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(ActorKind::Agent, id)
    }

    /// Create a human actor.
    #[must_use]
    pub fn human(id: impl Into<String>) -> Self {
        Self::new(ActorKind::Human, id)
    }

    /// Create a system actor.
    #[must_use]
    pub fn system(id: impl Into<String>) -> Self {
        Self::new(ActorKind::System, id)
    }

    /// Attach a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_wire_name() {
        for kind in [ActorKind::Agent, ActorKind::Human, ActorKind::System] {
            assert_eq!(ActorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActorKind::parse("robot"), None);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn actor_json_omits_missing_name() {
        let json = serde_json::to_value(Actor::human("u-1")).expect("serialize");
        assert_eq!(json, serde_json::json!({"kind": "human", "id": "u-1"}));
    }
}
