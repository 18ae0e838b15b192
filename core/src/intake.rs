//! Intake definitions.
//!
//! An intake definition describes what a submission collects (the field
//! schema), who must approve it (approval gates), where it goes once finalized
//! (the destination) and how long it may stay open (the TTL). Definitions are
//! authored and normalized elsewhere; the engine only reads them through an
//! [`IntakeRegistry`](crate::collaborators::IntakeRegistry).

use crate::actor::{Actor, ActorKind};
use crate::event::EventType;
use crate::ids::IntakeId;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value kind expected for a field.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// JSON string.
    Text,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// Reference to a completed upload.
    File,
    /// No constraint.
    #[default]
    Any,
}

/// A single field of an intake schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Field path, e.g. `"applicant.name"`.
    pub path: String,
    /// Whether submit requires a non-null value.
    #[serde(default)]
    pub required: bool,
    /// Expected value kind.
    #[serde(default)]
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// An optional field of any kind.
    #[must_use]
    pub fn optional(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            required: false,
            kind: FieldKind::Any,
        }
    }

    /// A required field of any kind.
    #[must_use]
    pub fn required(path: impl Into<String>) -> Self {
        Self {
            required: true,
            ..Self::optional(path)
        }
    }

    /// Constrain the value kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Normalized field schema.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field descriptors in authoring order.
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl FieldSchema {
    /// Build a schema from descriptors.
    #[must_use]
    pub const fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    /// Look up a descriptor by path.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.path == path)
    }

    /// Descriptors of required fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.required)
    }
}

/// Who may approve a gate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewerSpec {
    /// Any human actor.
    #[default]
    AnyHuman,
    /// Any actor at all.
    AnyActor,
    /// Only the listed actor ids.
    Actors {
        /// Allowed actor ids.
        ids: Vec<String>,
    },
}

impl ReviewerSpec {
    /// Whether `actor` may decide on a gate with this spec.
    #[must_use]
    pub fn permits(&self, actor: &Actor) -> bool {
        match self {
            Self::AnyHuman => actor.kind == ActorKind::Human,
            Self::AnyActor => true,
            Self::Actors { ids } => ids.iter().any(|id| *id == actor.id),
        }
    }
}

const fn one() -> u32 {
    1
}

/// A named approval requirement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalGate {
    /// Gate name, unique within the intake.
    pub name: String,
    /// Who may approve.
    #[serde(default)]
    pub reviewers: ReviewerSpec,
    /// Distinct approvals needed to satisfy the gate.
    #[serde(default = "one")]
    pub required_approvals: u32,
    /// Emit `review.escalated` when the gate is still open after this long.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_after_ms: Option<u64>,
}

impl ApprovalGate {
    /// A gate needing one approval from any human.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reviewers: ReviewerSpec::AnyHuman,
            required_approvals: 1,
            escalate_after_ms: None,
        }
    }

    /// Set who may approve.
    #[must_use]
    pub fn with_reviewers(mut self, reviewers: ReviewerSpec) -> Self {
        self.reviewers = reviewers;
        self
    }

    /// Set the number of distinct approvals required.
    #[must_use]
    pub const fn with_required_approvals(mut self, required: u32) -> Self {
        self.required_approvals = required;
        self
    }

    /// Set the escalation deadline.
    #[must_use]
    pub const fn with_escalation_after_ms(mut self, ms: u64) -> Self {
        self.escalate_after_ms = Some(ms);
        self
    }
}

/// Kind of outbound destination.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// Signed HTTP POST to a third party.
    Webhook,
    /// Signed HTTP POST back to the originating application.
    Callback,
    /// Signed HTTP POST to a queue ingestion endpoint.
    Queue,
}

fn default_deliver_on() -> Vec<EventType> {
    vec![EventType::SubmissionFinalized]
}

/// Where finalized submissions are delivered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Destination kind.
    pub kind: DestinationKind,
    /// Target URL.
    pub url: String,
    /// Extra request headers. Transport headers are stripped before sending.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Retry behavior.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Event types that trigger a delivery.
    #[serde(default = "default_deliver_on")]
    pub deliver_on: Vec<EventType>,
}

impl Destination {
    /// A webhook destination with default retry policy.
    #[must_use]
    pub fn webhook(url: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Webhook,
            url: url.into(),
            headers: BTreeMap::new(),
            retry: RetryPolicy::default(),
            deliver_on: default_deliver_on(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether an event of this type should trigger a delivery.
    #[must_use]
    pub fn triggers_on(&self, event_type: EventType) -> bool {
        self.deliver_on.contains(&event_type)
    }
}

/// A complete intake definition.
///
/// # Examples
///
/// ```
/// use intake_core::intake::{ApprovalGate, FieldDescriptor, FieldSchema, IntakeDefinition};
///
/// let intake = IntakeDefinition::new("vendor-onboarding", FieldSchema::new(vec![
///     FieldDescriptor::required("company"),
/// ]))
/// .with_gate(ApprovalGate::new("compliance"))
/// .with_ttl_ms(86_400_000);
///
/// assert!(intake.has_approval_gates());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeDefinition {
    /// Intake id.
    pub id: IntakeId,
    /// Definition version.
    #[serde(default = "one")]
    pub version: u32,
    /// Field schema.
    #[serde(default)]
    pub schema: FieldSchema,
    /// Approval gates, in evaluation order.
    #[serde(default)]
    pub approval_gates: Vec<ApprovalGate>,
    /// Delivery destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
    /// Time-to-live of submissions, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl IntakeDefinition {
    /// A definition without gates, destination or TTL.
    #[must_use]
    pub fn new(id: impl Into<IntakeId>, schema: FieldSchema) -> Self {
        Self {
            id: id.into(),
            version: 1,
            schema,
            approval_gates: Vec::new(),
            destination: None,
            ttl_ms: None,
        }
    }

    /// Add an approval gate.
    #[must_use]
    pub fn with_gate(mut self, gate: ApprovalGate) -> Self {
        self.approval_gates.push(gate);
        self
    }

    /// Set the destination.
    #[must_use]
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Set the TTL.
    #[must_use]
    pub const fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    /// Whether submit routes through review.
    #[must_use]
    pub fn has_approval_gates(&self) -> bool {
        !self.approval_gates.is_empty()
    }

    /// Look up a gate by name.
    #[must_use]
    pub fn gate(&self, name: &str) -> Option<&ApprovalGate> {
        self.approval_gates.iter().find(|g| g.name == name)
    }

    /// TTL as a chrono duration.
    #[must_use]
    pub fn ttl(&self) -> Option<chrono::Duration> {
        self.ttl_ms
            .and_then(|ms| i64::try_from(ms).ok())
            .map(chrono::Duration::milliseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewer_spec_permissions() {
        let human = Actor::human("alice");
        let agent = Actor::agent("bot");

        assert!(ReviewerSpec::AnyHuman.permits(&human));
        assert!(!ReviewerSpec::AnyHuman.permits(&agent));
        assert!(ReviewerSpec::AnyActor.permits(&agent));

        let listed = ReviewerSpec::Actors {
            ids: vec!["alice".to_string()],
        };
        assert!(listed.permits(&human));
        assert!(!listed.permits(&Actor::human("bob")));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn definition_deserializes_with_defaults() {
        let intake: IntakeDefinition = serde_json::from_str(
            r#"{
                "id": "kyc",
                "schema": {"fields": [{"path": "name", "required": true, "kind": "text"}]},
                "approvalGates": [{"name": "compliance", "escalateAfterMs": 3600000}],
                "destination": {"kind": "webhook", "url": "https://hooks.example.com/kyc"},
                "ttlMs": 1000
            }"#,
        )
        .expect("parse");

        assert_eq!(intake.version, 1);
        assert_eq!(intake.schema.required_fields().count(), 1);
        let gate = intake.gate("compliance").expect("gate");
        assert_eq!(gate.required_approvals, 1);
        assert_eq!(gate.reviewers, ReviewerSpec::AnyHuman);
        let destination = intake.destination.expect("destination");
        assert!(destination.triggers_on(EventType::SubmissionFinalized));
        assert!(!destination.triggers_on(EventType::SubmissionSubmitted));
        assert_eq!(destination.retry, RetryPolicy::default());
        assert_eq!(intake.ttl_ms, Some(1000));
    }

    #[test]
    fn ttl_conversion() {
        let intake = IntakeDefinition::new("t", FieldSchema::default()).with_ttl_ms(1500);
        assert_eq!(intake.ttl(), Some(chrono::Duration::milliseconds(1500)));
        assert!(!intake.has_approval_gates());
    }
}
