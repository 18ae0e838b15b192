//! Fixtures: intake definitions and actors used across test suites.

use intake_core::actor::Actor;
use intake_core::intake::{
    ApprovalGate, Destination, FieldDescriptor, FieldKind, FieldSchema, IntakeDefinition,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Intake id of [`simple_intake`].
pub const SIMPLE_INTAKE: &str = "contact-form";
/// Intake id of [`gated_intake`].
pub const GATED_INTAKE: &str = "vendor-onboarding";

/// Schema with a required `name` (text), a required `email` (text) and an
/// optional `notes` field.
#[must_use]
pub fn contact_schema() -> FieldSchema {
    FieldSchema::new(vec![
        FieldDescriptor::required("name").with_kind(FieldKind::Text),
        FieldDescriptor::required("email").with_kind(FieldKind::Text),
        FieldDescriptor::optional("notes"),
        FieldDescriptor::optional("attachment").with_kind(FieldKind::File),
    ])
}

/// An intake without approval gates.
#[must_use]
pub fn simple_intake() -> IntakeDefinition {
    IntakeDefinition::new(SIMPLE_INTAKE, contact_schema())
}

/// An intake with one human approval gate named `compliance`.
#[must_use]
pub fn gated_intake() -> IntakeDefinition {
    IntakeDefinition::new(GATED_INTAKE, contact_schema()).with_gate(ApprovalGate::new("compliance"))
}

/// An intake with a webhook destination.
#[must_use]
pub fn webhook_intake(id: &str, url: &str) -> IntakeDefinition {
    IntakeDefinition::new(id, contact_schema()).with_destination(Destination::webhook(url))
}

/// Values for every required field of [`contact_schema`].
#[must_use]
pub fn complete_fields() -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("name".to_string(), json!("Ada Lovelace")),
        ("email".to_string(), json!("ada@example.com")),
    ])
}

/// Build a field map from `(path, value)` pairs.
#[must_use]
pub fn fields<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .map(|(path, value)| (path.to_string(), value))
        .collect()
}

/// An agent actor.
#[must_use]
pub fn agent() -> Actor {
    Actor::agent("intake-bot").with_name("Intake Bot")
}

/// A human actor.
#[must_use]
pub fn human(id: &str) -> Actor {
    Actor::human(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_fields_cover_required_schema() {
        let values = complete_fields();
        assert!(contact_schema().required_fields().all(|f| values.contains_key(&f.path)));
        assert!(gated_intake().has_approval_gates());
        assert!(!simple_intake().has_approval_gates());
    }
}
