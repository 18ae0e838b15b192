//! Schema-driven field validation.
//!
//! [`SchemaValidator`] is the default [`FieldValidator`]: it checks that
//! required fields are present and non-null and that values match the kind
//! declared by the schema. Richer validation (formats, cross-field rules)
//! belongs to a dedicated validator injected in its place.

use intake_core::collaborators::{FieldError, FieldMap, FieldValidator, ValidationOutcome};
use intake_core::intake::{FieldKind, FieldSchema};
use serde_json::Value;

/// Error code for a missing required field.
pub const CODE_REQUIRED: &str = "required";
/// Error code for a value of the wrong kind.
pub const CODE_INVALID_TYPE: &str = "invalid_type";

/// Validates presence and kind of fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    fn kind_matches(kind: FieldKind, value: &Value) -> bool {
        match kind {
            FieldKind::Any => true,
            FieldKind::Text => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            // Upload references are objects carrying an `uploadId`.
            FieldKind::File => value.get("uploadId").is_some_and(Value::is_string),
        }
    }

    fn kind_name(kind: FieldKind) -> &'static str {
        match kind {
            FieldKind::Any => "any",
            FieldKind::Text => "text",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::File => "file",
        }
    }
}

impl FieldValidator for SchemaValidator {
    fn validate(&self, fields: &FieldMap, schema: &FieldSchema) -> ValidationOutcome {
        let mut errors = Vec::new();

        for descriptor in &schema.fields {
            match fields.get(&descriptor.path) {
                None | Some(Value::Null) => {
                    if descriptor.required {
                        errors.push(FieldError::new(
                            &descriptor.path,
                            CODE_REQUIRED,
                            format!("{} is required", descriptor.path),
                        ));
                    }
                }
                Some(value) if !Self::kind_matches(descriptor.kind, value) => {
                    errors.push(FieldError::new(
                        &descriptor.path,
                        CODE_INVALID_TYPE,
                        format!(
                            "{} must be of kind {}",
                            descriptor.path,
                            Self::kind_name(descriptor.kind)
                        ),
                    ));
                }
                Some(_) => {}
            }
        }

        ValidationOutcome::from_errors(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::intake::FieldDescriptor;
    use serde_json::json;

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![
            FieldDescriptor::required("name").with_kind(FieldKind::Text),
            FieldDescriptor::optional("age").with_kind(FieldKind::Number),
            FieldDescriptor::optional("cv").with_kind(FieldKind::File),
        ])
    }

    #[test]
    fn missing_and_null_required_fields_fail() {
        let outcome = SchemaValidator.validate(&FieldMap::new(), &schema());
        assert!(!outcome.valid);
        assert_eq!(outcome.errors[0].code, CODE_REQUIRED);

        let fields = FieldMap::from([("name".to_string(), Value::Null)]);
        assert!(!SchemaValidator.validate(&fields, &schema()).valid);
    }

    #[test]
    fn kinds_are_checked() {
        let fields = FieldMap::from([
            ("name".to_string(), json!("Ada")),
            ("age".to_string(), json!("thirty")),
        ]);
        let outcome = SchemaValidator.validate(&fields, &schema());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].path, "age");
        assert_eq!(outcome.errors[0].code, CODE_INVALID_TYPE);
    }

    #[test]
    fn file_fields_need_an_upload_reference() {
        let fields = FieldMap::from([
            ("name".to_string(), json!("Ada")),
            ("cv".to_string(), json!({"uploadId": "upl_1", "filename": "cv.pdf"})),
        ]);
        assert!(SchemaValidator.validate(&fields, &schema()).valid);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let fields = FieldMap::from([
            ("name".to_string(), json!("Ada")),
            ("extra".to_string(), json!(1)),
        ]);
        assert!(SchemaValidator.validate(&fields, &schema()).valid);
    }
}
