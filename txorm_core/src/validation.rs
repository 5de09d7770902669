//! Persist request validation against the static entity schema.

use crate::entity::{EntitySchema, Row, Value};
use crate::error::{ValidationError, ValidationRule};

/// Check a flattened entity before the store is asked to write it.
///
/// Every non-identity field must be present when it is required (or not nullable),
/// and each present value must match the field's semantic type.
pub fn validate_row(schema: &EntitySchema, row: &Row) -> Result<(), ValidationError> {
    for field in schema.fields.iter().filter(|f| !f.identity) {
        let value = row.get(field.column).unwrap_or(&Value::Null);
        if value.is_null() {
            if field.rejects_null() {
                return Err(ValidationError {
                    entity: schema.entity,
                    field: field.name,
                    rule: ValidationRule::Required,
                });
            }
            continue;
        }
        if value.clone().coerce(field.kind).is_none() {
            return Err(ValidationError {
                entity: schema.entity,
                field: field.name,
                rule: ValidationRule::TypeMismatch {
                    expected: field.kind,
                    found: value.kind(),
                },
            });
        }
    }
    Ok(())
}
