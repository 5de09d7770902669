use crate::entity::{EntitySchema, FieldDef, Value};
use crate::error::{OrmError, OrmResult, ValidationError, ValidationRule};

/// A conjunction of `field = value` equalities used to look up entities.
///
/// Field names are the entity's Rust field names. Queries are bound against the
/// entity schema before reaching a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    conditions: Vec<(String, Value)>,
    limit: Option<usize>,
}

impl FindQuery {
    /// A query matching every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition. A `Null` value matches rows where the field is NULL.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Resolve field names to columns and coerce values to column types.
    pub fn bind(&self, schema: &EntitySchema) -> OrmResult<Filter> {
        let mut predicates = Vec::with_capacity(self.conditions.len());
        for (name, value) in &self.conditions {
            let field = schema.field(name).ok_or_else(|| OrmError::UnknownField {
                entity: schema.entity,
                field: name.clone(),
            })?;
            let coerced = value.clone().coerce(field.kind).ok_or_else(|| {
                OrmError::Validation(ValidationError {
                    entity: schema.entity,
                    field: field.name,
                    rule: ValidationRule::TypeMismatch {
                        expected: field.kind,
                        found: value.kind(),
                    },
                })
            })?;
            predicates.push((field, coerced));
        }
        Ok(Filter {
            predicates,
            limit: self.limit,
        })
    }
}

/// A find query bound to one entity schema; what storage sessions receive.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub predicates: Vec<(&'static FieldDef, Value)>,
    pub limit: Option<usize>,
}

impl Filter {
    /// Match the row whose identity equals `id`.
    pub fn by_identity(schema: &EntitySchema, id: Value) -> Self {
        let field = schema.identity();
        let id = id.clone().coerce(field.kind).unwrap_or(id);
        Self {
            predicates: vec![(field, id)],
            limit: Some(1),
        }
    }

    pub fn with_limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Evaluate the conjunction against a row. Used by stores without a query engine.
    pub fn matches(&self, row: &crate::entity::Row) -> bool {
        self.predicates.iter().all(|(field, expected)| {
            let actual = row.get(field.column).unwrap_or(&Value::Null);
            actual == expected
        })
    }
}
