use std::fmt;

use crate::entity::ValueKind;

/// The rule a rejected persist request violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationRule {
    /// A required (or non-nullable) field has no value.
    Required,
    /// The value does not fit the field's semantic type.
    TypeMismatch { expected: ValueKind, found: ValueKind },
}

/// A persist request or find query was rejected before reaching the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub entity: &'static str,
    pub field: &'static str,
    pub rule: ValidationRule,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            ValidationRule::Required => {
                write!(f, "{}.{} is required", self.entity, self.field)
            }
            ValidationRule::TypeMismatch { expected, found } => write!(
                f,
                "{}.{} expects a {} value, got {}",
                self.entity, self.field, expected, found
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Error type for every persistence and transaction operation.
#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    /// Rejected before any write was attempted.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// The store rejected a write because of a constraint.
    #[error("constraint violation on {table}.{column}: {message}")]
    Constraint {
        table: String,
        column: String,
        message: String,
    },
    /// Opaque error from the backing store or its driver.
    #[error("store error")]
    Store {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// No storage session could be obtained; no transaction was started.
    #[error("could not acquire a storage session")]
    SessionAcquisition {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A stored value could not be mapped back into the entity field.
    #[error("mapping error in column {column}")]
    Mapping {
        column: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("row is missing column {column}")]
    MissingColumn { column: &'static str },
    /// A find query named a field the entity does not have.
    #[error("{entity} has no field named {field}")]
    UnknownField { entity: &'static str, field: String },
    /// The entity manager was used after its transaction ended.
    #[error("transaction scope is closed")]
    ScopeClosed,
    /// The entity was not found.
    #[error("entity not found")]
    NotFound,
}

impl OrmError {
    /// Wrap a backend/driver error.
    pub fn store<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        OrmError::Store {
            source: Box::new(e),
        }
    }

    /// Wrap a failure of the connection layer to hand out a session.
    pub fn acquisition<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        OrmError::SessionAcquisition {
            source: Box::new(e),
        }
    }

    /// A store error built from a plain message.
    pub fn store_msg(msg: impl Into<String>) -> Self {
        Self::store(std::io::Error::new(std::io::ErrorKind::Other, msg.into()))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, OrmError::Validation(_))
    }

    /// Whether the store itself rejected the operation.
    pub fn is_store(&self) -> bool {
        matches!(self, OrmError::Store { .. } | OrmError::Constraint { .. })
    }
}

/// Convenience alias for results returned by persistence operations.
pub type OrmResult<T> = Result<T, OrmError>;
