#![forbid(unsafe_code)]
//! Core traits and the transactional unit of work for the txorm entity framework.
//! This crate is store-agnostic and should not contain any backend-specific logic.
//!
//! A [`DataSource`] runs transaction bodies through a [`TransactionCoordinator`]:
//! a session is acquired, a transaction begun, and the body receives an
//! [`EntityManager`] bound to that session. The body's success commits; any error
//! (or panic) rolls back. Either way the session is released.

// Re-export for backend crates implementing the session traits.
pub use async_trait::async_trait;

mod data_source;
mod entity;
mod error;
mod query;
mod validation;

pub mod manager;
pub mod session;
pub mod transactions;
pub mod unit_of_work;

pub use data_source::DataSource;
pub use entity::{
    decode_column, ColumnValue, ConversionError, Entity, EntitySchema, Fetchable, FieldDef,
    Identifiable, Row, Value, ValueKind,
};
pub use error::{OrmError, OrmResult, ValidationError, ValidationRule};
pub use manager::EntityManager;
pub use query::{Filter, FindQuery};
pub use session::{SessionSource, StorageSession};
pub use transactions::{Isolation, TransactionCoordinator, TransactionDefinition};
pub use unit_of_work::{Change, ChangeKind, UnitOfWork};
pub use validation::validate_row;
