#![forbid(unsafe_code)]
//! Facade crate re-exporting the public API of the `txorm` workspace.
//!
//! Persistence happens inside transactions: a [`DataSource`] acquires a storage session,
//! begins a transaction and hands the body an [`EntityManager`]. Everything the body
//! persists becomes visible to other transactions only if the body succeeds; any error
//! rolls all of it back.
//!
//! ```
//! use txorm::backends::MemoryDatabase;
//! use txorm::{DataSource, Entity, FindQuery, OrmError};
//!
//! #[derive(Entity, Clone, Debug, PartialEq)]
//! struct Post {
//!     #[column(id)]
//!     id: Option<i64>,
//!     #[column(required)]
//!     title: Option<String>,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), OrmError> {
//! let db = MemoryDatabase::builder().table(Post::SCHEMA).build();
//! let ds = DataSource::new(db);
//!
//! // The untitled post fails validation, so the first post is rolled back too.
//! let res = ds
//!     .transaction(|em| async move {
//!         em.persist(Post { id: None, title: Some("kept?".into()) }).await?;
//!         em.persist(Post { id: None, title: None }).await?;
//!         Ok::<_, OrmError>(())
//!     })
//!     .await;
//! assert!(res.unwrap_err().is_validation());
//!
//! let found: Option<Post> = ds.find_one(FindQuery::new().eq("title", "kept?")).await?;
//! assert!(found.is_none());
//! # Ok(())
//! # }
//! ```
//!
//! Storage backends live under [`backends`], each behind a cargo feature.

// Re-export all core traits and types.
pub use txorm_core::{
    async_trait, decode_column, validate_row, Change, ChangeKind, ColumnValue, ConversionError,
    DataSource, Entity, EntityManager, EntitySchema, Fetchable, FieldDef, Filter, FindQuery,
    Identifiable, Isolation, OrmError, OrmResult, Row, SessionSource, StorageSession,
    TransactionCoordinator, TransactionDefinition, ValidationError, ValidationRule, Value,
    ValueKind,
};

// Re-export the derive macro.
pub use txorm_macros::Entity;

// Optional re-export of the SQL builder helpers.
#[cfg(feature = "sql-builder")]
pub use txorm_sql_builder as sql_builder;

pub use txorm_core::transactions;

pub mod backends {
    #[cfg(feature = "memory")]
    pub use txorm_memory::{MemoryDatabase, MemoryDatabaseBuilder, MemorySession, SessionStats};

    #[cfg(feature = "libsql-backend")]
    pub use txorm_libsql::{LibsqlSession, LibsqlSessionSource};
}
