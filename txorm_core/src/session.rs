//! Contracts for the connection layer the transactional core sits on.
//!
//! Backends implement [`StorageSession`] (one logical connection) and
//! [`SessionSource`] (whatever hands sessions out). The core never opens connections
//! itself.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::{EntitySchema, Row, Value};
use crate::query::Filter;
use crate::transactions::TransactionDefinition;
use crate::{OrmError, OrmResult};

/// A single logical connection to a backing store.
///
/// Operations issued after `begin` and before `commit`/`rollback` form one atomic unit
/// from the point of view of every other session, and are visible to later reads on
/// this same session. Only one operation is in flight on a session at a time.
///
/// Dropping a session that still has an open transaction must discard its uncommitted
/// writes. If the caller abandons a transaction mid-body, the core still calls
/// `release` when the scope is dropped, without a prior `rollback`.
#[async_trait]
pub trait StorageSession: Send {
    async fn begin(&mut self, def: &TransactionDefinition) -> OrmResult<()>;

    async fn commit(&mut self) -> OrmResult<()>;

    async fn rollback(&mut self) -> OrmResult<()>;

    /// Hand the session back to its source. Consuming `self` makes release happen once.
    fn release(self: Box<Self>);

    /// Insert `row` into the schema's table and return the identity of the new row.
    /// A `Null` identity column asks the store to generate one.
    async fn insert(&mut self, schema: &'static EntitySchema, row: Row) -> OrmResult<Value>;

    /// Overwrite the row with identity `id`. Returns the number of rows affected.
    async fn update(&mut self, schema: &'static EntitySchema, id: Value, row: Row)
        -> OrmResult<u64>;

    /// Delete the row with identity `id`. Returns the number of rows affected.
    async fn delete(&mut self, schema: &'static EntitySchema, id: Value) -> OrmResult<u64>;

    /// Return every row matching `filter`, ordered by ascending identity.
    async fn select(&mut self, schema: &'static EntitySchema, filter: &Filter)
        -> OrmResult<Vec<Row>>;
}

/// Owns an acquired session and releases it on drop unless released explicitly.
pub(crate) struct SessionGuard(Option<Box<dyn StorageSession>>);

impl SessionGuard {
    pub(crate) fn new(session: Box<dyn StorageSession>) -> Self {
        Self(Some(session))
    }

    pub(crate) fn get(&mut self) -> OrmResult<&mut (dyn StorageSession + 'static)> {
        self.0.as_deref_mut().ok_or(OrmError::ScopeClosed)
    }

    pub(crate) fn release(mut self) {
        if let Some(session) = self.0.take() {
            session.release();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            tracing::debug!("session released on drop");
            session.release();
        }
    }
}

/// The connection layer: hands out storage sessions.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Obtain a session. Fails with `OrmError::SessionAcquisition` when none is available.
    async fn acquire(&self) -> OrmResult<Box<dyn StorageSession>>;
}

#[async_trait]
impl<S> SessionSource for Arc<S>
where
    S: SessionSource + ?Sized,
{
    async fn acquire(&self) -> OrmResult<Box<dyn StorageSession>> {
        (**self).acquire().await
    }
}
