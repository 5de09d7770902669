//! The entity manager handed to transaction bodies.

use std::fmt;
use std::sync::Arc;

use futures::lock::Mutex;

use crate::entity::{ColumnValue, Entity, Value};
use crate::query::{Filter, FindQuery};
use crate::session::SessionGuard;
use crate::transactions::TransactionStatus;
use crate::unit_of_work::{Change, ChangeKind, UnitOfWork};
use crate::validation::validate_row;
use crate::{OrmError, OrmResult};

/// Everything one transaction scope owns while it is open.
pub(crate) struct ScopeState {
    pub(crate) session: SessionGuard,
    pub(crate) unit_of_work: UnitOfWork,
    pub(crate) status: TransactionStatus,
}

/// Shared slot for the scope; emptied by the coordinator when the transaction ends.
pub(crate) type SharedScope = Arc<Mutex<Option<ScopeState>>>;

pub(crate) fn open_scope(session: SessionGuard) -> SharedScope {
    Arc::new(Mutex::new(Some(ScopeState {
        session,
        unit_of_work: UnitOfWork::new(),
        status: TransactionStatus::default(),
    })))
}

/// Persist/find façade bound to one storage session and its open transaction.
///
/// Clones share the same session; their operations are serialized so only one
/// statement is in flight at a time. Once the owning transaction commits or rolls back,
/// every call fails with [`OrmError::ScopeClosed`].
#[derive(Clone)]
pub struct EntityManager {
    scope: SharedScope,
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager").finish_non_exhaustive()
    }
}

fn decode_identity<T: Entity>(id: Value) -> OrmResult<T::Key> {
    T::Key::from_value(id).map_err(|source| OrmError::Mapping {
        column: T::ID_COLUMN,
        source: Box::new(source),
    })
}

impl EntityManager {
    pub(crate) fn new(scope: SharedScope) -> Self {
        Self { scope }
    }

    /// Insert or update `entity` and return it with its identity assigned.
    ///
    /// The entity is validated first; a rejected entity never reaches the store. An
    /// entity carrying an identity is updated, or inserted with that identity when no
    /// row has it yet.
    pub async fn persist<T: Entity>(&self, mut entity: T) -> OrmResult<T> {
        let row = entity.to_row();
        let mut guard = self.scope.lock().await;
        let scope = guard.as_mut().ok_or(OrmError::ScopeClosed)?;
        validate_row(T::SCHEMA, &row)?;

        let table = T::SCHEMA.table;
        match entity.id() {
            None => {
                let id = scope.session.get()?.insert(T::SCHEMA, row).await?;
                entity.set_id(decode_identity::<T>(id.clone())?);
                scope.unit_of_work.record(ChangeKind::Inserted, table, id);
            }
            Some(key) => {
                let id = key.to_value();
                let affected = scope
                    .session
                    .get()?
                    .update(T::SCHEMA, id.clone(), row.clone())
                    .await?;
                if affected == 0 {
                    let id = scope.session.get()?.insert(T::SCHEMA, row).await?;
                    scope.unit_of_work.record(ChangeKind::Inserted, table, id);
                } else {
                    scope.unit_of_work.record(ChangeKind::Updated, table, id);
                }
            }
        }
        tracing::trace!(table, "entity persisted");
        Ok(entity)
    }

    /// Persist each entity in order. Stops at the first failure.
    pub async fn persist_all<T: Entity>(&self, entities: Vec<T>) -> OrmResult<Vec<T>> {
        let mut out = Vec::with_capacity(entities.len());
        for e in entities {
            out.push(self.persist(e).await?);
        }
        Ok(out)
    }

    /// Find the first entity (by ascending identity) matching `query`, including rows
    /// written earlier in this transaction.
    pub async fn find_one<T: Entity>(&self, query: FindQuery) -> OrmResult<Option<T>> {
        let filter = query.bind(T::SCHEMA)?.with_limit(1);
        let mut rows = self.select::<T>(&filter).await?;
        match rows.pop() {
            Some(row) => T::from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    /// Find every entity matching `query`.
    pub async fn find<T: Entity>(&self, query: FindQuery) -> OrmResult<Vec<T>> {
        let filter = query.bind(T::SCHEMA)?;
        let rows = self.select::<T>(&filter).await?;
        rows.iter().map(T::from_row).collect()
    }

    pub async fn find_by_id<T: Entity>(&self, id: &T::Key) -> OrmResult<Option<T>> {
        let filter = Filter::by_identity(T::SCHEMA, id.to_value());
        let mut rows = self.select::<T>(&filter).await?;
        match rows.pop() {
            Some(row) => T::from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    /// Delete `entity`. Returns false when it has no identity or no row matched.
    pub async fn remove<T: Entity>(&self, entity: &T) -> OrmResult<bool> {
        let mut guard = self.scope.lock().await;
        let scope = guard.as_mut().ok_or(OrmError::ScopeClosed)?;
        let Some(key) = entity.id() else {
            return Ok(false);
        };
        let id = key.to_value();
        let affected = scope.session.get()?.delete(T::SCHEMA, id.clone()).await?;
        if affected > 0 {
            scope
                .unit_of_work
                .record(ChangeKind::Removed, T::SCHEMA.table, id);
        }
        Ok(affected > 0)
    }

    /// Mark the transaction so it rolls back even if the body succeeds.
    pub async fn set_rollback_only(&self) -> OrmResult<()> {
        let mut guard = self.scope.lock().await;
        let scope = guard.as_mut().ok_or(OrmError::ScopeClosed)?;
        scope.status.set_rollback_only();
        Ok(())
    }

    pub async fn is_rollback_only(&self) -> OrmResult<bool> {
        let guard = self.scope.lock().await;
        let scope = guard.as_ref().ok_or(OrmError::ScopeClosed)?;
        Ok(scope.status.is_rollback_only())
    }

    /// Writes issued through this scope so far, in order.
    pub async fn changes(&self) -> OrmResult<Vec<Change>> {
        let guard = self.scope.lock().await;
        let scope = guard.as_ref().ok_or(OrmError::ScopeClosed)?;
        Ok(scope.unit_of_work.changes().to_vec())
    }

    /// Whether `entity` was persisted in this scope and not removed since. An entity
    /// without an identity is new and never managed.
    pub async fn is_managed<T: Entity>(&self, entity: &T) -> OrmResult<bool> {
        let guard = self.scope.lock().await;
        let scope = guard.as_ref().ok_or(OrmError::ScopeClosed)?;
        Ok(entity
            .id()
            .is_some_and(|key| scope.unit_of_work.is_managed(T::SCHEMA.table, &key.to_value())))
    }

    /// Whether the owning transaction is still open.
    pub async fn is_open(&self) -> bool {
        self.scope.lock().await.is_some()
    }

    async fn select<T: Entity>(&self, filter: &Filter) -> OrmResult<Vec<crate::entity::Row>> {
        let mut guard = self.scope.lock().await;
        let scope = guard.as_mut().ok_or(OrmError::ScopeClosed)?;
        scope.session.get()?.select(T::SCHEMA, filter).await
    }
}
