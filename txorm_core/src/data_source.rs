use std::future::Future;

use crate::entity::Entity;
use crate::manager::EntityManager;
use crate::query::FindQuery;
use crate::session::SessionSource;
use crate::transactions::{TransactionCoordinator, TransactionDefinition};
use crate::{OrmError, OrmResult};

/// Application entry point: a session source plus the coordinator that runs
/// transactions against it.
///
/// The single-operation helpers (`persist`, `find_one`, ...) each run in a short
/// transaction of their own, so a read here only sees committed data.
#[derive(Debug)]
pub struct DataSource<S: SessionSource> {
    coordinator: TransactionCoordinator<S>,
}

impl<S: SessionSource> DataSource<S> {
    pub fn new(source: S) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(source),
        }
    }

    pub fn with_defaults(self, def: TransactionDefinition) -> Self {
        Self {
            coordinator: self.coordinator.with_defaults(def),
        }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator<S> {
        &self.coordinator
    }

    pub fn source(&self) -> &S {
        self.coordinator.source()
    }

    /// Run `body` as one transaction; see [`TransactionCoordinator::run_in_transaction`].
    pub async fn transaction<R, E, F, Fut>(&self, body: F) -> Result<R, E>
    where
        F: FnOnce(EntityManager) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<OrmError>,
    {
        self.coordinator.run_in_transaction(body).await
    }

    pub async fn transaction_with<R, E, F, Fut>(
        &self,
        def: &TransactionDefinition,
        body: F,
    ) -> Result<R, E>
    where
        F: FnOnce(EntityManager) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<OrmError>,
    {
        self.coordinator.run_in_transaction_with(def, body).await
    }

    pub async fn persist<T: Entity>(&self, entity: T) -> OrmResult<T> {
        self.transaction(|em| async move { em.persist(entity).await })
            .await
    }

    pub async fn find_one<T: Entity>(&self, query: FindQuery) -> OrmResult<Option<T>> {
        self.transaction_with(&self.read_only(), |em| async move {
            em.find_one::<T>(query).await
        })
        .await
    }

    pub async fn find<T: Entity>(&self, query: FindQuery) -> OrmResult<Vec<T>> {
        self.transaction_with(&self.read_only(), |em| async move { em.find::<T>(query).await })
            .await
    }

    pub async fn find_by_id<T: Entity>(&self, id: T::Key) -> OrmResult<Option<T>> {
        self.transaction_with(&self.read_only(), |em| async move {
            em.find_by_id::<T>(&id).await
        })
        .await
    }

    pub async fn remove<T: Entity>(&self, entity: T) -> OrmResult<bool> {
        self.transaction(|em| async move { em.remove(&entity).await })
            .await
    }

    fn read_only(&self) -> TransactionDefinition {
        TransactionDefinition {
            read_only: true,
            ..self.coordinator.defaults().clone()
        }
    }
}
