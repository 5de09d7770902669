//! Transaction definitions and the coordinator that runs bodies atomically.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, warn, Instrument};

use crate::manager::{open_scope, EntityManager};
use crate::session::{SessionGuard, SessionSource};
use crate::OrmError;

/// Transaction isolation level (best-effort across backends).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    #[default]
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Transaction definition describing desired semantics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionDefinition {
    pub isolation: Isolation,
    pub read_only: bool,
    /// Passed through to the store unmodified; the core applies no timeout of its own.
    pub timeout: Option<Duration>,
}

impl TransactionDefinition {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}

/// Mutable transaction status recorded for a running transaction.
#[derive(Debug, Default)]
pub struct TransactionStatus {
    rollback_only: bool,
}

impl TransactionStatus {
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }
}

/// Runs transaction bodies against sessions from a [`SessionSource`].
///
/// Each call acquires its own session, so independent bodies may run concurrently.
#[derive(Debug)]
pub struct TransactionCoordinator<S: SessionSource> {
    source: S,
    defaults: TransactionDefinition,
}

impl<S: SessionSource> TransactionCoordinator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            defaults: TransactionDefinition::default(),
        }
    }

    pub fn with_defaults(mut self, def: TransactionDefinition) -> Self {
        self.defaults = def;
        self
    }

    pub fn defaults(&self) -> &TransactionDefinition {
        &self.defaults
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run `body` in a transaction using the coordinator defaults.
    pub async fn run_in_transaction<R, E, F, Fut>(&self, body: F) -> Result<R, E>
    where
        F: FnOnce(EntityManager) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<OrmError>,
    {
        self.run_in_transaction_with(&self.defaults, body).await
    }

    /// Run `body` in a transaction described by `def`.
    ///
    /// The body's `Ok` value is returned after commit. Any `Err` from the body rolls
    /// the transaction back and is returned unchanged. A panicking body is rolled back
    /// and the panic resumes once the session is released. The session is released
    /// exactly once on every path after it was acquired.
    pub async fn run_in_transaction_with<R, E, F, Fut>(
        &self,
        def: &TransactionDefinition,
        body: F,
    ) -> Result<R, E>
    where
        F: FnOnce(EntityManager) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<OrmError>,
    {
        let span = tracing::debug_span!(
            "transaction",
            isolation = ?def.isolation,
            read_only = def.read_only
        );
        async move {
            let mut session = SessionGuard::new(self.source.acquire().await?);
            let begun = match session.get() {
                Ok(s) => s.begin(def).await,
                Err(e) => Err(e),
            };
            if let Err(e) = begun {
                session.release();
                return Err(e.into());
            }
            debug!("transaction begun");

            let scope = open_scope(session);
            let outcome = AssertUnwindSafe(body(EntityManager::new(scope.clone())))
                .catch_unwind()
                .await;

            let Some(state) = scope.lock().await.take() else {
                return Err(OrmError::ScopeClosed.into());
            };
            let mut session = state.session;
            let changes = state.unit_of_work.len();

            match outcome {
                Ok(Ok(value)) if !state.status.is_rollback_only() => {
                    let committed = match session.get() {
                        Ok(s) => s.commit().await,
                        Err(e) => Err(e),
                    };
                    match committed {
                        Ok(()) => {
                            debug!(changes, "transaction committed");
                            session.release();
                            Ok(value)
                        }
                        Err(e) => {
                            warn!(error = %e, "commit failed");
                            rollback_quietly(&mut session).await;
                            session.release();
                            Err(e.into())
                        }
                    }
                }
                Ok(Ok(value)) => {
                    debug!(changes, "rollback-only transaction rolled back");
                    rollback_quietly(&mut session).await;
                    session.release();
                    Ok(value)
                }
                Ok(Err(e)) => {
                    debug!(changes, "transaction body failed, rolling back");
                    rollback_quietly(&mut session).await;
                    session.release();
                    Err(e)
                }
                Err(panic) => {
                    warn!(changes, "transaction body panicked, rolling back");
                    rollback_quietly(&mut session).await;
                    session.release();
                    std::panic::resume_unwind(panic)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Roll back, logging instead of surfacing failures: the caller is already returning
/// another outcome.
async fn rollback_quietly(session: &mut SessionGuard) {
    let res = match session.get() {
        Ok(s) => s.rollback().await,
        Err(e) => Err(e),
    };
    if let Err(e) = res {
        warn!(error = %e, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StorageSession;
    use crate::entity::{EntitySchema, FieldDef, Row, Value, ValueKind};
    use crate::query::{Filter, FindQuery};
    use crate::{Entity, Fetchable, Identifiable, OrmResult};
    use async_trait::async_trait;
    use futures::executor::block_on;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Log {
        calls: Vec<String>,
        committed: Vec<Row>,
        releases: usize,
    }

    /// A session that buffers inserts and publishes them on commit.
    struct MockSession {
        log: Arc<Mutex<Log>>,
        pending: Vec<Row>,
        next_id: i64,
        fail_commit: bool,
    }

    #[async_trait]
    impl StorageSession for MockSession {
        async fn begin(&mut self, _def: &TransactionDefinition) -> OrmResult<()> {
            self.log.lock().unwrap().calls.push("begin".into());
            Ok(())
        }
        async fn commit(&mut self) -> OrmResult<()> {
            let mut log = self.log.lock().unwrap();
            log.calls.push("commit".into());
            if self.fail_commit {
                return Err(OrmError::store_msg("disk full"));
            }
            log.committed.append(&mut self.pending);
            Ok(())
        }
        async fn rollback(&mut self) -> OrmResult<()> {
            self.log.lock().unwrap().calls.push("rollback".into());
            self.pending.clear();
            Ok(())
        }
        fn release(self: Box<Self>) {
            let mut log = self.log.lock().unwrap();
            log.calls.push("release".into());
            log.releases += 1;
        }
        async fn insert(&mut self, _schema: &'static EntitySchema, mut row: Row) -> OrmResult<Value> {
            self.next_id += 1;
            let id = Value::I64(self.next_id);
            row.set("id", id.clone());
            self.pending.push(row);
            self.log.lock().unwrap().calls.push("insert".into());
            Ok(id)
        }
        async fn update(&mut self, _s: &'static EntitySchema, _id: Value, _row: Row) -> OrmResult<u64> {
            Ok(0)
        }
        async fn delete(&mut self, _s: &'static EntitySchema, _id: Value) -> OrmResult<u64> {
            Ok(0)
        }
        async fn select(&mut self, _s: &'static EntitySchema, filter: &Filter) -> OrmResult<Vec<Row>> {
            let log = self.log.lock().unwrap();
            Ok(log
                .committed
                .iter()
                .chain(self.pending.iter())
                .filter(|r| filter.matches(r))
                .cloned()
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct MockSource {
        log: Arc<Mutex<Log>>,
        fail_commit: bool,
        unavailable: bool,
    }

    #[async_trait]
    impl SessionSource for MockSource {
        async fn acquire(&self) -> OrmResult<Box<dyn StorageSession>> {
            if self.unavailable {
                return Err(OrmError::acquisition(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "pool exhausted",
                )));
            }
            Ok(Box::new(MockSession {
                log: self.log.clone(),
                pending: Vec::new(),
                next_id: 0,
                fail_commit: self.fail_commit,
            }))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: Option<i64>,
        body: Option<String>,
    }

    static NOTE_FIELDS: [FieldDef; 2] = [
        FieldDef {
            name: "id",
            column: "id",
            kind: ValueKind::I64,
            nullable: true,
            required: false,
            unique: false,
            identity: true,
        },
        FieldDef {
            name: "body",
            column: "body",
            kind: ValueKind::String,
            nullable: true,
            required: true,
            unique: false,
            identity: false,
        },
    ];
    static NOTE_SCHEMA: EntitySchema = EntitySchema {
        entity: "Note",
        table: "notes",
        fields: &NOTE_FIELDS,
    };

    impl Fetchable for Note {
        const TABLE: &'static str = "notes";
        const SELECT_COLUMNS: &'static [&'static str] = &["id", "body"];
    }
    impl Identifiable for Note {
        type Key = i64;
        const ID_COLUMN: &'static str = "id";
        fn id(&self) -> Option<i64> {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }
    }
    impl Entity for Note {
        const SCHEMA: &'static EntitySchema = &NOTE_SCHEMA;
        fn to_row(&self) -> Row {
            let mut r = Row::new();
            r.set("id", self.id.into());
            r.set("body", self.body.clone().into());
            r
        }
        fn from_row(row: &Row) -> OrmResult<Self> {
            Ok(Note {
                id: crate::decode_column(row, "id")?,
                body: crate::decode_column(row, "body")?,
            })
        }
    }

    fn note(body: &str) -> Note {
        Note {
            id: None,
            body: Some(body.to_string()),
        }
    }

    fn calls(src: &MockSource) -> Vec<String> {
        src.log.lock().unwrap().calls.clone()
    }

    #[test]
    fn commit_path_assigns_ids_and_releases_once() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src.clone());
        let out = block_on(coord.run_in_transaction(|em| async move {
            let a = em.persist(note("a")).await?;
            let b = em.persist(note("b")).await?;
            Ok::<_, OrmError>((a.id, b.id))
        }))
        .unwrap();
        assert_eq!(out, (Some(1), Some(2)));
        assert_eq!(
            calls(&src),
            vec!["begin", "insert", "insert", "commit", "release"]
        );
        assert_eq!(src.log.lock().unwrap().committed.len(), 2);
        assert_eq!(src.log.lock().unwrap().releases, 1);
    }

    #[test]
    fn validation_failure_rolls_back_and_returns_same_error() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src.clone());
        let err = block_on(coord.run_in_transaction(|em| async move {
            em.persist(note("a")).await?;
            em.persist(Note { id: None, body: None }).await?;
            Ok::<_, OrmError>(())
        }))
        .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(calls(&src), vec!["begin", "insert", "rollback", "release"]);
        assert!(src.log.lock().unwrap().committed.is_empty());
    }

    #[derive(Debug, PartialEq)]
    enum AppError {
        Orm(String),
        Custom(u32),
    }
    impl From<OrmError> for AppError {
        fn from(e: OrmError) -> Self {
            AppError::Orm(e.to_string())
        }
    }

    #[test]
    fn caller_error_type_is_delivered_unwrapped() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src.clone());
        let err = block_on(coord.run_in_transaction(|em| async move {
            em.persist(note("a")).await?;
            Err::<(), _>(AppError::Custom(7))
        }))
        .unwrap_err();
        assert_eq!(err, AppError::Custom(7));
        assert_eq!(src.log.lock().unwrap().releases, 1);
    }

    #[test]
    fn read_your_writes_inside_scope() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src);
        let found = block_on(coord.run_in_transaction(|em| async move {
            let saved = em.persist(note("visible")).await?;
            let found: Option<Note> = em
                .find_one(FindQuery::new().eq("body", "visible"))
                .await?;
            assert_eq!(found.as_ref(), Some(&saved));
            Ok::<_, OrmError>(found)
        }))
        .unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn acquisition_failure_never_begins() {
        let src = MockSource {
            unavailable: true,
            ..MockSource::default()
        };
        let coord = TransactionCoordinator::new(src.clone());
        let mut ran = false;
        let err = block_on(coord.run_in_transaction(|_em| {
            ran = true;
            async { Ok::<_, OrmError>(()) }
        }))
        .unwrap_err();
        assert!(matches!(err, OrmError::SessionAcquisition { .. }));
        assert!(!ran);
        assert!(calls(&src).is_empty());
    }

    #[test]
    fn commit_failure_rolls_back_and_reports_store_error() {
        let src = MockSource {
            fail_commit: true,
            ..MockSource::default()
        };
        let coord = TransactionCoordinator::new(src.clone());
        let err = block_on(coord.run_in_transaction(|em| async move {
            em.persist(note("a")).await?;
            Ok::<_, OrmError>(())
        }))
        .unwrap_err();
        assert!(err.is_store());
        assert_eq!(
            calls(&src),
            vec!["begin", "insert", "commit", "rollback", "release"]
        );
    }

    #[test]
    fn rollback_only_returns_value_without_committing() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src.clone());
        let v = block_on(coord.run_in_transaction(|em| async move {
            em.persist(note("a")).await?;
            em.set_rollback_only().await?;
            Ok::<_, OrmError>(5)
        }))
        .unwrap();
        assert_eq!(v, 5);
        assert!(src.log.lock().unwrap().committed.is_empty());
        assert!(calls(&src).contains(&"rollback".to_string()));
    }

    #[test]
    fn manager_is_unusable_after_scope_ends() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src);
        let leaked = block_on(
            coord.run_in_transaction(|em| async move { Ok::<_, OrmError>(em.clone()) }),
        )
        .unwrap();
        let err = block_on(leaked.persist(note("late"))).unwrap_err();
        assert!(matches!(err, OrmError::ScopeClosed));
        assert!(!block_on(leaked.is_open()));
    }

    #[test]
    fn panicking_body_rolls_back_and_releases() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src.clone());
        let res = std::panic::catch_unwind(AssertUnwindSafe(|| {
            block_on(coord.run_in_transaction(|em| async move {
                em.persist(note("a")).await?;
                if em.is_open().await {
                    panic!("body exploded");
                }
                Ok::<_, OrmError>(())
            }))
        }));
        assert!(res.is_err());
        assert_eq!(calls(&src), vec!["begin", "insert", "rollback", "release"]);
    }

    #[test]
    fn changes_are_journaled_in_order() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src);
        let changes = block_on(coord.run_in_transaction(|em| async move {
            em.persist(note("a")).await?;
            em.persist(note("b")).await?;
            em.changes().await
        }))
        .unwrap();
        let ids: Vec<_> = changes.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec![Value::I64(1), Value::I64(2)]);
    }

    #[test]
    fn persisted_entities_become_managed() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src);
        let leaked = block_on(coord.run_in_transaction(|em| async move {
            let fresh = note("new");
            assert!(!em.is_managed(&fresh).await?);
            let saved = em.persist(fresh).await?;
            assert!(em.is_managed(&saved).await?);
            let stranger = Note {
                id: Some(99),
                body: Some("elsewhere".into()),
            };
            assert!(!em.is_managed(&stranger).await?);
            Ok::<_, OrmError>((em.clone(), saved))
        }))
        .unwrap();
        let (em, saved) = leaked;
        assert!(matches!(
            block_on(em.is_managed(&saved)),
            Err(OrmError::ScopeClosed)
        ));
    }

    #[test]
    fn abandoned_transaction_still_releases_its_session() {
        let src = MockSource::default();
        let coord = TransactionCoordinator::new(src.clone());
        let fut = coord.run_in_transaction(|em| async move {
            em.persist(note("never committed")).await?;
            futures::future::pending::<()>().await;
            Ok::<_, OrmError>(())
        });
        assert!(fut.now_or_never().is_none());

        assert_eq!(src.log.lock().unwrap().releases, 1);
        assert_eq!(calls(&src), vec!["begin", "insert", "release"]);
        assert!(src.log.lock().unwrap().committed.is_empty());
    }

    #[test]
    fn defaults_and_status_basic_behaviour() {
        let def = TransactionDefinition::default();
        assert_eq!(def.isolation, Isolation::Default);
        assert!(!def.read_only);
        assert!(def.timeout.is_none());
        assert!(TransactionDefinition::read_only().read_only);

        let mut st = TransactionStatus::default();
        assert!(!st.is_rollback_only());
        st.set_rollback_only();
        assert!(st.is_rollback_only());

        let coord = TransactionCoordinator::new(MockSource::default()).with_defaults(
            TransactionDefinition {
                isolation: Isolation::Serializable,
                read_only: false,
                timeout: Some(Duration::from_millis(250)),
            },
        );
        assert_eq!(coord.defaults().isolation, Isolation::Serializable);
    }
}
