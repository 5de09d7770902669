#![forbid(unsafe_code)]
//! In-process backing store for txorm.
//!
//! Committed tables live behind one lock shared by every session. A session inside a
//! transaction keeps its writes in a private overlay: its own reads see them, other
//! sessions do not until commit applies the overlay in one step. Identities come from a
//! per-table sequence that, like most SQL stores, is not rewound by rollback.

use std::collections::{btree_map, BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use txorm_core::{
    EntitySchema, Filter, OrmError, OrmResult, Row, SessionSource, StorageSession,
    TransactionDefinition, Value,
};

#[cfg(feature = "tracing")]
use tracing::info;

#[inline]
#[allow(unused_variables)]
fn obs_record(op: &str, table: &str, start: Instant, rows: usize, success: bool) {
    let elapsed = start.elapsed().as_millis() as u64;
    #[cfg(feature = "tracing")]
    {
        info!(
            store = "memory",
            table = table,
            op = op,
            rows = rows,
            elapsed_ms = elapsed,
            success = success,
            "session op"
        );
    }
    #[cfg(feature = "metrics")]
    {
        metrics::counter!("session_ops_total", 1, "op" => op.to_string(), "table" => table.to_string(), "success" => success.to_string());
        metrics::histogram!("session_op_duration_ms", elapsed as f64, "op" => op.to_string(), "table" => table.to_string());
        if !success {
            metrics::counter!("session_op_errors_total", 1, "op" => op.to_string(), "table" => table.to_string());
        }
    }
}

/// Errors raised by the memory store itself, surfaced as `OrmError::Store` or
/// `OrmError::SessionAcquisition`.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("no such table: {0}")]
    NoSuchTable(&'static str),
    #[error("all {max} sessions are in use")]
    SessionLimit { max: usize },
    #[error("attempt to write in a read-only transaction")]
    ReadOnly,
    #[error("a transaction is already active on this session")]
    AlreadyActive,
    #[error("no transaction is active on this session")]
    NoTransaction,
    #[error("identity value {0:?} is not an integer")]
    BadIdentity(Value),
    #[error("row {id} in {table} was changed by another transaction")]
    WriteConflict { table: &'static str, id: i64 },
}

impl From<MemoryError> for OrmError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::SessionLimit { .. } => OrmError::acquisition(e),
            other => OrmError::store(other),
        }
    }
}

#[derive(Debug)]
struct Table {
    schema: &'static EntitySchema,
    rows: BTreeMap<i64, Row>,
    next_id: i64,
}

impl Table {
    fn new(schema: &'static EntitySchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

#[derive(Debug, Default)]
struct Committed {
    tables: HashMap<&'static str, Table>,
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<Committed>,
    limit: Option<(usize, Arc<Semaphore>)>,
    open: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Session bookkeeping counters, for leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub acquired: usize,
    pub released: usize,
    pub open: usize,
}

/// Configures a [`MemoryDatabase`].
#[derive(Debug, Default)]
pub struct MemoryDatabaseBuilder {
    max_sessions: Option<usize>,
    schemas: Vec<&'static EntitySchema>,
}

impl MemoryDatabaseBuilder {
    /// Cap on concurrently open sessions; `acquire` fails beyond it.
    pub fn max_sessions(mut self, n: usize) -> Self {
        self.max_sessions = Some(n);
        self
    }

    pub fn table(mut self, schema: &'static EntitySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn build(self) -> MemoryDatabase {
        let db = MemoryDatabase {
            shared: Arc::new(Shared {
                limit: self
                    .max_sessions
                    .map(|n| (n, Arc::new(Semaphore::new(n)))),
                ..Shared::default()
            }),
        };
        for schema in self.schemas {
            db.create_table(schema);
        }
        db
    }
}

/// A shared in-memory database; cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MemoryDatabaseBuilder {
        MemoryDatabaseBuilder::default()
    }

    /// Create the table for `schema` unless it already exists.
    pub fn create_table(&self, schema: &'static EntitySchema) {
        self.shared
            .state
            .write()
            .tables
            .entry(schema.table)
            .or_insert_with(|| Table::new(schema));
    }

    /// Remove every committed row, keeping tables and sequences.
    pub fn truncate_all(&self) {
        for table in self.shared.state.write().tables.values_mut() {
            table.rows.clear();
        }
    }

    /// Number of committed rows in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.shared
            .state
            .read()
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            acquired: self.shared.acquired.load(Ordering::SeqCst),
            released: self.shared.released.load(Ordering::SeqCst),
            open: self.shared.open.load(Ordering::SeqCst),
        }
    }

    /// Open a session without going through [`SessionSource`]. Counts against
    /// `max_sessions` like any other.
    pub fn session(&self) -> OrmResult<MemorySession> {
        let permit = SessionPermit::acquire(self.shared.clone())?;
        Ok(MemorySession {
            shared: self.shared.clone(),
            tx: None,
            _permit: permit,
        })
    }
}

#[async_trait]
impl SessionSource for MemoryDatabase {
    async fn acquire(&self) -> OrmResult<Box<dyn StorageSession>> {
        Ok(Box::new(self.session()?))
    }
}

/// One open session: holds a slot when sessions are capped and keeps the stats.
#[derive(Debug)]
struct SessionPermit {
    shared: Arc<Shared>,
    _slot: Option<OwnedSemaphorePermit>,
}

impl SessionPermit {
    fn acquire(shared: Arc<Shared>) -> Result<Self, MemoryError> {
        let slot = match &shared.limit {
            Some((max, semaphore)) => Some(
                semaphore
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| MemoryError::SessionLimit { max: *max })?,
            ),
            None => None,
        };
        shared.open.fetch_add(1, Ordering::SeqCst);
        shared.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            shared,
            _slot: slot,
        })
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// One uncommitted write. `row` is `None` for a delete.
#[derive(Debug)]
struct Pending {
    /// Whether the row was committed when this transaction first wrote it.
    existed: bool,
    row: Option<Row>,
}

impl Pending {
    /// Inserted and then deleted again inside the transaction: nothing to apply.
    fn is_noop(&self) -> bool {
        !self.existed && self.row.is_none()
    }
}

/// Uncommitted writes of one transaction, by table and identity.
#[derive(Debug, Default)]
struct TxState {
    read_only: bool,
    overlay: HashMap<&'static str, BTreeMap<i64, Pending>>,
}

/// One logical connection to a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
    tx: Option<TxState>,
    _permit: SessionPermit,
}

fn key_of(value: &Value) -> Result<i64, MemoryError> {
    match value {
        Value::I64(i) => Ok(*i),
        Value::I32(i) => Ok(i64::from(*i)),
        other => Err(MemoryError::BadIdentity(other.clone())),
    }
}

fn constraint(schema: &EntitySchema, column: &str, message: &str) -> OrmError {
    OrmError::Constraint {
        table: schema.table.to_string(),
        column: column.to_string(),
        message: message.to_string(),
    }
}

/// Store-side column rules: NOT NULL and UNIQUE against `visible` rows other than `id`.
fn check_constraints(
    schema: &EntitySchema,
    id: i64,
    row: &Row,
    visible: &BTreeMap<i64, Row>,
) -> OrmResult<()> {
    for field in schema.fields.iter().filter(|f| !f.identity) {
        let value = row.get(field.column).unwrap_or(&Value::Null);
        if value.is_null() {
            if field.rejects_null() {
                return Err(constraint(schema, field.column, "NOT NULL constraint failed"));
            }
            continue;
        }
        if field.unique {
            let clash = visible
                .iter()
                .any(|(other, r)| *other != id && r.get(field.column) == Some(value));
            if clash {
                return Err(constraint(schema, field.column, "UNIQUE constraint failed"));
            }
        }
    }
    Ok(())
}

/// A transaction's writes to `table` must still fit the committed rows: an insert may
/// not find its identity taken, an update or delete must still find its row.
fn check_commit(
    table: &Table,
    name: &'static str,
    overlay: &BTreeMap<i64, Pending>,
) -> OrmResult<()> {
    for (id, pending) in overlay.iter().filter(|(_, p)| !p.is_noop()) {
        let present = table.rows.contains_key(id);
        if pending.existed && !present {
            return Err(MemoryError::WriteConflict { table: name, id: *id }.into());
        }
        if !pending.existed && present {
            let identity = table.schema.identity();
            return Err(constraint(
                table.schema,
                identity.column,
                "PRIMARY KEY constraint failed",
            ));
        }
    }

    let mut merged = table.rows.clone();
    for (id, pending) in overlay.iter().filter(|(_, p)| !p.is_noop()) {
        match &pending.row {
            Some(row) => {
                merged.insert(*id, row.clone());
            }
            None => {
                merged.remove(id);
            }
        }
    }
    for (id, pending) in overlay {
        if let Some(row) = &pending.row {
            check_constraints(table.schema, *id, row, &merged)?;
        }
    }
    Ok(())
}

/// Keep only the schema's columns, with the identity set to `id`.
fn normalize(schema: &EntitySchema, id: i64, row: &Row) -> Row {
    let identity = schema.identity();
    let mut out = Row::with_capacity(schema.fields.len());
    for field in schema.fields {
        let value = if field.identity {
            Value::I64(id).coerce(identity.kind).unwrap_or(Value::I64(id))
        } else {
            row.get(field.column)
                .cloned()
                .and_then(|v| v.coerce(field.kind))
                .unwrap_or(Value::Null)
        };
        out.set(field.column, value);
    }
    out
}

impl MemorySession {
    fn writable(&self) -> Result<(), MemoryError> {
        match &self.tx {
            Some(tx) if tx.read_only => Err(MemoryError::ReadOnly),
            _ => Ok(()),
        }
    }

    /// Committed rows of `table` with this session's overlay applied.
    fn visible_rows(&self, committed: &Committed, table: &'static str) -> BTreeMap<i64, Row> {
        let mut rows = committed
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default();
        if let Some(overlay) = self.tx.as_ref().and_then(|tx| tx.overlay.get(table)) {
            for (id, pending) in overlay {
                match &pending.row {
                    Some(row) => {
                        rows.insert(*id, row.clone());
                    }
                    None => {
                        rows.remove(id);
                    }
                }
            }
        }
        rows
    }

    /// Record a write: into the overlay inside a transaction, else straight to the table.
    fn put(&mut self, committed: &mut Committed, table: &'static str, id: i64, row: Option<Row>) {
        let existed = committed
            .tables
            .get(table)
            .is_some_and(|t| t.rows.contains_key(&id));
        match self.tx.as_mut() {
            Some(tx) => match tx.overlay.entry(table).or_default().entry(id) {
                btree_map::Entry::Occupied(mut slot) => slot.get_mut().row = row,
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(Pending { existed, row });
                }
            },
            None => {
                if let Some(t) = committed.tables.get_mut(table) {
                    match row {
                        Some(r) => {
                            t.rows.insert(id, r);
                        }
                        None => {
                            t.rows.remove(&id);
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StorageSession for MemorySession {
    async fn begin(&mut self, def: &TransactionDefinition) -> OrmResult<()> {
        if self.tx.is_some() {
            return Err(MemoryError::AlreadyActive.into());
        }
        // Isolation is always read-committed with read-your-writes here.
        self.tx = Some(TxState {
            read_only: def.read_only,
            overlay: HashMap::new(),
        });
        Ok(())
    }

    async fn commit(&mut self) -> OrmResult<()> {
        let start = Instant::now();
        let tx = self.tx.take().ok_or(MemoryError::NoTransaction)?;
        let mut committed = self.shared.state.write();

        // Re-check every write against the latest committed state before applying
        // anything, so a failed commit leaves the tables untouched.
        for (table, overlay) in &tx.overlay {
            let t = committed
                .tables
                .get(table)
                .ok_or(MemoryError::NoSuchTable(*table))?;
            if let Err(e) = check_commit(t, table, overlay) {
                obs_record("commit", table, start, 0, false);
                return Err(e);
            }
        }

        let mut written = 0;
        for (table, overlay) in tx.overlay {
            if let Some(t) = committed.tables.get_mut(table) {
                for (id, pending) in overlay.into_iter().filter(|(_, p)| !p.is_noop()) {
                    written += 1;
                    match pending.row {
                        Some(row) => {
                            t.rows.insert(id, row);
                        }
                        None => {
                            t.rows.remove(&id);
                        }
                    }
                }
            }
        }
        obs_record("commit", "*", start, written, true);
        Ok(())
    }

    async fn rollback(&mut self) -> OrmResult<()> {
        // Rolling back with nothing open (e.g. after a failed commit) is a no-op.
        if let Some(tx) = self.tx.take() {
            let discarded: usize = tx.overlay.values().map(BTreeMap::len).sum();
            obs_record("rollback", "*", Instant::now(), discarded, true);
        }
        Ok(())
    }

    fn release(self: Box<Self>) {
        // Dropping the permit frees the slot; any open overlay is discarded with it.
    }

    async fn insert(&mut self, schema: &'static EntitySchema, row: Row) -> OrmResult<Value> {
        let start = Instant::now();
        self.writable()?;
        let identity = schema.identity();
        let shared = Arc::clone(&self.shared);
        let mut committed = shared.state.write();
        let table = committed
            .tables
            .get_mut(schema.table)
            .ok_or(MemoryError::NoSuchTable(schema.table))?;

        let id = match row.get(identity.column) {
            None | Some(Value::Null) => {
                let id = table.next_id;
                table.next_id = id.saturating_add(1);
                id
            }
            Some(explicit) => {
                let id = key_of(explicit)?;
                table.next_id = table.next_id.max(id.saturating_add(1));
                id
            }
        };

        let visible = self.visible_rows(&committed, schema.table);
        if visible.contains_key(&id) {
            obs_record("insert", schema.table, start, 0, false);
            return Err(constraint(
                schema,
                identity.column,
                "PRIMARY KEY constraint failed",
            ));
        }
        let stored = normalize(schema, id, &row);
        if let Err(e) = check_constraints(schema, id, &stored, &visible) {
            obs_record("insert", schema.table, start, 0, false);
            return Err(e);
        }
        let id_value = stored
            .get(identity.column)
            .cloned()
            .unwrap_or(Value::I64(id));
        self.put(&mut committed, schema.table, id, Some(stored));
        obs_record("insert", schema.table, start, 1, true);
        Ok(id_value)
    }

    async fn update(
        &mut self,
        schema: &'static EntitySchema,
        id: Value,
        row: Row,
    ) -> OrmResult<u64> {
        let start = Instant::now();
        self.writable()?;
        let id = key_of(&id)?;
        let shared = Arc::clone(&self.shared);
        let mut committed = shared.state.write();
        if !committed.tables.contains_key(schema.table) {
            return Err(MemoryError::NoSuchTable(schema.table).into());
        }
        let visible = self.visible_rows(&committed, schema.table);
        if !visible.contains_key(&id) {
            obs_record("update", schema.table, start, 0, true);
            return Ok(0);
        }
        let stored = normalize(schema, id, &row);
        check_constraints(schema, id, &stored, &visible)?;
        self.put(&mut committed, schema.table, id, Some(stored));
        obs_record("update", schema.table, start, 1, true);
        Ok(1)
    }

    async fn delete(&mut self, schema: &'static EntitySchema, id: Value) -> OrmResult<u64> {
        let start = Instant::now();
        self.writable()?;
        let id = key_of(&id)?;
        let shared = Arc::clone(&self.shared);
        let mut committed = shared.state.write();
        if !committed.tables.contains_key(schema.table) {
            return Err(MemoryError::NoSuchTable(schema.table).into());
        }
        if !self.visible_rows(&committed, schema.table).contains_key(&id) {
            obs_record("delete", schema.table, start, 0, true);
            return Ok(0);
        }
        self.put(&mut committed, schema.table, id, None);
        obs_record("delete", schema.table, start, 1, true);
        Ok(1)
    }

    async fn select(
        &mut self,
        schema: &'static EntitySchema,
        filter: &Filter,
    ) -> OrmResult<Vec<Row>> {
        let start = Instant::now();
        let committed = self.shared.state.read();
        if !committed.tables.contains_key(schema.table) {
            return Err(MemoryError::NoSuchTable(schema.table).into());
        }
        let limit = filter.limit.unwrap_or(usize::MAX);
        let rows: Vec<Row> = self
            .visible_rows(&committed, schema.table)
            .into_values()
            .filter(|row| filter.matches(row))
            .take(limit)
            .collect();
        obs_record("select", schema.table, start, rows.len(), true);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txorm_core::{Entity, FindQuery};
    use txorm_macros::Entity;

    #[derive(Entity, Clone, Debug, PartialEq)]
    struct Tag {
        #[column(id)]
        id: Option<i64>,
        #[column(unique)]
        label: String,
    }

    fn tag_row(label: &str) -> Row {
        Tag {
            id: None,
            label: label.into(),
        }
        .to_row()
    }

    fn by_label(label: &str) -> Filter {
        FindQuery::new().eq("label", label).bind(Tag::SCHEMA).unwrap()
    }

    fn db() -> MemoryDatabase {
        MemoryDatabase::builder().table(Tag::SCHEMA).build()
    }

    #[tokio::test]
    async fn uncommitted_writes_are_private_to_the_session() {
        let db = db();
        let mut a = db.session().unwrap();
        let mut b = db.session().unwrap();
        a.begin(&TransactionDefinition::default()).await.unwrap();
        let id = a.insert(Tag::SCHEMA, tag_row("x")).await.unwrap();
        assert_eq!(id, Value::I64(1));

        assert_eq!(a.select(Tag::SCHEMA, &by_label("x")).await.unwrap().len(), 1);
        assert!(b.select(Tag::SCHEMA, &by_label("x")).await.unwrap().is_empty());

        a.commit().await.unwrap();
        assert_eq!(b.select(Tag::SCHEMA, &by_label("x")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_but_sequence_advances() {
        let db = db();
        let mut s = db.session().unwrap();
        s.begin(&TransactionDefinition::default()).await.unwrap();
        s.insert(Tag::SCHEMA, tag_row("gone")).await.unwrap();
        s.rollback().await.unwrap();
        assert_eq!(db.row_count("tags"), 0);

        s.begin(&TransactionDefinition::default()).await.unwrap();
        let id = s.insert(Tag::SCHEMA, tag_row("kept")).await.unwrap();
        s.commit().await.unwrap();
        assert_eq!(id, Value::I64(2));
        assert_eq!(db.row_count("tags"), 1);
    }

    #[tokio::test]
    async fn unique_violation_is_a_constraint_error() {
        let db = db();
        let mut s = db.session().unwrap();
        s.insert(Tag::SCHEMA, tag_row("dup")).await.unwrap();
        let err = s.insert(Tag::SCHEMA, tag_row("dup")).await.unwrap_err();
        assert!(matches!(err, OrmError::Constraint { ref column, .. } if column == "label"));
    }

    #[tokio::test]
    async fn conflicting_commits_fail_the_second_writer() {
        let db = db();
        let mut a = db.session().unwrap();
        let mut b = db.session().unwrap();
        a.begin(&TransactionDefinition::default()).await.unwrap();
        b.begin(&TransactionDefinition::default()).await.unwrap();
        a.insert(Tag::SCHEMA, tag_row("race")).await.unwrap();
        b.insert(Tag::SCHEMA, tag_row("race")).await.unwrap();
        a.commit().await.unwrap();
        let err = b.commit().await.unwrap_err();
        assert!(err.is_store());
        b.rollback().await.unwrap();
        assert_eq!(db.row_count("tags"), 1);
    }

    fn tag_row_with_id(id: i64, label: &str) -> Row {
        Tag {
            id: Some(id),
            label: label.into(),
        }
        .to_row()
    }

    #[tokio::test]
    async fn racing_inserts_of_one_identity_fail_the_second_commit() {
        let db = db();
        let mut a = db.session().unwrap();
        let mut b = db.session().unwrap();
        a.begin(&TransactionDefinition::default()).await.unwrap();
        b.begin(&TransactionDefinition::default()).await.unwrap();
        a.insert(Tag::SCHEMA, tag_row_with_id(7, "from-a")).await.unwrap();
        b.insert(Tag::SCHEMA, tag_row_with_id(7, "from-b")).await.unwrap();
        a.commit().await.unwrap();

        let err = b.commit().await.unwrap_err();
        assert!(matches!(err, OrmError::Constraint { ref column, .. } if column == "id"));
        let rows = b.select(Tag::SCHEMA, &by_label("from-a")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(b.select(Tag::SCHEMA, &by_label("from-b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_of_a_row_deleted_elsewhere_fails_to_commit() {
        let db = db();
        let mut setup = db.session().unwrap();
        let id = setup.insert(Tag::SCHEMA, tag_row("original")).await.unwrap();

        let mut a = db.session().unwrap();
        let mut b = db.session().unwrap();
        b.begin(&TransactionDefinition::default()).await.unwrap();
        assert_eq!(
            b.update(Tag::SCHEMA, id.clone(), tag_row("updated")).await.unwrap(),
            1
        );
        a.begin(&TransactionDefinition::default()).await.unwrap();
        assert_eq!(a.delete(Tag::SCHEMA, id).await.unwrap(), 1);
        a.commit().await.unwrap();

        let err = b.commit().await.unwrap_err();
        assert!(matches!(
            err,
            OrmError::Store { ref source } if source.to_string().contains("changed by another transaction")
        ));
        assert_eq!(db.row_count("tags"), 0);
    }

    #[tokio::test]
    async fn insert_then_delete_in_one_transaction_leaves_no_trace() {
        let db = db();
        let mut a = db.session().unwrap();
        let mut b = db.session().unwrap();
        a.begin(&TransactionDefinition::default()).await.unwrap();
        a.insert(Tag::SCHEMA, tag_row_with_id(3, "temp")).await.unwrap();
        assert_eq!(a.delete(Tag::SCHEMA, Value::I64(3)).await.unwrap(), 1);
        b.insert(Tag::SCHEMA, tag_row_with_id(3, "other")).await.unwrap();

        a.commit().await.unwrap();
        assert_eq!(b.select(Tag::SCHEMA, &by_label("other")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn largest_explicit_identity_does_not_overflow_the_sequence() {
        let db = db();
        let mut s = db.session().unwrap();
        let id = s
            .insert(Tag::SCHEMA, tag_row_with_id(i64::MAX, "last"))
            .await
            .unwrap();
        assert_eq!(id, Value::I64(i64::MAX));

        let err = s.insert(Tag::SCHEMA, tag_row("next")).await.unwrap_err();
        assert!(matches!(err, OrmError::Constraint { ref column, .. } if column == "id"));
        assert_eq!(db.row_count("tags"), 1);
    }

    #[tokio::test]
    async fn read_only_transactions_reject_writes() {
        let db = db();
        let mut s = db.session().unwrap();
        s.begin(&TransactionDefinition::read_only()).await.unwrap();
        let err = s.insert(Tag::SCHEMA, tag_row("ro")).await.unwrap_err();
        assert!(err.is_store());
    }

    #[tokio::test]
    async fn update_and_delete_report_affected_rows() {
        let db = db();
        let mut s = db.session().unwrap();
        let id = s.insert(Tag::SCHEMA, tag_row("a")).await.unwrap();
        assert_eq!(
            s.update(Tag::SCHEMA, id.clone(), tag_row("b")).await.unwrap(),
            1
        );
        assert_eq!(s.select(Tag::SCHEMA, &by_label("b")).await.unwrap().len(), 1);
        assert_eq!(
            s.update(Tag::SCHEMA, Value::I64(99), tag_row("c")).await.unwrap(),
            0
        );
        assert_eq!(s.delete(Tag::SCHEMA, id.clone()).await.unwrap(), 1);
        assert_eq!(s.delete(Tag::SCHEMA, id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_table_is_a_store_error() {
        let db = MemoryDatabase::new();
        let mut s = db.session().unwrap();
        let err = s.insert(Tag::SCHEMA, tag_row("x")).await.unwrap_err();
        assert!(err.is_store());
        assert!(s.select(Tag::SCHEMA, &by_label("x")).await.is_err());
    }

    #[tokio::test]
    async fn session_limit_and_release_accounting() {
        let db = MemoryDatabase::builder().max_sessions(1).build();
        let first = db.acquire().await.unwrap();
        let err = db.acquire().await.map(|_| ()).unwrap_err();
        assert!(matches!(err, OrmError::SessionAcquisition { .. }));
        first.release();
        assert_eq!(
            db.stats(),
            SessionStats {
                acquired: 1,
                released: 1,
                open: 0
            }
        );
        assert!(db.acquire().await.is_ok());
    }

    #[test]
    fn normalize_coerces_and_fills_missing_columns() {
        let mut row = Row::new();
        row.set("label", Value::from("n"));
        row.set("extra", Value::Bool(true));
        let out = normalize(Tag::SCHEMA, 4, &row);
        assert_eq!(out.get("id"), Some(&Value::I64(4)));
        assert_eq!(out.get("label"), Some(&Value::from("n")));
        assert!(out.get("extra").is_none());
    }
}
