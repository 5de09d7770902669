#![forbid(unsafe_code)]
#![cfg_attr(
    not(feature = "libsql-backend"),
    doc = "Enable feature `libsql-backend` to use this backing store."
)]
#![cfg_attr(
    feature = "libsql-backend",
    doc = "LibSQL/SQLite backing store: one connection per storage session."
)]

mod constraint;

#[cfg(feature = "libsql-backend")]
mod backend {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Instant;

    use async_trait::async_trait;
    use libsql::{Connection, Database};
    use tokio::sync::{OwnedSemaphorePermit, Semaphore};
    use txorm_core::transactions::Isolation;
    use txorm_core::{
        ConversionError, EntitySchema, FieldDef, Filter, OrmError, OrmResult, Row,
        SessionSource, StorageSession, TransactionDefinition, Value, ValueKind,
    };

    use crate::constraint::parse_constraint;

    #[cfg(feature = "tracing")]
    use tracing::info;

    #[inline]
    #[allow(unused_variables)]
    fn obs_record(op: &str, table: &str, start: Instant, rows: usize, success: bool) {
        let elapsed = start.elapsed().as_millis() as u64;
        #[cfg(feature = "tracing")]
        {
            info!(
                sql_kind = "sql",
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

    /// Busy timeout applied when the transaction definition carries none.
    const DEFAULT_BUSY_TIMEOUT_MS: i64 = 1000;

    fn begin_sql(isolation: Isolation) -> &'static str {
        match isolation {
            Isolation::Default | Isolation::ReadCommitted => "BEGIN DEFERRED",
            Isolation::RepeatableRead => "BEGIN IMMEDIATE",
            Isolation::Serializable => "BEGIN EXCLUSIVE",
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("all {max} sessions are in use")]
    struct SessionLimit {
        max: usize,
    }

    fn to_libsql_value(v: Value) -> libsql::Value {
        match v {
            Value::String(s) => libsql::Value::Text(s),
            Value::I32(i) => libsql::Value::Integer(i64::from(i)),
            Value::I64(i) => libsql::Value::Integer(i),
            Value::F64(f) => libsql::Value::Real(f),
            // SQLite bools are 0/1
            Value::Bool(b) => libsql::Value::Integer(i64::from(b)),
            Value::Null => libsql::Value::Null,
        }
    }

    fn libsql_kind(v: &libsql::Value) -> ValueKind {
        match v {
            libsql::Value::Null => ValueKind::Null,
            libsql::Value::Integer(_) => ValueKind::I64,
            libsql::Value::Real(_) => ValueKind::F64,
            // No blob kind exists; only used for error reporting.
            libsql::Value::Text(_) | libsql::Value::Blob(_) => ValueKind::String,
        }
    }

    /// Map a stored value onto the semantic type of `field`.
    fn from_libsql_value(field: &'static FieldDef, v: libsql::Value) -> OrmResult<Value> {
        let found = libsql_kind(&v);
        let decoded = match (v, field.kind) {
            (libsql::Value::Null, _) => Some(Value::Null),
            (libsql::Value::Integer(i), ValueKind::F64) => Some(Value::F64(i as f64)),
            (libsql::Value::Integer(i), kind) => Value::I64(i).coerce(kind),
            (libsql::Value::Real(f), ValueKind::F64) => Some(Value::F64(f)),
            (libsql::Value::Text(s), ValueKind::String) => Some(Value::String(s)),
            _ => None,
        };
        decoded.ok_or_else(|| OrmError::Mapping {
            column: field.column,
            source: Box::new(ConversionError {
                expected: field.kind,
                found,
            }),
        })
    }

    fn write_error(e: libsql::Error) -> OrmError {
        match parse_constraint(&e.to_string()) {
            Some(c) => OrmError::Constraint {
                table: c.table,
                column: c.column,
                message: c.message.to_string(),
            },
            None => OrmError::store(e),
        }
    }

    /// Hands out one libsql connection per session.
    #[derive(Clone)]
    pub struct LibsqlSessionSource {
        db: Arc<Database>,
        limit: Option<(usize, Arc<Semaphore>)>,
    }

    impl std::fmt::Debug for LibsqlSessionSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LibsqlSessionSource")
                .field("max_sessions", &self.limit.as_ref().map(|(max, _)| *max))
                .finish_non_exhaustive()
        }
    }

    impl LibsqlSessionSource {
        pub fn new(db: Database) -> Self {
            Self::from_arc(Arc::new(db))
        }

        pub fn from_arc(db: Arc<Database>) -> Self {
            Self { db, limit: None }
        }

        /// Open (or create) a local database file.
        pub async fn open_local(path: impl AsRef<Path>) -> OrmResult<Self> {
            let db = libsql::Builder::new_local(path.as_ref())
                .build()
                .await
                .map_err(OrmError::store)?;
            Ok(Self::new(db))
        }

        /// Cap on concurrently open sessions; `acquire` fails beyond it.
        pub fn with_max_sessions(mut self, n: usize) -> Self {
            self.limit = Some((n, Arc::new(Semaphore::new(n))));
            self
        }

        pub fn database(&self) -> &Arc<Database> {
            &self.db
        }

        /// Create any missing tables for `schemas`.
        pub async fn synchronize(&self, schemas: &[&'static EntitySchema]) -> OrmResult<()> {
            let conn = self.db.connect().map_err(OrmError::store)?;
            for schema in schemas {
                let start = Instant::now();
                let sql = txorm_sql_builder::create_table(schema);
                let res = conn.execute(&sql, ()).await;
                obs_record("create_table", schema.table, start, 0, res.is_ok());
                res.map_err(OrmError::store)?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SessionSource for LibsqlSessionSource {
        async fn acquire(&self) -> OrmResult<Box<dyn StorageSession>> {
            let permit = match &self.limit {
                Some((max, semaphore)) => Some(
                    semaphore
                        .clone()
                        .try_acquire_owned()
                        .map_err(|_| OrmError::acquisition(SessionLimit { max: *max }))?,
                ),
                None => None,
            };
            let conn = self.db.connect().map_err(OrmError::acquisition)?;
            Ok(Box::new(LibsqlSession {
                conn,
                in_tx: false,
                read_only: false,
                _permit: permit,
            }))
        }
    }

    /// A storage session over a single libsql connection.
    ///
    /// Closing the connection with a transaction still open makes SQLite roll it back,
    /// so dropping an unreleased session never leaks uncommitted writes.
    pub struct LibsqlSession {
        conn: Connection,
        in_tx: bool,
        read_only: bool,
        _permit: Option<OwnedSemaphorePermit>,
    }

    impl LibsqlSession {
        async fn finish(&mut self, sql: &'static str) -> OrmResult<()> {
            let start = Instant::now();
            let res = self.conn.execute(sql, ()).await;
            obs_record(sql, "*", start, 0, res.is_ok());
            // A failed COMMIT can leave the transaction open for a following ROLLBACK.
            if res.is_ok() || sql == "ROLLBACK" {
                self.in_tx = false;
                if self.read_only {
                    self.conn.execute("PRAGMA query_only = OFF", ()).await.ok();
                    self.read_only = false;
                }
            }
            res.map(|_| ()).map_err(write_error)
        }
    }

    #[async_trait]
    impl StorageSession for LibsqlSession {
        async fn begin(&mut self, def: &TransactionDefinition) -> OrmResult<()> {
            if def.read_only {
                self.conn
                    .execute("PRAGMA query_only = ON", ())
                    .await
                    .map_err(OrmError::store)?;
                self.read_only = true;
            }
            let busy_ms = def
                .timeout
                .map(|d| d.as_millis() as i64)
                .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);
            // busy_timeout echoes the new value back as a row.
            self.conn
                .query(&format!("PRAGMA busy_timeout = {busy_ms}"), ())
                .await
                .map_err(OrmError::store)?;
            self.conn
                .execute(begin_sql(def.isolation), ())
                .await
                .map_err(OrmError::store)?;
            self.in_tx = true;
            Ok(())
        }

        async fn commit(&mut self) -> OrmResult<()> {
            self.finish("COMMIT").await
        }

        async fn rollback(&mut self) -> OrmResult<()> {
            if !self.in_tx {
                return Ok(());
            }
            self.finish("ROLLBACK").await
        }

        fn release(self: Box<Self>) {
            // Dropping the connection closes it; the permit returns to the semaphore.
        }

        async fn insert(&mut self, schema: &'static EntitySchema, row: Row) -> OrmResult<Value> {
            let start = Instant::now();
            let identity = schema.identity();
            let explicit = row
                .get(identity.column)
                .filter(|v| !v.is_null())
                .cloned();
            let fields: Vec<&'static FieldDef> = schema
                .fields
                .iter()
                .filter(|f| explicit.is_some() || !f.identity)
                .collect();
            let columns: Vec<&str> = fields.iter().map(|f| f.column).collect();
            let params: Vec<libsql::Value> = fields
                .iter()
                .map(|f| to_libsql_value(row.get(f.column).cloned().unwrap_or(Value::Null)))
                .collect();
            let sql = txorm_sql_builder::insert(schema, &columns);

            if let Err(e) = self.conn.execute(&sql, params).await {
                obs_record("insert", schema.table, start, 0, false);
                return Err(write_error(e));
            }
            obs_record("insert", schema.table, start, 1, true);

            let id = explicit.unwrap_or(Value::I64(self.conn.last_insert_rowid()));
            let found = id.kind();
            id.coerce(identity.kind).ok_or_else(|| OrmError::Mapping {
                column: identity.column,
                source: Box::new(ConversionError {
                    expected: identity.kind,
                    found,
                }),
            })
        }

        async fn update(
            &mut self,
            schema: &'static EntitySchema,
            id: Value,
            row: Row,
        ) -> OrmResult<u64> {
            let start = Instant::now();
            let fields: Vec<&'static FieldDef> =
                schema.fields.iter().filter(|f| !f.identity).collect();
            let columns: Vec<&str> = fields.iter().map(|f| f.column).collect();
            let mut params: Vec<libsql::Value> = fields
                .iter()
                .map(|f| to_libsql_value(row.get(f.column).cloned().unwrap_or(Value::Null)))
                .collect();
            params.push(to_libsql_value(id));
            let sql = txorm_sql_builder::update_by_id(schema, &columns);
            match self.conn.execute(&sql, params).await {
                Ok(n) => {
                    obs_record("update", schema.table, start, n as usize, true);
                    Ok(n)
                }
                Err(e) => {
                    obs_record("update", schema.table, start, 0, false);
                    Err(write_error(e))
                }
            }
        }

        async fn delete(&mut self, schema: &'static EntitySchema, id: Value) -> OrmResult<u64> {
            let start = Instant::now();
            let sql = txorm_sql_builder::delete_by_id(schema);
            let res = self.conn.execute(&sql, vec![to_libsql_value(id)]).await;
            obs_record(
                "delete",
                schema.table,
                start,
                *res.as_ref().unwrap_or(&0) as usize,
                res.is_ok(),
            );
            res.map_err(write_error)
        }

        async fn select(
            &mut self,
            schema: &'static EntitySchema,
            filter: &Filter,
        ) -> OrmResult<Vec<Row>> {
            let start = Instant::now();
            let (sql, params) = txorm_sql_builder::select_filtered(schema, filter);
            let params: Vec<libsql::Value> = params.into_iter().map(to_libsql_value).collect();
            let mut rows = match self.conn.query(&sql, params).await {
                Ok(rows) => rows,
                Err(e) => {
                    obs_record("select", schema.table, start, 0, false);
                    return Err(OrmError::store(e));
                }
            };
            let mut out = Vec::new();
            while let Some(r) = rows.next().await.map_err(OrmError::store)? {
                let mut row = Row::with_capacity(schema.fields.len());
                for (idx, field) in schema.fields.iter().enumerate() {
                    let raw = r.get_value(idx as i32).map_err(OrmError::store)?;
                    row.set(field.column, from_libsql_value(field, raw)?);
                }
                out.push(row);
            }
            obs_record("select", schema.table, start, out.len(), true);
            Ok(out)
        }
    }

}

#[cfg(feature = "libsql-backend")]
pub use backend::{LibsqlSession, LibsqlSessionSource};
