//! Retry-aware persistence over a single lazily established connection.
//!
//! [`ResilientStore`] owns at most one live [`Connection`], created through a
//! [`Connector`] on first use. Failures reported as [`StoreError::Transient`]
//! drop the connection, wait a fixed backoff and retry the whole operation; every
//! other failure surfaces immediately. [`ResilientStore::insert`] additionally
//! isolates per-statement database errors so a single bad record can be skipped.

use crate::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};
use std::fmt;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection dropped or temporarily unavailable; safe to reconnect and retry.
    #[error("transient connection failure: {0}")]
    Transient(String),

    /// Statement rejected by the database (constraint, syntax, type).
    #[error("database error: {0}")]
    Database(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Backend-neutral statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "{v:?}"),
        }
    }
}

pub trait Connection {
    /// Runs one parameterized statement, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, StoreError>;

    /// Runs raw SQL text, possibly containing several statements.
    fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError>;

    fn last_insert_id(&self) -> i64;

    fn commit(&mut self) -> Result<(), StoreError>;
}

/// Opens connections for a [`ResilientStore`]. One connector per worker.
pub trait Connector: Send {
    type Conn: Connection + Send;

    fn connect(&self) -> Result<Self::Conn, StoreError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first, before a transient error is surfaced.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Successful insert: the generated id if one was requested, else the affected row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    Id(i64),
    Rows(usize),
}

impl Inserted {
    pub fn id(self) -> Option<i64> {
        match self {
            Inserted::Id(id) => Some(id),
            Inserted::Rows(_) => None,
        }
    }
}

pub struct ResilientStore<C: Connector> {
    connector: C,
    conn: Option<C::Conn>,
    policy: RetryPolicy,
}

impl<C: Connector> ResilientStore<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self {
            connector,
            conn: None,
            policy,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn connection(&mut self) -> Result<&mut C::Conn, StoreError> {
        if self.conn.is_none() {
            debug!("Opening store connection");
            self.conn = Some(self.connector.connect()?);
        }
        // populated above
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Connect("connection unavailable".to_string()))
    }

    /// Runs `op` against the live connection, reconnecting on transient failures.
    ///
    /// `op` may run several times; it must not keep state between attempts.
    pub fn execute<T, F>(&mut self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut C::Conn) -> Result<T, StoreError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.connection().and_then(&mut op);

            match result {
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Connection lost, reconnecting"
                    );
                    self.conn = None;
                    thread::sleep(self.policy.delay);
                }
                Err(e) if e.is_transient() => {
                    error!(attempts = attempt, error = %e, "Retries exhausted");
                    self.conn = None;
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    /// Inserts one row into `table`.
    ///
    /// With `generated` set, the column is bound to `NULL` so the database assigns it
    /// and the new id is returned. A rejected statement is logged with every parameter
    /// and, when `ignore_errors` is set, reported as `Ok(None)`.
    pub fn insert(
        &mut self,
        table: &str,
        columns: &[(&str, SqlValue)],
        generated: Option<&str>,
        ignore_errors: bool,
    ) -> Result<Option<Inserted>, StoreError> {
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        let params: Vec<SqlValue> = columns.iter().map(|(_, value)| value.clone()).collect();
        let sql = build_insert(table, &names, generated);

        let result = self.execute(|conn| {
            let rows = conn.execute(&sql, &params)?;
            Ok(match generated {
                Some(_) => Inserted::Id(conn.last_insert_id()),
                None => Inserted::Rows(rows),
            })
        });

        match result {
            Ok(inserted) => Ok(Some(inserted)),
            Err(e @ StoreError::Database(_)) => {
                error!(
                    table,
                    columns = ?names,
                    values = %format_values(&params),
                    generated = ?generated,
                    ignore_errors,
                    error = %e,
                    "Insert failed"
                );
                if ignore_errors {
                    Ok(None)
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Executes the whole script as a single batch.
    pub fn run_script(&mut self, path: &Path) -> Result<(), StoreError> {
        let sql = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), bytes = sql.len(), "Running script");
        self.execute(|conn| conn.execute_batch(&sql))
    }

    pub fn commit(&mut self) -> Result<(), StoreError> {
        match self.conn.as_mut() {
            Some(conn) => conn.commit(),
            None => Ok(()),
        }
    }

    /// Commits pending writes and drops the connection.
    pub fn close(&mut self) -> Result<(), StoreError> {
        let result = self.commit();
        self.conn = None;
        result
    }
}

pub fn build_insert(table: &str, columns: &[&str], generated: Option<&str>) -> String {
    let mut names: Vec<&str> = columns.to_vec();
    let mut placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();

    if let Some(column) = generated {
        names.push(column);
        placeholders.push("NULL".to_string());
    }

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        names.join(", "),
        placeholders.join(", ")
    )
}

fn format_values(values: &[SqlValue]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connection with scripted failures.

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct Shared {
        pub connects: AtomicU32,
        pub transient_failures: AtomicU32,
        pub statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
        pub commits: AtomicU32,
        pub reject_tables: Mutex<Vec<String>>,
    }

    #[derive(Clone, Default)]
    pub struct FakeConnector {
        pub shared: Arc<Shared>,
    }

    impl FakeConnector {
        pub fn failing(transient_failures: u32) -> Self {
            let connector = Self::default();
            connector
                .shared
                .transient_failures
                .store(transient_failures, Ordering::SeqCst);
            connector
        }

        pub fn reject_table(&self, table: &str) {
            self.shared
                .reject_tables
                .lock()
                .unwrap()
                .push(table.to_string());
        }

        pub fn connects(&self) -> u32 {
            self.shared.connects.load(Ordering::SeqCst)
        }

        pub fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
            self.shared.statements.lock().unwrap().clone()
        }
    }

    pub struct FakeConnection {
        shared: Arc<Shared>,
        last_id: i64,
    }

    impl Connector for FakeConnector {
        type Conn = FakeConnection;

        fn connect(&self) -> Result<FakeConnection, StoreError> {
            self.shared.connects.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConnection {
                shared: Arc::clone(&self.shared),
                last_id: 0,
            })
        }
    }

    impl Connection for FakeConnection {
        fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, StoreError> {
            let remaining = self.shared.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.shared
                    .transient_failures
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Transient("server has gone away".to_string()));
            }

            let rejected = self
                .shared
                .reject_tables
                .lock()
                .unwrap()
                .iter()
                .any(|t| sql.starts_with(&format!("INSERT INTO {t} ")));
            if rejected {
                return Err(StoreError::Database("constraint failed".to_string()));
            }

            let mut statements = self.shared.statements.lock().unwrap();
            statements.push((sql.to_string(), params.to_vec()));
            self.last_id = statements.len() as i64;
            Ok(1)
        }

        fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError> {
            self.execute(sql, &[]).map(|_| ())
        }

        fn last_insert_id(&self) -> i64 {
            self.last_id
        }

        fn commit(&mut self) -> Result<(), StoreError> {
            self.shared.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{fast_policy, FakeConnector};
    use super::*;
    use std::io::Write;
    use std::sync::atomic::Ordering;

    #[test]
    fn build_insert_with_generated_column() {
        let sql = build_insert("articles", &["title", "body", "aid"], Some("id"));
        assert_eq!(
            sql,
            "INSERT INTO articles (title, body, aid, id) VALUES (?1, ?2, ?3, NULL)"
        );
    }

    #[test]
    fn build_insert_without_generated_column() {
        let sql = build_insert("bodies", &["body"], None);
        assert_eq!(sql, "INSERT INTO bodies (body) VALUES (?1)");
    }

    #[test]
    fn connection_is_lazy() {
        let connector = FakeConnector::default();
        let mut store = ResilientStore::new(connector.clone(), fast_policy(3));
        assert!(!store.is_connected());
        assert_eq!(connector.connects(), 0);

        store.commit().unwrap();
        assert_eq!(connector.connects(), 0);
        assert_eq!(connector.shared.commits.load(Ordering::SeqCst), 0);

        store.execute(|conn| conn.execute("SELECT 1", &[])).unwrap();
        assert!(store.is_connected());
        assert_eq!(connector.connects(), 1);
    }

    #[test]
    fn execute_retries_transient_failures() {
        for k in 0..3u32 {
            let connector = FakeConnector::failing(k);
            let mut store = ResilientStore::new(connector.clone(), fast_policy(4));

            let rows = store.execute(|conn| conn.execute("SELECT 1", &[])).unwrap();

            assert_eq!(rows, 1);
            // initial connect plus one reconnect per failure
            assert_eq!(connector.connects(), 1 + k);
            assert_eq!(connector.statements().len(), 1);
        }
    }

    #[test]
    fn execute_surfaces_transient_error_when_attempts_exhausted() {
        let connector = FakeConnector::failing(3);
        let mut store = ResilientStore::new(connector.clone(), fast_policy(3));

        let err = store
            .execute(|conn| conn.execute("SELECT 1", &[]))
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(connector.connects(), 3);
        assert!(connector.statements().is_empty());
        assert!(!store.is_connected());
    }

    #[test]
    fn execute_does_not_retry_other_errors() {
        let connector = FakeConnector::default();
        let mut store = ResilientStore::new(connector.clone(), fast_policy(5));
        let mut calls = 0;

        let err = store
            .execute(|_| -> Result<(), StoreError> {
                calls += 1;
                Err(StoreError::Database("syntax error".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(calls, 1);
        assert_eq!(connector.connects(), 1);
    }

    #[test]
    fn insert_returns_generated_id() {
        let connector = FakeConnector::default();
        let mut store = ResilientStore::new(connector.clone(), fast_policy(3));

        let first = store
            .insert("bodies", &[("body", "text".into())], Some("id"), false)
            .unwrap();
        let second = store
            .insert("bodies", &[("body", "more".into())], Some("id"), false)
            .unwrap();

        assert_eq!(first, Some(Inserted::Id(1)));
        assert_eq!(second.and_then(Inserted::id), Some(2));

        let statements = connector.statements();
        assert_eq!(statements[0].0, "INSERT INTO bodies (body, id) VALUES (?1, NULL)");
        assert_eq!(statements[0].1, vec![SqlValue::Text("text".to_string())]);
    }

    #[test]
    fn insert_returns_row_count_without_generated_column() {
        let mut store = ResilientStore::new(FakeConnector::default(), fast_policy(3));
        let result = store
            .insert("articles", &[("title", "A".into()), ("aid", 1i64.into())], None, false)
            .unwrap();
        assert_eq!(result, Some(Inserted::Rows(1)));
    }

    #[test]
    fn insert_ignore_errors_suppresses_database_error() {
        let connector = FakeConnector::default();
        connector.reject_table("bodies");
        let mut store = ResilientStore::new(connector, fast_policy(3));

        let result = store
            .insert("bodies", &[("body", "x".into())], Some("id"), true)
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn insert_propagates_database_error_when_not_ignored() {
        let connector = FakeConnector::default();
        connector.reject_table("bodies");
        let mut store = ResilientStore::new(connector, fast_policy(3));

        let err = store
            .insert("bodies", &[("body", "x".into())], Some("id"), false)
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn insert_never_suppresses_exhausted_transient_error() {
        let connector = FakeConnector::failing(10);
        let mut store = ResilientStore::new(connector, fast_policy(2));

        let err = store
            .insert("bodies", &[("body", "x".into())], Some("id"), true)
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn insert_retries_then_succeeds() {
        let connector = FakeConnector::failing(1);
        let mut store = ResilientStore::new(connector.clone(), fast_policy(3));

        let result = store
            .insert("bodies", &[("body", "x".into())], Some("id"), true)
            .unwrap();
        assert_eq!(result, Some(Inserted::Id(1)));
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn run_script_executes_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "CREATE TABLE t (x INTEGER);").unwrap();

        let connector = FakeConnector::default();
        let mut store = ResilientStore::new(connector.clone(), fast_policy(3));
        store.run_script(file.path()).unwrap();

        assert_eq!(connector.statements()[0].0, "CREATE TABLE t (x INTEGER);");
    }

    #[test]
    fn run_script_missing_file_is_io_error() {
        let mut store = ResilientStore::new(FakeConnector::default(), fast_policy(3));
        let err = store
            .run_script(Path::new("/nonexistent/init.sql"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn close_commits_and_disconnects() {
        let connector = FakeConnector::default();
        let mut store = ResilientStore::new(connector.clone(), fast_policy(3));
        store.execute(|conn| conn.execute("SELECT 1", &[])).unwrap();

        store.close().unwrap();
        assert!(!store.is_connected());
        assert_eq!(connector.shared.commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sql_value_display() {
        assert_eq!(SqlValue::Null.to_string(), "NULL");
        assert_eq!(SqlValue::Integer(3).to_string(), "3");
        assert_eq!(SqlValue::from("a\"b").to_string(), "\"a\\\"b\"");
    }
}
