//! SQLite backend for [`ResilientStore`](crate::store::ResilientStore)

use crate::config::BUSY_TIMEOUT_MS;
use crate::store::{Connection, Connector, SqlValue, StoreError};
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{params_from_iter, ErrorCode, ToSql};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::from(*v),
            SqlValue::Text(v) => ToSqlOutput::from(v.as_str()),
        })
    }
}

/// Lock contention is the SQLite analogue of a dropped server connection.
fn classify(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

/// Opens file-backed SQLite connections. Clone one per worker.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_millis(BUSY_TIMEOUT_MS),
        }
    }
}

impl Connector for SqliteConnector {
    type Conn = SqliteConnection;

    fn connect(&self) -> Result<SqliteConnection, StoreError> {
        let open = || -> rusqlite::Result<rusqlite::Connection> {
            let conn = rusqlite::Connection::open(&self.path)?;
            conn.busy_timeout(self.busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.pragma_update(None, "foreign_keys", true)?;
            Ok(conn)
        };

        let conn = open().map_err(|e| {
            StoreError::Connect(format!("{}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), "SQLite connection opened");

        Ok(SqliteConnection { conn })
    }
}

/// A connection that opens a transaction before the first statement; `commit` ends it.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    fn begin_if_needed(&mut self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN IMMEDIATE").map_err(classify)?;
        }
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, StoreError> {
        self.begin_if_needed()?;
        self.conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(classify)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError> {
        self.begin_if_needed()?;
        self.conn.execute_batch(sql).map_err(classify)
    }

    fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT").map_err(classify)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Inserted, ResilientStore, RetryPolicy};
    use tempfile::TempDir;

    const SCHEMA: &str = "CREATE TABLE bodies (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT);
         CREATE TABLE articles (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT,
             body INTEGER REFERENCES bodies(id), aid INTEGER);";

    fn open_store(dir: &TempDir) -> ResilientStore<SqliteConnector> {
        let connector = SqliteConnector::new(dir.path().join("wiki.db"));
        let mut store = ResilientStore::new(connector, RetryPolicy::default());
        store.execute(|conn| conn.execute_batch(SCHEMA)).unwrap();
        store.commit().unwrap();
        store
    }

    fn count(dir: &TempDir, table: &str) -> i64 {
        let conn = rusqlite::Connection::open(dir.path().join("wiki.db")).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn insert_generates_sequential_ids() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let a = store
            .insert("bodies", &[("body", "one".into())], Some("id"), false)
            .unwrap();
        let b = store
            .insert("bodies", &[("body", "two".into())], Some("id"), false)
            .unwrap();
        store.commit().unwrap();

        assert_eq!(a, Some(Inserted::Id(1)));
        assert_eq!(b, Some(Inserted::Id(2)));
        assert_eq!(count(&dir, "bodies"), 2);
    }

    #[test]
    fn uncommitted_writes_are_not_visible() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store
            .insert("bodies", &[("body", "pending".into())], Some("id"), false)
            .unwrap();
        assert_eq!(count(&dir, "bodies"), 0);

        store.commit().unwrap();
        assert_eq!(count(&dir, "bodies"), 1);
    }

    #[test]
    fn foreign_key_violation_is_database_error() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let err = store
            .insert(
                "articles",
                &[("title", "Orphan".into()), ("body", 99i64.into()), ("aid", 1i64.into())],
                Some("id"),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        let ignored = store
            .insert(
                "articles",
                &[("title", "Orphan".into()), ("body", 99i64.into()), ("aid", 1i64.into())],
                Some("id"),
                true,
            )
            .unwrap();
        assert_eq!(ignored, None);
    }

    #[test]
    fn unknown_table_is_database_error() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let err = store
            .insert("missing", &[("x", 1i64.into())], None, false)
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn connect_failure_is_not_transient() {
        let connector = SqliteConnector::new("/nonexistent/dir/wiki.db");
        let err = connector.connect().err().unwrap();
        assert!(matches!(err, StoreError::Connect(_)));
    }

    #[test]
    fn classify_busy_as_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(classify(busy).is_transient());

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(!classify(constraint).is_transient());
    }
}
