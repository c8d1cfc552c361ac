//! Local cache store (SQLite).
//!
//! Two tables back the replica:
//! - `calendar(path, sync_token)`: last committed sync token per collection
//! - `event_object(calendar_path, path, data)`: one serialized [`EventObject`] per resource
//!
//! A single connection sits behind an async mutex. A sync cycle holds it for
//! its whole transaction, so readers see either the state before a commit or
//! after it.

mod reader;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::error::{CalError, CalResult};
use crate::event::EventObject;

pub use reader::CachedEvents;

/// Bumped whenever the table layout or blob encoding changes; older caches are rebuilt.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS calendar (
        path TEXT PRIMARY KEY NOT NULL,
        sync_token TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS event_object (
        calendar_path TEXT NOT NULL,
        path TEXT NOT NULL,
        data BLOB NOT NULL,
        PRIMARY KEY (calendar_path, path)
    );
";

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the cache database at `path`.
    #[instrument]
    pub fn open(path: &Path) -> CalResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=10000;
            ",
        )?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn in_memory() -> CalResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(mut conn: Connection, path: Option<PathBuf>) -> CalResult<Self> {
        migrate(&mut conn)?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file, `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Start a write transaction. The store stays locked until the returned
    /// guard is committed or dropped (dropping rolls back).
    pub async fn begin(&self) -> CalResult<StoreTx> {
        let conn = Arc::clone(&self.conn).lock_owned().await;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(StoreTx {
            conn,
            finished: false,
        })
    }

    pub async fn sync_token(&self, calendar: &str) -> CalResult<Option<String>> {
        let conn = self.conn.lock().await;
        read_sync_token(&conn, calendar)
    }

    /// Paths of every cached object of a calendar, sorted.
    pub async fn cached_paths(&self, calendar: &str) -> CalResult<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT path FROM event_object WHERE calendar_path = ?1 ORDER BY path")?;
        let paths = stmt
            .query_map(params![calendar], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    /// Drop every sync token and cached object.
    #[instrument(skip(self))]
    pub async fn purge(&self) -> CalResult<()> {
        let mut tx = self.begin().await?;
        let objects = tx.conn.execute("DELETE FROM event_object", [])?;
        let calendars = tx.conn.execute("DELETE FROM calendar", [])?;
        tx.commit()?;
        info!(objects, calendars, "purged cache");
        Ok(())
    }

    /// Stream and decode every cached object of `calendar` on `workers` decode tasks.
    pub fn read_cached(&self, calendar: &str, workers: usize) -> CachedEvents {
        reader::spawn(Arc::clone(&self.conn), calendar.to_string(), workers)
    }
}

/// An open write transaction on the store.
pub struct StoreTx {
    conn: OwnedMutexGuard<Connection>,
    finished: bool,
}

impl StoreTx {
    pub fn sync_token(&self, calendar: &str) -> CalResult<Option<String>> {
        read_sync_token(&self.conn, calendar)
    }

    pub fn set_sync_token(&mut self, calendar: &str, token: &str) -> CalResult<()> {
        self.conn.execute(
            "INSERT INTO calendar (path, sync_token) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET sync_token = excluded.sync_token",
            params![calendar, token],
        )?;
        Ok(())
    }

    /// Returns whether a row was removed.
    pub fn delete_object(&mut self, calendar: &str, path: &str) -> CalResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM event_object WHERE calendar_path = ?1 AND path = ?2",
            params![calendar, path],
        )?;
        Ok(removed > 0)
    }

    pub fn put_object(&mut self, calendar: &str, path: &str, object: &EventObject) -> CalResult<()> {
        let data = encode_object(object)?;
        self.conn.execute(
            "INSERT INTO event_object (calendar_path, path, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(calendar_path, path) DO UPDATE SET data = excluded.data",
            params![calendar, path, data],
        )?;
        Ok(())
    }

    pub fn commit(mut self) -> CalResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> CalResult<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for StoreTx {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback of abandoned transaction failed");
            }
        }
    }
}

fn read_sync_token(conn: &Connection, calendar: &str) -> CalResult<Option<String>> {
    let token = conn
        .query_row(
            "SELECT sync_token FROM calendar WHERE path = ?1",
            params![calendar],
            |row| row.get(0),
        )
        .optional()?;
    Ok(token)
}

fn migrate(conn: &mut Connection) -> CalResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    if version != 0 {
        info!(from = version, to = SCHEMA_VERSION, "cache schema changed, rebuilding");
        tx.execute_batch("DROP TABLE IF EXISTS event_object; DROP TABLE IF EXISTS calendar;")?;
    }
    tx.execute_batch(SCHEMA)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    debug!(version = SCHEMA_VERSION, "cache schema ready");
    Ok(())
}

pub(crate) fn encode_object(object: &EventObject) -> CalResult<Vec<u8>> {
    Ok(serde_json::to_vec(object)?)
}

pub(crate) fn decode_object(path: &str, data: &[u8]) -> CalResult<EventObject> {
    serde_json::from_slice(data).map_err(|e| CalError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::fixtures::event;

    fn object(uid: &str, path: &str) -> EventObject {
        let mut object =
            EventObject::new(event(uid, "2024-01-01 10:00", "2024-01-01 11:00"), vec![]).unwrap();
        object.path = Some(path.to_string());
        object
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = Store::in_memory().unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.put_object("/cal/", "/cal/a.ics", &object("a", "/cal/a.ics")).unwrap();
        tx.set_sync_token("/cal/", "t1").unwrap();
        tx.commit().unwrap();

        assert_eq!(store.sync_token("/cal/").await.unwrap().as_deref(), Some("t1"));
        assert_eq!(store.cached_paths("/cal/").await.unwrap(), vec!["/cal/a.ics"]);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = Store::in_memory().unwrap();
        {
            let mut tx = store.begin().await.unwrap();
            tx.put_object("/cal/", "/cal/a.ics", &object("a", "/cal/a.ics")).unwrap();
            tx.set_sync_token("/cal/", "t1").unwrap();
        }

        assert_eq!(store.sync_token("/cal/").await.unwrap(), None);
        assert!(store.cached_paths("/cal/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_clears_everything() {
        let store = Store::in_memory().unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.put_object("/a/", "/a/1.ics", &object("1", "/a/1.ics")).unwrap();
        tx.put_object("/b/", "/b/2.ics", &object("2", "/b/2.ics")).unwrap();
        tx.set_sync_token("/a/", "t").unwrap();
        tx.commit().unwrap();

        store.purge().await.unwrap();
        assert!(store.cached_paths("/a/").await.unwrap().is_empty());
        assert!(store.cached_paths("/b/").await.unwrap().is_empty());
        assert_eq!(store.sync_token("/a/").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reopening_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        let store = Store::open(&path).unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.set_sync_token("/cal/", "persisted").unwrap();
        tx.commit().unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(
            reopened.sync_token("/cal/").await.unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[test]
    fn outdated_schema_is_rebuilt() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE calendar (path TEXT, legacy INTEGER);
             INSERT INTO calendar VALUES ('/cal/', 1);
             PRAGMA user_version = 99;",
        )
        .unwrap();

        migrate(&mut conn).unwrap();

        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert_eq!(read_sync_token(&conn, "/cal/").unwrap(), None);
    }

    #[test]
    fn corrupt_blob_is_a_decode_error() {
        let err = decode_object("/cal/x.ics", b"\x00not json").unwrap_err();
        assert!(matches!(err, CalError::Decode { ref path, .. } if path == "/cal/x.ics"));
    }
}
