//! SQLite-backed record store.
//!
//! Persists task records locally so they survive restarts and stay
//! available offline.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use tasksync_common::time::{self, Timestamp};
use tasksync_common::{Error, LocalId, OwnerId, RemoteId, Result, SyncState, TaskRecord};

use crate::notify::{ChangeCallback, Notifier, StoreEvent, Subscription, WriteOrigin};
use crate::record_store::{not_found, RecordStore, StoreTxn};

const SCHEMA_VERSION: &str = "1";

const SELECT_COLUMNS: &str = "SELECT local_id, remote_id, owner_id, title, description, \
     is_completed, created_at, updated_at, sync_state, failure_count, last_error FROM tasks";

/// Record store using a single SQLite database file.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
    notifier: Notifier,
}

impl SqliteRecordStore {
    /// Create or open a record database.
    ///
    /// # Arguments
    /// - `db_path`: Path to the SQLite database file
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path).map_err(store_err)?;
        let store = Self::init(conn)?;
        info!("Record store opened at {}", db_path.display());
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                local_id TEXT PRIMARY KEY,
                remote_id TEXT UNIQUE,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                is_completed INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                sync_state TEXT NOT NULL,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE TABLE IF NOT EXISTS store_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(owner_id, sync_state);
            "#,
        )
        .map_err(store_err)?;

        conn.execute(
            "INSERT OR IGNORE INTO store_metadata (key, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION],
        )
        .map_err(store_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            notifier: Notifier::new(),
        })
    }

    /// Read a metadata value.
    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM store_metadata WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()
        .map_err(store_err)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("record store lock poisoned".to_string()))
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<TaskRecord>> {
        let conn = self.lock()?;
        query_records(&conn, sql, params)
    }
}

fn cursor_key(owner_id: &OwnerId) -> String {
    format!("pull_cursor:{}", owner_id)
}

fn store_err(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(err.to_string())
        }
        _ => Error::Store(err.to_string()),
    }
}

/// Raw column values, converted outside the row callback.
struct TaskRow {
    local_id: String,
    remote_id: Option<String>,
    owner_id: String,
    title: String,
    description: Option<String>,
    is_completed: bool,
    created_at: i64,
    updated_at: i64,
    sync_state: String,
    failure_count: u32,
    last_error: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_id: row.get(0)?,
            remote_id: row.get(1)?,
            owner_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            is_completed: row.get::<_, i32>(5)? != 0,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            sync_state: row.get(8)?,
            failure_count: row.get(9)?,
            last_error: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord> {
        Ok(TaskRecord {
            local_id: LocalId::new(self.local_id)?,
            remote_id: self.remote_id.map(RemoteId::new).transpose()?,
            owner_id: OwnerId::new(self.owner_id)?,
            title: self.title,
            description: self.description,
            is_completed: self.is_completed,
            created_at: time::from_millis(self.created_at),
            updated_at: time::from_millis(self.updated_at),
            sync_state: self.sync_state.parse()?,
            failure_count: self.failure_count,
            last_error: self.last_error,
        })
    }
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<TaskRecord>> {
    let mut stmt = conn.prepare_cached(sql).map_err(store_err)?;
    let rows = stmt
        .query_map(params, TaskRow::from_row)
        .map_err(store_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_err)?;

    rows.into_iter().map(TaskRow::into_record).collect()
}

fn query_one(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<TaskRecord>> {
    Ok(query_records(conn, sql, params)?.into_iter().next())
}

struct SqliteTxn<'a> {
    tx: &'a rusqlite::Transaction<'a>,
    changed: Vec<LocalId>,
}

impl StoreTxn for SqliteTxn<'_> {
    fn get(&self, local_id: &LocalId) -> Result<Option<TaskRecord>> {
        query_one(
            self.tx,
            &format!("{} WHERE local_id = ?1", SELECT_COLUMNS),
            params![local_id.as_str()],
        )
    }

    fn get_by_remote_id(&self, remote_id: &RemoteId) -> Result<Option<TaskRecord>> {
        query_one(
            self.tx,
            &format!("{} WHERE remote_id = ?1", SELECT_COLUMNS),
            params![remote_id.as_str()],
        )
    }

    fn put(&mut self, record: &TaskRecord) -> Result<()> {
        debug!("Upserting task {}", record.local_id);
        self.tx
            .execute(
                r#"
                INSERT INTO tasks
                (local_id, remote_id, owner_id, title, description, is_completed,
                 created_at, updated_at, sync_state, failure_count, last_error)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(local_id) DO UPDATE SET
                    remote_id = excluded.remote_id,
                    title = excluded.title,
                    description = excluded.description,
                    is_completed = excluded.is_completed,
                    updated_at = excluded.updated_at,
                    sync_state = excluded.sync_state,
                    failure_count = excluded.failure_count,
                    last_error = excluded.last_error
                "#,
                params![
                    record.local_id.as_str(),
                    record.remote_id.as_ref().map(RemoteId::as_str),
                    record.owner_id.as_str(),
                    record.title,
                    record.description,
                    record.is_completed as i32,
                    record.created_at.timestamp_millis(),
                    record.updated_at.timestamp_millis(),
                    record.sync_state.as_str(),
                    record.failure_count,
                    record.last_error,
                ],
            )
            .map_err(store_err)?;

        self.changed.push(record.local_id.clone());
        Ok(())
    }

    fn delete(&mut self, local_id: &LocalId) -> Result<bool> {
        debug!("Deleting task {}", local_id);
        let removed = self
            .tx
            .execute("DELETE FROM tasks WHERE local_id = ?1", [local_id.as_str()])
            .map_err(store_err)?;

        self.changed.push(local_id.clone());
        Ok(removed > 0)
    }
}

impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn transaction(
        &self,
        origin: WriteOrigin,
        f: &mut dyn FnMut(&mut dyn StoreTxn) -> Result<()>,
    ) -> Result<()> {
        let changed = {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(store_err)?;

            let mut txn = SqliteTxn {
                tx: &tx,
                changed: Vec::new(),
            };
            f(&mut txn)?;
            let changed = txn.changed;

            // Dropping an uncommitted transaction rolls it back.
            tx.commit().map_err(store_err)?;
            changed
        };

        if !changed.is_empty() {
            self.notifier.notify(&StoreEvent { origin, changed });
        }
        Ok(())
    }

    fn get(&self, local_id: &LocalId) -> Result<TaskRecord> {
        let conn = self.lock()?;
        query_one(
            &conn,
            &format!("{} WHERE local_id = ?1", SELECT_COLUMNS),
            params![local_id.as_str()],
        )?
        .ok_or_else(|| not_found(local_id))
    }

    fn get_by_remote_id(&self, remote_id: &RemoteId) -> Result<TaskRecord> {
        let conn = self.lock()?;
        query_one(
            &conn,
            &format!("{} WHERE remote_id = ?1", SELECT_COLUMNS),
            params![remote_id.as_str()],
        )?
        .ok_or_else(|| not_found(remote_id))
    }

    fn list_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<TaskRecord>> {
        self.query(
            &format!(
                "{} WHERE owner_id = ?1 ORDER BY created_at DESC, local_id ASC",
                SELECT_COLUMNS
            ),
            params![owner_id.as_str()],
        )
    }

    fn subscribe(&self, callback: ChangeCallback) -> Subscription {
        self.notifier.subscribe(callback)
    }

    fn list_pending(&self, owner_id: &OwnerId) -> Result<Vec<TaskRecord>> {
        self.query(
            &format!(
                "{} WHERE owner_id = ?1 AND sync_state != ?2 ORDER BY created_at ASC, local_id ASC",
                SELECT_COLUMNS
            ),
            params![owner_id.as_str(), SyncState::Synced.as_str()],
        )
    }

    fn pull_cursor(&self, owner_id: &OwnerId) -> Result<Option<Timestamp>> {
        let Some(value) = self.metadata(&cursor_key(owner_id))? else {
            return Ok(None);
        };
        let millis: i64 = value
            .parse()
            .map_err(|_| Error::Store(format!("corrupt pull cursor: {}", value)))?;
        Ok(Some(time::from_millis(millis)))
    }

    fn set_pull_cursor(&self, owner_id: &OwnerId, cursor: Timestamp) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO store_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![cursor_key(owner_id), cursor.timestamp_millis().to_string()],
        )
        .map_err(store_err)?;
        debug!("Pull cursor for {} at {}", owner_id, cursor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tasksync_common::TaskPatch;
    use tempfile::TempDir;

    fn owner() -> OwnerId {
        OwnerId::new("owner-1").unwrap()
    }

    #[test]
    fn test_schema_version_recorded() {
        let store = SqliteRecordStore::in_memory().unwrap();
        assert_eq!(store.metadata("schema_version").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let mut record = TaskRecord::new_local(owner(), "Buy milk", Some("2 litres".into()));
        record.mark_failed(&Error::RemoteRejected("denied".into()));

        store.put(&record).unwrap();
        assert_eq!(store.get(&record.local_id).unwrap(), record);
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("tasks.db");
        let record = TaskRecord::new_local(owner(), "Buy milk", None);

        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store.put(&record).unwrap();
        }

        let store = SqliteRecordStore::open(&path).unwrap();
        assert_eq!(store.get(&record.local_id).unwrap(), record);
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let mut record = TaskRecord::new_local(owner(), "Buy milk", None);
        store.put(&record).unwrap();

        record.apply_patch(&TaskPatch::completed(true));
        store.put(&record).unwrap();

        let listed = store.list_by_owner(&owner()).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_completed);
    }

    #[test]
    fn test_remote_id_uniqueness_enforced() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let remote_id = RemoteId::new("r1").unwrap();

        let mut first = TaskRecord::new_local(owner(), "a", None);
        first.mark_synced(remote_id.clone(), first.updated_at);
        let mut second = TaskRecord::new_local(owner(), "b", None);
        second.mark_synced(remote_id.clone(), second.updated_at);

        store.put(&first).unwrap();
        assert!(matches!(store.put(&second), Err(Error::Conflict(_))));
        assert_eq!(
            store.get_by_remote_id(&remote_id).unwrap().local_id,
            first.local_id
        );
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let record = TaskRecord::new_local(owner(), "Buy milk", None);

        let result = store.transaction(WriteOrigin::Local, &mut |txn| {
            txn.put(&record)?;
            Err(Error::InvalidInput("abort".into()))
        });

        assert!(result.is_err());
        assert!(store.get(&record.local_id).is_err());
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let store = SqliteRecordStore::in_memory().unwrap();
        store.delete(&LocalId::generate()).unwrap();
    }

    #[test]
    fn test_notification_carries_origin() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let sync_events = Arc::new(AtomicUsize::new(0));
        let counter = sync_events.clone();
        let _subscription = store.subscribe(Arc::new(move |event| {
            if event.origin == WriteOrigin::Sync {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let record = TaskRecord::new_local(owner(), "Buy milk", None);
        store.put(&record).unwrap();
        store
            .transaction(WriteOrigin::Sync, &mut |txn| txn.put(&record))
            .unwrap();

        assert_eq!(sync_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_query() {
        let store = SqliteRecordStore::in_memory().unwrap();

        let pending = TaskRecord::new_local(owner(), "pending", None);
        let mut synced = TaskRecord::new_local(owner(), "synced", None);
        synced.mark_synced(RemoteId::new("r1").unwrap(), synced.updated_at);

        store.put(&pending).unwrap();
        store.put(&synced).unwrap();

        let pending_list = store.list_pending(&owner()).unwrap();
        assert_eq!(pending_list.len(), 1);
        assert_eq!(pending_list[0].local_id, pending.local_id);
    }

    #[test]
    fn test_pull_cursor_persists_per_owner() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.db");
        let cursor = time::now();

        {
            let store = SqliteRecordStore::open(&path).unwrap();
            assert_eq!(store.pull_cursor(&owner()).unwrap(), None);
            store.set_pull_cursor(&owner(), time::epoch()).unwrap();
            store.set_pull_cursor(&owner(), cursor).unwrap();
        }

        let store = SqliteRecordStore::open(&path).unwrap();
        assert_eq!(store.pull_cursor(&owner()).unwrap(), Some(cursor));
        let other = OwnerId::new("owner-2").unwrap();
        assert_eq!(store.pull_cursor(&other).unwrap(), None);
    }
}
