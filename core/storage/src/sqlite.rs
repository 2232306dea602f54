//! SQLite-backed local cache store.
//!
//! Persists entity records, the pending-photo queue and meta values so
//! offline edits survive process restarts.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

use spotsync_common::{EntityFamily, EntityId, Error, Result, SyncStatus};

use crate::store::{LocalStore, PendingPhoto, RecordPredicate, StoredRecord, NEXT_LOCAL_SEQ_KEY};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    family TEXT NOT NULL,
    id INTEGER NOT NULL,
    sync_status TEXT NOT NULL,
    locally_modified_at TEXT,
    data TEXT NOT NULL,
    PRIMARY KEY (family, id)
);

CREATE INDEX IF NOT EXISTS idx_records_status ON records(family, sync_status);

CREATE TABLE IF NOT EXISTS pending_photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    file_path TEXT NOT NULL,
    is_main INTEGER NOT NULL,
    queued_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

fn storage_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Serialization(format!("Invalid timestamp {}: {}", raw, e)))
}

/// Raw row before JSON and timestamp decoding.
struct RawRecord {
    family: String,
    id: i64,
    sync_status: String,
    locally_modified_at: Option<String>,
    data: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            family: row.get(0)?,
            id: row.get(1)?,
            sync_status: row.get(2)?,
            locally_modified_at: row.get(3)?,
            data: row.get(4)?,
        })
    }

    fn decode(self) -> Result<StoredRecord> {
        Ok(StoredRecord {
            family: self.family.parse()?,
            id: EntityId::from(self.id),
            sync_status: self.sync_status.parse()?,
            locally_modified_at: self
                .locally_modified_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            data: serde_json::from_str(&self.data)?,
        })
    }
}

const RECORD_COLUMNS: &str = "family, id, sync_status, locally_modified_at, data";

/// Server ids descending, then temporary ids (stored as `-seq`) newest first.
/// Matches `EntityId::recency_key`.
const NEWEST_FIRST: &str = "ORDER BY id < 0, ABS(id) DESC";

/// Local cache store using SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    revision: watch::Sender<u64>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Parent directory cannot be created
    /// - Database creation or schema initialization failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening local store at {}", path.display());
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(storage_err)?;
        Self::init(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        let (revision, _) = watch::channel(0);
        Ok(Self {
            conn: Mutex::new(conn),
            revision,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("Connection lock poisoned".to_string()))
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn query_records(&self, family: EntityFamily) -> Result<Vec<StoredRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM records WHERE family = ?1 {}",
                RECORD_COLUMNS, NEWEST_FIRST
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([family.as_str()], RawRecord::from_row)
            .map_err(storage_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(storage_err)?.decode()?);
        }
        Ok(records)
    }

    fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, i64, String, bool, String)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get::<_, i32>(3)? != 0,
            row.get(4)?,
        ))
    }
}

impl LocalStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn upsert(&self, record: &StoredRecord) -> Result<()> {
        debug!("Upserting {} {} as {}", record.family, record.id, record.sync_status);
        let data = serde_json::to_string(&record.data)?;
        self.conn()?
            .execute(
                r#"
                INSERT OR REPLACE INTO records
                (family, id, sync_status, locally_modified_at, data)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.family.as_str(),
                    record.id.as_i64(),
                    record.sync_status.as_str(),
                    record.locally_modified_at.map(|t| t.to_rfc3339()),
                    data,
                ],
            )
            .map_err(storage_err)?;
        self.bump();
        Ok(())
    }

    fn get(&self, family: EntityFamily, id: EntityId) -> Result<Option<StoredRecord>> {
        let raw = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM records WHERE family = ?1 AND id = ?2",
                    RECORD_COLUMNS
                ),
                params![family.as_str(), id.as_i64()],
                RawRecord::from_row,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(RawRecord::decode).transpose()
    }

    fn delete(&self, family: EntityFamily, id: EntityId) -> Result<bool> {
        debug!("Deleting {} {}", family, id);
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM records WHERE family = ?1 AND id = ?2",
                params![family.as_str(), id.as_i64()],
            )
            .map_err(storage_err)?;
        if removed > 0 {
            self.bump();
        }
        Ok(removed > 0)
    }

    fn list_filtered(
        &self,
        family: EntityFamily,
        predicate: RecordPredicate<'_>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredRecord>> {
        Ok(self
            .query_records(family)?
            .into_iter()
            .filter(|r| predicate(r))
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn count(&self, family: EntityFamily, predicate: RecordPredicate<'_>) -> Result<usize> {
        Ok(self
            .query_records(family)?
            .iter()
            .filter(|r| predicate(r))
            .count())
    }

    fn list_by_status(&self, family: EntityFamily, status: SyncStatus) -> Result<Vec<StoredRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM records WHERE family = ?1 AND sync_status = ?2 {}",
                RECORD_COLUMNS, NEWEST_FIRST
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![family.as_str(), status.as_str()], RawRecord::from_row)
            .map_err(storage_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(storage_err)?.decode()?);
        }
        Ok(records)
    }

    fn list_pending_ids(&self, family: EntityFamily) -> Result<Vec<EntityId>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id FROM records WHERE family = ?1 AND sync_status != ?2 {}",
                NEWEST_FIRST
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(
                params![family.as_str(), SyncStatus::Synced.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(storage_err)?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(EntityId::from(row.map_err(storage_err)?));
        }
        Ok(ids)
    }

    fn count_pending(&self, family: EntityFamily) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM records WHERE family = ?1 AND sync_status != ?2",
                params![family.as_str(), SyncStatus::Synced.as_str()],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count as usize)
    }

    fn next_local_seq(&self) -> Result<u64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage_err)?;
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                [NEXT_LOCAL_SEQ_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let seq = match current {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                Error::Serialization(format!("Invalid {}: {}", NEXT_LOCAL_SEQ_KEY, e))
            })?,
            None => 1,
        };
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![NEXT_LOCAL_SEQ_KEY, (seq + 1).to_string()],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
        Ok(seq)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .map_err(storage_err)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn enqueue_photo(&self, owner_id: EntityId, file_path: PathBuf, is_main: bool) -> Result<PendingPhoto> {
        let queued_at = Utc::now();
        let id = {
            let conn = self.conn()?;
            conn.execute(
                r#"
                INSERT INTO pending_photos (owner_id, file_path, is_main, queued_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    owner_id.as_i64(),
                    file_path.to_string_lossy().into_owned(),
                    is_main as i32,
                    queued_at.to_rfc3339(),
                ],
            )
            .map_err(storage_err)?;
            conn.last_insert_rowid()
        };
        self.bump();
        debug!("Queued photo {} for spot {}", file_path.display(), owner_id);
        Ok(PendingPhoto {
            id,
            owner_id,
            file_path,
            is_main,
            queued_at,
        })
    }

    fn list_photos(&self) -> Result<Vec<PendingPhoto>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, owner_id, file_path, is_main, queued_at FROM pending_photos ORDER BY id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], Self::photo_from_row)
            .map_err(storage_err)?;

        let mut photos = Vec::new();
        for row in rows {
            let (id, owner_id, file_path, is_main, queued_at) = row.map_err(storage_err)?;
            photos.push(PendingPhoto {
                id,
                owner_id: EntityId::from(owner_id),
                file_path: PathBuf::from(file_path),
                is_main,
                queued_at: parse_timestamp(&queued_at)?,
            });
        }
        Ok(photos)
    }

    fn remove_photo(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM pending_photos WHERE id = ?1", [id])
            .map_err(storage_err)?;
        if removed > 0 {
            self.bump();
        }
        Ok(removed > 0)
    }

    fn reassign_photo_owner(&self, from: EntityId, to: EntityId) -> Result<usize> {
        let moved = self
            .conn()?
            .execute(
                "UPDATE pending_photos SET owner_id = ?2 WHERE owner_id = ?1",
                params![from.as_i64(), to.as_i64()],
            )
            .map_err(storage_err)?;
        if moved > 0 {
            self.bump();
        }
        Ok(moved)
    }

    fn count_photos(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM pending_photos", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count as usize)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
