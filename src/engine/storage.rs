// Opaque persistence sink (§6 "Persistence contract", out of scope: SQL schema).
//
// A single writer that accepts a finalized transaction record and returns
// `(id, timestamp)` or an error; the core never issues queries. Also backs
// the generic config key-value pattern used to persist the proxy's own
// bind/port/interception settings and root CA material across restarts.
// Grounded on the teacher's session store (`engine/sessions/mod.rs`): WAL
// mode, a single writer lock, migrations run once at `open`.

use crate::atoms::error::{ProxyError, ProxyResult};
use crate::atoms::types::Transaction;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use uuid::Uuid;

pub struct StorageSink {
    conn: Mutex<Connection>,
}

impl StorageSink {
    pub fn open(path: impl AsRef<Path>) -> ProxyResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(StorageSink { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> ProxyResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(StorageSink { conn: Mutex::new(conn) })
    }

    /// Record a finalized transaction. Returns its id and the timestamp it
    /// was persisted at — distinct from `Transaction::created_at`.
    pub fn record_transaction(&self, tx: &Transaction) -> ProxyResult<(Uuid, DateTime<Utc>)> {
        let blob = serde_json::to_vec(tx)?;
        let persisted_at = Utc::now();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO transactions (id, created_at, persisted_at, record) VALUES (?1, ?2, ?3, ?4)",
            params![tx.id.to_string(), tx.created_at.to_rfc3339(), persisted_at.to_rfc3339(), blob],
        )?;
        Ok((tx.id, persisted_at))
    }

    pub fn get_transaction(&self, id: Uuid) -> ProxyResult<Option<Transaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT record FROM transactions WHERE id = ?1")?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => {
                let blob: Vec<u8> = row.get(0)?;
                Ok(Some(serde_json::from_slice(&blob)?))
            }
            None => Ok(None),
        }
    }

    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> ProxyResult<Option<T>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    pub fn set_config<T: serde::Serialize>(&self, key: &str, value: &T) -> ProxyResult<()> {
        let raw = serde_json::to_string(value)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, raw],
        )?;
        Ok(())
    }
}

fn run_migrations(conn: &Connection) -> ProxyResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            persisted_at TEXT NOT NULL,
            record BLOB NOT NULL
        );
        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
    .map_err(ProxyError::from)
}
