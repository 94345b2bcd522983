//! SQLite engine.
//!
//! Each table stores the AWARE base columns plus the full record as JSON,
//! and a `synced` flag used by [`Engine::start_sync`].

use crate::model::MessageData;
use crate::storage::{validate_table, Engine, StorageError};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub struct SqliteEngine {
    conn: Option<Connection>,
    path: PathBuf,
    host: Option<String>,
    tables: HashSet<String>,
}

impl SqliteEngine {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl Into<PathBuf>, host: Option<String>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        Ok(Self {
            conn: Some(conn),
            path,
            host,
            tables: HashSet::new(),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: Some(Connection::open_in_memory()?),
            path: PathBuf::from(":memory:"),
            host: None,
            tables: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in `table` not yet uploaded.
    pub fn pending_count(&mut self, table: &str) -> Result<usize, StorageError> {
        self.ensure_table(table)?;
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{table}\" WHERE synced = 0"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn conn(&self) -> Result<&Connection, StorageError> {
        self.conn.as_ref().ok_or(StorageError::Closed)
    }

    fn ensure_table(&mut self, table: &str) -> Result<(), StorageError> {
        validate_table(table)?;
        if self.tables.contains(table) {
            return Ok(());
        }
        self.conn()?.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                device_id TEXT NOT NULL,
                label TEXT NOT NULL,
                timezone INTEGER NOT NULL,
                os TEXT NOT NULL,
                json_version INTEGER NOT NULL,
                data TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            );"
        ))?;
        self.tables.insert(table.to_string());
        Ok(())
    }

    fn pending(&mut self, table: &str) -> Result<Vec<(i64, MessageData)>, StorageError> {
        self.ensure_table(table)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, data FROM \"{table}\" WHERE synced = 0 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, json)| {
                serde_json::from_str(&json)
                    .map(|data| (id, data))
                    .map_err(StorageError::from)
            })
            .collect()
    }

    #[cfg_attr(not(feature = "sync"), allow(dead_code))]
    fn mark_synced(&mut self, table: &str, ids: &[i64]) -> Result<(), StorageError> {
        let conn = self.conn.as_mut().ok_or(StorageError::Closed)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("UPDATE \"{table}\" SET synced = 1 WHERE id = ?1"))?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    #[cfg(feature = "sync")]
    fn upload(
        &mut self,
        table: &str,
        host: &str,
        pending: Vec<(i64, MessageData)>,
    ) -> Result<usize, StorageError> {
        let client = crate::storage::sync::BlockingSyncClient::new(host)?;
        let (ids, records): (Vec<i64>, Vec<MessageData>) = pending.into_iter().unzip();
        client.upload(table, &records)?;

        self.mark_synced(table, &ids)?;
        tracing::info!("Synced {} records of {table} to {host}", ids.len());
        Ok(ids.len())
    }

    #[cfg(not(feature = "sync"))]
    fn upload(
        &mut self,
        _table: &str,
        host: &str,
        pending: Vec<(i64, MessageData)>,
    ) -> Result<usize, StorageError> {
        tracing::warn!(
            "Sync to {host} requested but the sync feature is not enabled; {} records stay local",
            pending.len()
        );
        Ok(0)
    }
}

impl Engine for SqliteEngine {
    fn save(&mut self, data: &MessageData, table: &str) -> Result<(), StorageError> {
        self.ensure_table(table)?;
        let json = serde_json::to_string(data)?;
        self.conn()?.execute(
            &format!(
                "INSERT INTO \"{table}\" (timestamp, device_id, label, timezone, os, json_version, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                data.timestamp,
                data.device_id,
                data.label,
                data.timezone,
                data.os,
                data.json_version,
                json
            ],
        )?;
        Ok(())
    }

    fn start_sync(&mut self, table: &str) -> Result<usize, StorageError> {
        let pending = self.pending(table)?;
        if pending.is_empty() {
            return Ok(0);
        }

        let Some(host) = self.host.clone() else {
            tracing::debug!("No database host configured; {} records stay local", pending.len());
            return Ok(0);
        };

        self.upload(table, &host, pending)
    }

    fn records(&mut self, table: &str) -> Result<Vec<MessageData>, StorageError> {
        self.ensure_table(table)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT data FROM \"{table}\" ORDER BY id"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StorageError::from))
            .collect()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        let conn = self.conn.take().ok_or(StorageError::Closed)?;
        conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
    }
}
