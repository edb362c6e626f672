use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::WatermarkStore;
use crate::sqlite_column;
use crate::sqlite_persistence::{
    open_versioned, Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};
use crate::timestamps::{epoch, format_timestamp, parse_timestamp};

/// V 0
const READ_WATERMARK_TABLE_V_0: Table = Table {
    name: "read_watermark",
    columns: &[
        sqlite_column!("viewer_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("last_read_at", &SqlType::Text, non_null = true),
        sqlite_column!(
            "updated",
            &SqlType::Integer,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[READ_WATERMARK_TABLE_V_0],
    migration: None,
}];

/// Keeps one `viewer_id -> ISO-8601 timestamp` row per viewer.
#[derive(Clone)]
pub struct SqliteWatermarkStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWatermarkStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = open_versioned(db_path, VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Watermark store connection lock poisoned"))
    }
}

impl WatermarkStore for SqliteWatermarkStore {
    fn get(&self, viewer_id: &str) -> Result<DateTime<Utc>> {
        let conn = self.lock()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT last_read_at FROM read_watermark WHERE viewer_id = ?1",
                params![viewer_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read watermark of viewer {}", viewer_id))?;

        match stored {
            None => Ok(epoch()),
            Some(stored) => match parse_timestamp(&stored) {
                Some(at) => Ok(at),
                None => bail!(
                    "Stored watermark {:?} of viewer {} is not a timestamp",
                    stored,
                    viewer_id
                ),
            },
        }
    }

    fn set(&self, viewer_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        // Single statement, so the row is either fully written or untouched.
        // The WHERE clause keeps a stored value from ever moving backward.
        conn.execute(
            "INSERT INTO read_watermark (viewer_id, last_read_at) VALUES (?1, ?2) \
             ON CONFLICT(viewer_id) DO UPDATE SET \
                last_read_at = excluded.last_read_at, \
                updated = cast(strftime('%s','now') as int) \
             WHERE excluded.last_read_at > read_watermark.last_read_at",
            params![viewer_id, format_timestamp(at)],
        )
        .with_context(|| format!("Failed to store watermark of viewer {}", viewer_id))?;
        Ok(())
    }
}
