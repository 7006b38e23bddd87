//! SQLite-backed history store.

use super::{ObjectRecord, TrackPoint};
use crate::state::EntityKind;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Current on-disk schema version (stored in `PRAGMA user_version`)
pub const SCHEMA_VERSION: u32 = 1;

/// Rows removed by a retention purge
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub object_records: usize,
    pub track_points: usize,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.object_records == 0 && self.track_points == 0
    }
}

/// Track history backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE object_records (
///     id TEXT PRIMARY KEY,
///     display_name TEXT NOT NULL,
///     kind TEXT NOT NULL,
///     first_seen_at INTEGER NOT NULL,   -- epoch ms, write-once
///     last_seen_at INTEGER NOT NULL,    -- epoch ms
///     source_id TEXT
/// );
/// CREATE TABLE track_points (
///     entity_id TEXT NOT NULL,
///     timestamp INTEGER NOT NULL,       -- epoch ms
///     latitude REAL NOT NULL,
///     longitude REAL NOT NULL,
///     altitude REAL,
///     speed REAL,
///     direction REAL,
///     confidence REAL,
///     source_id TEXT,
///     detection_count INTEGER,
///     PRIMARY KEY (entity_id, timestamp)
/// );
/// ```
///
/// The connection is wrapped in a Mutex; callers on the async runtime go
/// through `spawn_blocking`.
pub struct HistoryStore {
    conn: Mutex<Connection>,
    store_name: String,
}

impl HistoryStore {
    /// Opens (or creates) the store and upgrades its schema if needed
    pub fn open<P: AsRef<Path>>(db_path: P, store_name: &str) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).with_context(|| {
            format!(
                "Failed to open history database {}",
                db_path.as_ref().display()
            )
        })?;
        Self::init(conn, store_name)
    }

    /// In-memory store (tests, ephemeral deployments)
    pub fn open_in_memory(store_name: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn, store_name)
    }

    fn init(conn: Connection, store_name: &str) -> Result<Self> {
        let version: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("Failed to read schema version")?;

        if version > SCHEMA_VERSION {
            bail!(
                "History store '{}' has schema version {} but this build supports {}",
                store_name,
                version,
                SCHEMA_VERSION
            );
        }

        if version < SCHEMA_VERSION {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS store_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS object_records (
                    id TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    first_seen_at INTEGER NOT NULL,
                    last_seen_at INTEGER NOT NULL,
                    source_id TEXT
                );
                CREATE TABLE IF NOT EXISTS track_points (
                    entity_id TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    latitude REAL NOT NULL,
                    longitude REAL NOT NULL,
                    altitude REAL,
                    speed REAL,
                    direction REAL,
                    confidence REAL,
                    source_id TEXT,
                    detection_count INTEGER,
                    PRIMARY KEY (entity_id, timestamp)
                );
                CREATE INDEX IF NOT EXISTS idx_track_points_timestamp ON track_points(timestamp);
                CREATE INDEX IF NOT EXISTS idx_object_records_last_seen ON object_records(last_seen_at);
                "#,
            )
            .context("Failed to create history schema")?;

            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .context("Failed to record schema version")?;

            info!(
                store = %store_name,
                from_version = version,
                to_version = SCHEMA_VERSION,
                "History store schema upgraded"
            );
        }

        conn.execute(
            "INSERT INTO store_meta (key, value) VALUES ('store_name', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![store_name],
        )
        .context("Failed to record store name")?;

        Ok(Self {
            conn: Mutex::new(conn),
            store_name: store_name.to_string(),
        })
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("History store connection lock poisoned"))
    }

    /// Write-through upsert; `first_seen_at` of an existing record is kept
    pub fn upsert_object_record(&self, record: &ObjectRecord) -> Result<()> {
        self.upsert_object_records(std::slice::from_ref(record))
    }

    /// Upserts several records in one transaction
    pub fn upsert_object_records(&self, records: &[ObjectRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .context("Failed to begin object record transaction")?;
        write_object_records(&tx, records)?;
        tx.commit().context("Failed to commit object records")?;

        Ok(())
    }

    /// Appends a batch of points atomically.
    ///
    /// A point whose `(entity_id, timestamp)` already exists overwrites it.
    pub fn append_track_points(&self, points: &[TrackPoint]) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .context("Failed to begin track point transaction")?;
        let written = write_track_points(&tx, points)?;
        tx.commit().context("Failed to commit track points")?;

        Ok(written)
    }

    /// Writes records and points in one transaction; either all rows land or
    /// none do
    pub fn record_observations(
        &self,
        records: &[ObjectRecord],
        points: &[TrackPoint],
    ) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .context("Failed to begin observation transaction")?;
        write_object_records(&tx, records)?;
        let written = write_track_points(&tx, points)?;
        tx.commit().context("Failed to commit observations")?;

        Ok(written)
    }

    /// Persisted points for an entity, oldest first.
    ///
    /// Bounds are inclusive; a missing bound means the full time axis.
    pub fn query_path(
        &self,
        entity_id: &str,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<TrackPoint>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                r#"
                SELECT entity_id, timestamp, latitude, longitude, altitude,
                       speed, direction, confidence, source_id, detection_count
                FROM track_points
                WHERE entity_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                ORDER BY timestamp ASC
                "#,
            )
            .context("Failed to prepare path query")?;

        let rows = stmt
            .query_map(
                params![entity_id, from.unwrap_or(i64::MIN), to.unwrap_or(i64::MAX)],
                track_point_from_row,
            )
            .context("Failed to execute path query")?;

        let mut points = Vec::new();
        for row in rows {
            points.push(row.context("Failed to read track point row")?);
        }
        Ok(points)
    }

    pub fn object_record(&self, id: &str) -> Result<Option<ObjectRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            r#"
            SELECT id, display_name, kind, first_seen_at, last_seen_at, source_id
            FROM object_records WHERE id = ?1
            "#,
            params![id],
            object_record_from_row,
        )
        .optional()
        .context("Failed to read object record")
    }

    /// All object records, most recently seen first
    pub fn object_records(&self) -> Result<Vec<ObjectRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, display_name, kind, first_seen_at, last_seen_at, source_id
                FROM object_records ORDER BY last_seen_at DESC
                "#,
            )
            .context("Failed to prepare object record query")?;

        let rows = stmt
            .query_map([], object_record_from_row)
            .context("Failed to execute object record query")?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("Failed to read object record row")?);
        }
        Ok(records)
    }

    pub fn track_point_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM track_points", [], |row| row.get(0))
            .context("Failed to count track points")?;
        Ok(count as u64)
    }

    /// Deletes every record whose time field is older than `cutoff` (epoch ms).
    ///
    /// Runs in a single transaction; re-running on a purged store removes
    /// nothing.
    pub fn purge_older_than(&self, cutoff: i64) -> Result<PurgeReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin purge transaction")?;

        let track_points = tx
            .execute("DELETE FROM track_points WHERE timestamp < ?1", params![cutoff])
            .context("Failed to purge track points")?;
        let object_records = tx
            .execute(
                "DELETE FROM object_records WHERE last_seen_at < ?1",
                params![cutoff],
            )
            .context("Failed to purge object records")?;

        tx.commit().context("Failed to commit purge")?;

        Ok(PurgeReport {
            object_records,
            track_points,
        })
    }
}

fn track_point_from_row(row: &Row<'_>) -> rusqlite::Result<TrackPoint> {
    let detection_count: Option<i64> = row.get(9)?;
    Ok(TrackPoint {
        entity_id: row.get(0)?,
        timestamp: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        altitude: row.get(4)?,
        speed: row.get(5)?,
        direction: row.get(6)?,
        confidence: row.get(7)?,
        source_id: row.get(8)?,
        detection_count: detection_count.map(|c| c.max(0) as u64),
    })
}

fn object_record_from_row(row: &Row<'_>) -> rusqlite::Result<ObjectRecord> {
    let kind: String = row.get(2)?;
    Ok(ObjectRecord {
        id: row.get(0)?,
        display_name: row.get(1)?,
        kind: EntityKind::parse(&kind),
        first_seen_at: row.get(3)?,
        last_seen_at: row.get(4)?,
        source_id: row.get(5)?,
    })
}

fn write_object_records(tx: &Transaction<'_>, records: &[ObjectRecord]) -> Result<()> {
    let mut stmt = tx
        .prepare_cached(
            r#"
            INSERT INTO object_records (
                id, display_name, kind, first_seen_at, last_seen_at, source_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                kind = excluded.kind,
                last_seen_at = MAX(object_records.last_seen_at, excluded.last_seen_at),
                source_id = COALESCE(excluded.source_id, object_records.source_id)
            "#,
        )
        .context("Failed to prepare object record upsert")?;

    for record in records {
        stmt.execute(params![
            record.id,
            record.display_name,
            record.kind.as_str(),
            record.first_seen_at,
            record.last_seen_at,
            record.source_id,
        ])
        .with_context(|| format!("Failed to upsert object record '{}'", record.id))?;
    }

    Ok(())
}

fn write_track_points(tx: &Transaction<'_>, points: &[TrackPoint]) -> Result<usize> {
    let mut stmt = tx
        .prepare_cached(
            r#"
            INSERT INTO track_points (
                entity_id, timestamp, latitude, longitude, altitude,
                speed, direction, confidence, source_id, detection_count
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(entity_id, timestamp) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                altitude = excluded.altitude,
                speed = excluded.speed,
                direction = excluded.direction,
                confidence = excluded.confidence,
                source_id = excluded.source_id,
                detection_count = excluded.detection_count
            "#,
        )
        .context("Failed to prepare track point insert")?;

    for point in points {
        stmt.execute(params![
            point.entity_id,
            point.timestamp,
            point.latitude,
            point.longitude,
            point.altitude,
            point.speed,
            point.direction,
            point.confidence,
            point.source_id,
            point.detection_count.map(|c| c as i64),
        ])
        .with_context(|| {
            format!(
                "Failed to write track point {}@{}",
                point.entity_id, point.timestamp
            )
        })?;
    }

    Ok(points.len())
}
