//! Relational schema for sensors and readings.
//!
//! `UNIQUE(sensor_id, ts)` is the only deduplication mechanism in the
//! pipeline; `reading_sensor_ts_desc` serves latest-reading queries.

use rusqlite::Connection;

use crate::error::Result;

/// Schema DDL, safe to run on every open
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sensor (
        hardware_id   INTEGER PRIMARY KEY,
        name          TEXT    NOT NULL,
        sensor_type   TEXT,
        gps_latitude  REAL,
        gps_longitude REAL,
        metadata      TEXT    NOT NULL DEFAULT '{}'
    );

    CREATE TABLE IF NOT EXISTS reading (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        sensor_id       INTEGER NOT NULL REFERENCES sensor(hardware_id) ON DELETE CASCADE,
        ts              INTEGER NOT NULL,
        sequence        INTEGER,
        temperature_c   REAL,
        humidity_pct    REAL,
        capacitance_val INTEGER,
        battery_v       REAL,
        rssi_dbm        INTEGER,
        UNIQUE (sensor_id, ts)
    );

    CREATE INDEX IF NOT EXISTS reading_sensor_ts_desc
        ON reading (sensor_id, ts DESC);
";

/// Enable foreign keys and create tables
///
/// Foreign keys are a per-connection setting in SQLite, so this must run on
/// every connection, not just the first.
pub fn apply(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
