//! # Telemetry Store Module
//!
//! Durable, idempotent persistence on SQLite.
//!
//! - `sensor` rows are keyed by an immutable hardware id
//! - `reading` rows must reference an existing sensor and are removed with it
//! - a second reading with the same `(sensor_id, ts)` is ignored, never an
//!   error, so retransmitted or replayed lines have no effect beyond the first
//!
//! Writes happen in batches inside one transaction: sensors first (parents),
//! then readings. A failed batch leaves the database untouched.

pub mod models;
pub mod schema;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::Result;
use models::{ts_from_millis, ts_to_millis, FlushReport, NewReading, SensorRow, SensorUpsert, StoredReading};

const UPSERT_SENSOR: &str = "
    INSERT INTO sensor (hardware_id, name, sensor_type, gps_latitude, gps_longitude, metadata)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT (hardware_id) DO UPDATE SET
        name          = excluded.name,
        sensor_type   = COALESCE(excluded.sensor_type, sensor.sensor_type),
        gps_latitude  = COALESCE(excluded.gps_latitude, sensor.gps_latitude),
        gps_longitude = COALESCE(excluded.gps_longitude, sensor.gps_longitude),
        metadata      = excluded.metadata";

const INSERT_READING: &str = "
    INSERT INTO reading (sensor_id, ts, sequence, temperature_c, humidity_pct, capacitance_val, battery_v, rssi_dbm)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
    ON CONFLICT (sensor_id, ts) DO NOTHING";

const READING_COLUMNS: &str =
    "id, sensor_id, ts, sequence, temperature_c, humidity_pct, capacitance_val, battery_v, rssi_dbm";

/// SQLite-backed telemetry store
pub struct TelemetryStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TelemetryStore {
    /// Open (or create) a database file, creating parent directories as needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory or database cannot be created or the
    /// schema cannot be applied.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("SQLite journal mode: {}", mode);
        schema::apply(&conn)?;
        info!("Telemetry store open at {}", path.display());

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Upsert sensors, then insert readings ignoring duplicates, in one
    /// transaction.
    ///
    /// Sensors are deduplicated by hardware id (last one wins).
    ///
    /// # Errors
    ///
    /// Returns error (and writes nothing) if any statement fails, e.g. a
    /// reading whose sensor is neither in the batch nor already stored.
    pub fn write_batch(&mut self, sensors: &[SensorUpsert], readings: &[NewReading]) -> Result<FlushReport> {
        let mut unique: BTreeMap<i64, &SensorUpsert> = BTreeMap::new();
        for sensor in sensors {
            unique.insert(sensor.hardware_id, sensor);
        }

        let tx = self.conn.transaction()?;
        let mut report = FlushReport::default();
        {
            let mut upsert = tx.prepare_cached(UPSERT_SENSOR)?;
            for sensor in unique.values() {
                let metadata = serde_json::to_string(&sensor.metadata)?;
                upsert.execute(params![
                    sensor.hardware_id,
                    sensor.name,
                    sensor.sensor_type,
                    sensor.gps_latitude,
                    sensor.gps_longitude,
                    metadata,
                ])?;
                report.sensors += 1;
            }

            let mut insert = tx.prepare_cached(INSERT_READING)?;
            for reading in readings {
                let changed = insert.execute(params![
                    reading.sensor_id,
                    ts_to_millis(&reading.ts),
                    reading.sequence,
                    reading.temperature_c,
                    reading.humidity_pct,
                    reading.capacitance_val,
                    reading.battery_v,
                    reading.rssi_dbm,
                ])?;
                if changed == 0 {
                    report.duplicates += 1;
                    debug!("Duplicate reading for sensor {} at {}", reading.sensor_id, reading.ts);
                } else {
                    report.inserted += 1;
                }
            }
        }
        tx.commit()?;

        Ok(report)
    }

    /// Create or refresh one sensor
    pub fn upsert_sensor(&mut self, sensor: &SensorUpsert) -> Result<()> {
        self.write_batch(std::slice::from_ref(sensor), &[])?;
        Ok(())
    }

    /// Insert one reading; `Ok(false)` if it was a duplicate
    pub fn insert_reading(&mut self, reading: &NewReading) -> Result<bool> {
        let report = self.write_batch(&[], std::slice::from_ref(reading))?;
        Ok(report.inserted == 1)
    }

    /// Look up a sensor by hardware id
    pub fn sensor(&self, hardware_id: i64) -> Result<Option<SensorRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT hardware_id, name, sensor_type, gps_latitude, gps_longitude, metadata
                 FROM sensor WHERE hardware_id = ?1",
                params![hardware_id],
                sensor_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Most recent readings for a sensor, newest first
    pub fn latest_readings(&self, sensor_id: i64, limit: usize) -> Result<Vec<StoredReading>> {
        let sql = format!(
            "SELECT {} FROM reading WHERE sensor_id = ?1 ORDER BY ts DESC LIMIT ?2",
            READING_COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let readings = stmt
            .query_map(params![sensor_id, limit], reading_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(readings)
    }

    /// Number of stored readings for a sensor
    pub fn reading_count(&self, sensor_id: i64) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM reading WHERE sensor_id = ?1",
            params![sensor_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Delete a sensor and, by cascade, all of its readings.
    ///
    /// Returns whether the sensor existed.
    pub fn delete_sensor(&mut self, hardware_id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM sensor WHERE hardware_id = ?1", params![hardware_id])?;
        if deleted > 0 {
            info!("Deleted sensor {} and its readings", hardware_id);
        }
        Ok(deleted > 0)
    }
}

fn sensor_from_row(row: &Row<'_>) -> rusqlite::Result<SensorRow> {
    let metadata: String = row.get(5)?;
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(SensorRow {
        hardware_id: row.get(0)?,
        name: row.get(1)?,
        sensor_type: row.get(2)?,
        gps_latitude: row.get(3)?,
        gps_longitude: row.get(4)?,
        metadata,
    })
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    let ms: i64 = row.get(2)?;
    let ts = ts_from_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(2, ms))?;
    Ok(StoredReading {
        id: row.get(0)?,
        reading: NewReading {
            sensor_id: row.get(1)?,
            ts,
            sequence: row.get(3)?,
            temperature_c: row.get(4)?,
            humidity_pct: row.get(5)?,
            capacitance_val: row.get(6)?,
            battery_v: row.get(7)?,
            rssi_dbm: row.get(8)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn base_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn sensor(hardware_id: i64) -> SensorUpsert {
        SensorUpsert {
            hardware_id,
            name: format!("tx-{}", hardware_id),
            sensor_type: None,
            gps_latitude: Some(45.5),
            gps_longitude: Some(-122.6),
            metadata: json!({"source": "radio", "net": 165}),
        }
    }

    fn reading(sensor_id: i64, offset_s: i64) -> NewReading {
        NewReading {
            sensor_id,
            ts: base_ts() + Duration::seconds(offset_s),
            sequence: Some(offset_s),
            temperature_c: None,
            humidity_pct: None,
            capacitance_val: Some(3016),
            battery_v: Some(4.271),
            rssi_dbm: Some(-57),
        }
    }

    #[test]
    fn test_duplicate_reading_is_ignored() {
        let mut store = TelemetryStore::open_in_memory().unwrap();
        let report = store
            .write_batch(&[sensor(1001)], &[reading(1001, 0), reading(1001, 0)])
            .unwrap();

        assert_eq!(report, FlushReport { sensors: 1, inserted: 1, duplicates: 1 });
        assert_eq!(store.reading_count(1001).unwrap(), 1);

        // replay in a later batch
        let report = store.write_batch(&[sensor(1001)], &[reading(1001, 0)]).unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.reading_count(1001).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_outcome_independent_of_order() {
        let mut first = reading(1001, 0);
        first.rssi_dbm = Some(-50);
        let mut second = reading(1001, 0);
        second.rssi_dbm = Some(-70);

        for batch in [vec![first.clone(), second.clone()], vec![second.clone(), first.clone()]] {
            let mut store = TelemetryStore::open_in_memory().unwrap();
            store.write_batch(&[sensor(1001)], &batch).unwrap();
            let rows = store.latest_readings(1001, 10).unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].reading.ts, base_ts());
        }
    }

    #[test]
    fn test_orphan_reading_rejected_and_batch_rolled_back() {
        let mut store = TelemetryStore::open_in_memory().unwrap();
        let result = store.write_batch(&[sensor(1001)], &[reading(1001, 0), reading(4242, 0)]);

        assert!(matches!(result, Err(TelemetryError::Store(_))));
        assert!(store.sensor(1001).unwrap().is_none());
        assert_eq!(store.reading_count(1001).unwrap(), 0);
    }

    #[test]
    fn test_delete_cascades_to_own_readings_only() {
        let mut store = TelemetryStore::open_in_memory().unwrap();
        store
            .write_batch(
                &[sensor(1001), sensor(1002)],
                &[reading(1001, 0), reading(1001, 60), reading(1002, 0)],
            )
            .unwrap();

        assert!(store.delete_sensor(1001).unwrap());
        assert_eq!(store.reading_count(1001).unwrap(), 0);
        assert_eq!(store.reading_count(1002).unwrap(), 1);
        assert!(store.sensor(1002).unwrap().is_some());
        assert!(!store.delete_sensor(1001).unwrap());
    }

    #[test]
    fn test_latest_readings_newest_first() {
        let mut store = TelemetryStore::open_in_memory().unwrap();
        let readings: Vec<NewReading> = (0..5).map(|i| reading(1001, i * 60)).collect();
        store.write_batch(&[sensor(1001)], &readings).unwrap();

        let latest = store.latest_readings(1001, 2).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].reading.ts, base_ts() + Duration::seconds(240));
        assert_eq!(latest[1].reading.ts, base_ts() + Duration::seconds(180));
        assert_eq!(latest[0].reading.capacitance_val, Some(3016));
        assert_eq!(latest[0].reading.temperature_c, None);
    }

    #[test]
    fn test_upsert_refreshes_but_keeps_known_coordinates() {
        let mut store = TelemetryStore::open_in_memory().unwrap();
        store.upsert_sensor(&sensor(1001)).unwrap();

        let refreshed = SensorUpsert {
            name: "greenhouse".to_string(),
            sensor_type: Some("soil_moisture".to_string()),
            gps_latitude: None,
            gps_longitude: None,
            metadata: json!({"source": "radio", "net": 7}),
            ..sensor(1001)
        };
        store.upsert_sensor(&refreshed).unwrap();

        let row = store.sensor(1001).unwrap().unwrap();
        assert_eq!(row.name, "greenhouse");
        assert_eq!(row.sensor_type.as_deref(), Some("soil_moisture"));
        assert_eq!(row.gps_latitude, Some(45.5));
        assert_eq!(row.gps_longitude, Some(-122.6));
        assert_eq!(row.metadata["net"], 7);

        // a record with no measurements does not erase the known type
        store.upsert_sensor(&SensorUpsert { sensor_type: None, ..refreshed }).unwrap();
        let row = store.sensor(1001).unwrap().unwrap();
        assert_eq!(row.sensor_type.as_deref(), Some("soil_moisture"));
    }

    #[test]
    fn test_batch_sensor_dedup_last_wins() {
        let mut store = TelemetryStore::open_in_memory().unwrap();
        let mut renamed = sensor(1001);
        renamed.name = "renamed".to_string();
        let report = store.write_batch(&[sensor(1001), renamed], &[]).unwrap();

        assert_eq!(report.sensors, 1);
        assert_eq!(store.sensor(1001).unwrap().unwrap().name, "renamed");
    }

    #[test]
    fn test_insert_reading_reports_duplicate() {
        let mut store = TelemetryStore::open_in_memory().unwrap();
        store.upsert_sensor(&sensor(1001)).unwrap();
        assert!(store.insert_reading(&reading(1001, 0)).unwrap());
        assert!(!store.insert_reading(&reading(1001, 0)).unwrap());
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("telemetry.db");

        {
            let mut store = TelemetryStore::open(&path).unwrap();
            store.write_batch(&[sensor(1001)], &[reading(1001, 0)]).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
        }

        let mut store = TelemetryStore::open(&path).unwrap();
        assert_eq!(store.reading_count(1001).unwrap(), 1);
        // foreign keys are re-enabled on reopen
        assert!(store.write_batch(&[], &[reading(9999, 0)]).is_err());
    }
}
