//! Storage layer for crowdbike.
//!
//! This module provides `SQLite`-based persistent storage for recorded
//! samples, grouped into sessions (one per logger run).

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{raspberry_time, Identity, Record};

/// Columns selected for a [`Record`], joined with its session.
const RECORD_COLUMNS: &str = r"
    s.bike_id, r.record, r.raspberry_time, r.gps_time, r.altitude, r.latitude,
    r.longitude, r.speed, r.temperature, r.temperature_raw, r.rel_humidity,
    r.rel_humidity_raw, r.vapour_pressure, r.pm10, r.pm2_5, s.mac
";

/// Columns selected for a [`Session`].
const SESSION_COLUMNS: &str = r"
    s.id, s.started_at, s.bike_id, s.student, s.mac, s.logfile,
    (SELECT COUNT(*) FROM records r WHERE r.session_id = s.id)
";

/// One logger run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Database id.
    pub id: i64,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Bike / Pi number.
    pub bike_id: String,
    /// Rider name.
    pub student: String,
    /// MAC address of the logger.
    pub mac: String,
    /// CSV log written alongside, if any.
    pub logfile: Option<String>,
    /// Number of records in the session.
    pub records: i64,
}

/// Storage engine for samples.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a session and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn begin_session(
        &self,
        identity: &Identity,
        started_at: DateTime<Utc>,
        logfile: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO sessions (started_at, bike_id, student, mac, logfile)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                timestamp(started_at),
                identity.bike_id,
                identity.student,
                identity.mac,
                logfile,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        info!(session = id, bike = %identity.bike_id, "Started session");
        Ok(id)
    }

    /// Store a record under `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session does not exist or the insert fails.
    pub fn insert_record(&self, session_id: i64, record: &Record) -> Result<i64> {
        let record_number = i64::try_from(record.record).unwrap_or(i64::MAX);
        self.conn.execute(
            r"
            INSERT INTO records (
                session_id, record, raspberry_time, gps_time, altitude, latitude,
                longitude, speed, temperature, temperature_raw, rel_humidity,
                rel_humidity_raw, vapour_pressure, pm10, pm2_5
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ",
            params![
                session_id,
                record_number,
                record.raspberry_time_string(),
                record.gps_time.map(timestamp),
                record.altitude,
                record.latitude,
                record.longitude,
                record.speed,
                record.temperature,
                record.temperature_raw,
                record.rel_humidity,
                record.rel_humidity_raw,
                record.vapour_pressure,
                record.pm10,
                record.pm2_5,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(session = session_id, record = record.record, "Stored record");
        Ok(id)
    }

    /// Get a session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_session(&self, id: i64) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.id = ?1");
        let session = self
            .conn
            .query_row(&sql, [id], Self::row_to_session)
            .optional()?;
        Ok(session)
    }

    /// The most recent sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s ORDER BY s.started_at DESC, s.id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let sessions = stmt
            .query_map([limit_i64], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// The newest session, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn latest_session(&self) -> Result<Option<Session>> {
        Ok(self.list_sessions(1)?.into_iter().next())
    }

    /// All records of a session in tick order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn session_records(&self, session_id: i64) -> Result<Vec<Record>> {
        let sql = format!(
            r"
            SELECT {RECORD_COLUMNS}
            FROM records r JOIN sessions s ON s.id = r.session_id
            WHERE r.session_id = ?1
            ORDER BY r.record ASC
            "
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([session_id], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// The most recently stored records across all sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_records(&self, limit: usize) -> Result<Vec<Record>> {
        let sql = format!(
            r"
            SELECT {RECORD_COLUMNS}
            FROM records r JOIN sessions s ON s.id = r.session_id
            ORDER BY r.id DESC LIMIT ?1
            "
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit_i64], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Count stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_records(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_sessions(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete a session and its records.
    ///
    /// Returns `true` if a session was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_session(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// Delete sessions that started more than `max_age` ago.
    ///
    /// Returns the number of sessions deleted. A `max_age` reaching past
    /// the representable date range deletes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            debug!("Prune cutoff predates the calendar, keeping all sessions");
            return Ok(0);
        };
        let cutoff = timestamp(cutoff);

        let affected = self
            .conn
            .execute("DELETE FROM sessions WHERE started_at < ?1", [cutoff])?;

        if affected > 0 {
            info!("Pruned {} old sessions", affected);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_records = self.count_records()?;
        let total_sessions = self.count_sessions()?;

        let (first, last): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(raspberry_time), MAX(raspberry_time) FROM records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_records,
            total_sessions,
            first_sample: first.and_then(|s| raspberry_time::parse(&s).ok()),
            last_sample: last.and_then(|s| raspberry_time::parse(&s).ok()),
            db_size_bytes,
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let started_at: String = row.get(1)?;
        Ok(Session {
            id: row.get(0)?,
            started_at: parse_timestamp(&started_at).unwrap_or_else(|| {
                warn!("Unparseable session start time: {}", started_at);
                DateTime::<Utc>::default()
            }),
            bike_id: row.get(2)?,
            student: row.get(3)?,
            mac: row.get(4)?,
            logfile: row.get(5)?,
            records: row.get(6)?,
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
        let record_number: i64 = row.get(1)?;
        let raspberry: String = row.get(2)?;
        let gps_time: Option<String> = row.get(3)?;

        let raspberry_time = raspberry_time::parse(&raspberry).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Record {
            id: row.get(0)?,
            record: u64::try_from(record_number).unwrap_or(0),
            raspberry_time,
            gps_time: gps_time.as_deref().and_then(parse_timestamp),
            altitude: row.get(4)?,
            latitude: row.get(5)?,
            longitude: row.get(6)?,
            speed: row.get(7)?,
            temperature: row.get(8)?,
            temperature_raw: row.get(9)?,
            rel_humidity: row.get(10)?,
            rel_humidity_raw: row.get(11)?,
            vapour_pressure: row.get(12)?,
            pm10: row.get(13)?,
            pm2_5: row.get(14)?,
            mac: row.get(15)?,
        })
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of records stored.
    pub total_records: i64,
    /// Total number of sessions.
    pub total_sessions: i64,
    /// Logger time of the oldest record.
    pub first_sample: Option<DateTime<Utc>>,
    /// Logger time of the newest record.
    pub last_sample: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Sortable text form used for stored timestamps.
fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::gps::{FixMode, GpsFix};

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn identity() -> Identity {
        Identity {
            bike_id: "12".to_string(),
            student: "kim".to_string(),
            mac: "dc:a6:32:00:11:22".to_string(),
        }
    }

    fn fix() -> GpsFix {
        GpsFix {
            mode: FixMode::Fix3d,
            time: Some(Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap()),
            latitude: Some(51.5),
            longitude: Some(7.4),
            altitude: Some(90.0),
            speed_kmh: Some(15.5),
            satellites: Some(8),
        }
    }

    fn record(n: u64) -> Record {
        let seconds = u32::try_from(n % 60).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, seconds).unwrap();
        let mut record = Record::new(&identity(), n, now, &fix(), None, None);
        record.temperature = Some(20.0 + f64::from(seconds));
        record
    }

    fn session(storage: &Storage) -> i64 {
        storage
            .begin_session(&identity(), Utc::now(), Some("12_kim.csv"))
            .unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_path() {
        let storage = create_test_storage();
        assert_eq!(storage.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_begin_and_get_session() {
        let storage = create_test_storage();
        let id = session(&storage);

        let stored = storage.get_session(id).unwrap().unwrap();
        assert_eq!(stored.bike_id, "12");
        assert_eq!(stored.student, "kim");
        assert_eq!(stored.mac, "dc:a6:32:00:11:22");
        assert_eq!(stored.logfile.as_deref(), Some("12_kim.csv"));
        assert_eq!(stored.records, 0);
    }

    #[test]
    fn test_get_session_nonexistent() {
        let storage = create_test_storage();
        assert!(storage.get_session(99_999).unwrap().is_none());
    }

    #[test]
    fn test_insert_and_read_records() {
        let storage = create_test_storage();
        let id = session(&storage);

        for n in [2, 1, 3] {
            storage.insert_record(id, &record(n)).unwrap();
        }

        let records = storage.session_records(id).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.record).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(records[0], record(1));
        assert_eq!(storage.get_session(id).unwrap().unwrap().records, 3);
    }

    #[test]
    fn test_missing_values_round_trip_as_none() {
        let storage = create_test_storage();
        let id = session(&storage);
        let mut sparse = record(4);
        sparse.temperature = None;
        sparse.gps_time = None;
        storage.insert_record(id, &sparse).unwrap();

        let back = &storage.session_records(id).unwrap()[0];
        assert!(back.temperature.is_none());
        assert!(back.gps_time.is_none());
        assert!(back.pm10.is_none());
    }

    #[test]
    fn test_insert_record_unknown_session() {
        let storage = create_test_storage();
        assert!(storage.insert_record(42, &record(1)).is_err());
    }

    #[test]
    fn test_recent_records() {
        let storage = create_test_storage();
        let id = session(&storage);
        for n in 1..=5 {
            storage.insert_record(id, &record(n)).unwrap();
        }

        let recent = storage.recent_records(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].record, 5);
        assert_eq!(recent[1].record, 4);
        assert!(storage.recent_records(0).unwrap().is_empty());
    }

    #[test]
    fn test_list_sessions_newest_first() {
        let storage = create_test_storage();
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let first = storage.begin_session(&identity(), older, None).unwrap();
        let second = storage.begin_session(&identity(), newer, None).unwrap();

        let sessions = storage.list_sessions(10).unwrap();
        assert_eq!(
            sessions.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![second, first]
        );
        assert_eq!(sessions[0].started_at, newer);
        assert_eq!(storage.latest_session().unwrap().unwrap().id, second);
        assert_eq!(storage.list_sessions(1).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_session_cascades() {
        let storage = create_test_storage();
        let id = session(&storage);
        storage.insert_record(id, &record(1)).unwrap();
        storage.insert_record(id, &record(2)).unwrap();

        assert!(storage.delete_session(id).unwrap());
        assert_eq!(storage.count_records().unwrap(), 0);
        assert!(storage.get_session(id).unwrap().is_none());
        assert!(!storage.delete_session(id).unwrap());
    }

    #[test]
    fn test_prune_older_than() {
        let storage = create_test_storage();
        let old = storage
            .begin_session(&identity(), Utc::now() - Duration::days(40), None)
            .unwrap();
        storage.insert_record(old, &record(1)).unwrap();
        let fresh = session(&storage);
        storage.insert_record(fresh, &record(1)).unwrap();

        let pruned = storage.prune_older_than(Duration::days(30)).unwrap();
        assert_eq!(pruned, 1);
        assert!(storage.get_session(old).unwrap().is_none());
        assert!(storage.get_session(fresh).unwrap().is_some());
        assert_eq!(storage.count_records().unwrap(), 1);
    }

    #[test]
    fn test_prune_with_huge_max_age_keeps_everything() {
        let storage = create_test_storage();
        let ancient = storage
            .begin_session(&identity(), Utc::now() - Duration::days(3650), None)
            .unwrap();

        let pruned = storage.prune_older_than(Duration::days(100_000_000)).unwrap();
        assert_eq!(pruned, 0);
        assert!(storage.get_session(ancient).unwrap().is_some());
    }

    #[test]
    fn test_stats_empty() {
        let storage = create_test_storage();
        let stats = storage.stats().unwrap();

        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.total_sessions, 0);
        assert!(stats.first_sample.is_none());
        assert!(stats.last_sample.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let storage = create_test_storage();
        let id = session(&storage);
        for n in [5, 1, 9] {
            storage.insert_record(id, &record(n)).unwrap();
        }

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.first_sample, Some(record(1).raspberry_time));
        assert_eq!(stats.last_sample, Some(record(9).raspberry_time));
    }

    #[test]
    fn test_open_file_based() {
        let db_path = std::env::temp_dir().join(format!(
            "crowdbike_test_{}.db",
            std::process::id()
        ));

        let storage = Storage::open(&db_path).unwrap();
        let id = session(&storage);
        storage.insert_record(id, &record(1)).unwrap();
        assert_eq!(storage.path(), db_path);
        assert!(storage.stats().unwrap().db_size_bytes > 0);
        drop(storage);

        // Reopening keeps the data.
        let storage = Storage::open(&db_path).unwrap();
        assert_eq!(storage.count_records().unwrap(), 1);

        drop(storage);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let root = std::env::temp_dir().join(format!("crowdbike_test_{}", std::process::id()));
        let nested_path = root.join("nested/samples.db");
        let _ = std::fs::remove_dir_all(&root);

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_timestamp_sorts_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let b = a + Duration::milliseconds(500);
        assert!(timestamp(a) < timestamp(b));
        assert_eq!(parse_timestamp(&timestamp(b)), Some(b));
    }
}
