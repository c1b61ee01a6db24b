//! Destinations for finished records.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::record::Record;
use crate::storage::Storage;

/// Somewhere records are written to.
pub trait RecordSink: Send {
    /// Sink name for logs.
    fn name(&self) -> &'static str;

    /// Persist one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be stored.
    fn write(&mut self, record: &Record) -> Result<()>;
}

/// Append-only CSV log, one file per ride.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvLog {
    /// Open `dir/file_name` for appending, creating the directory if needed.
    ///
    /// The header row is written only if the file did not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn create(dir: &Path, file_name: &str) -> Result<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|source| Error::DirectoryCreate {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let path = dir.join(file_name);
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(Record::COLUMNS)?;
            writer.flush()?;
        }

        info!(path = %path.display(), new = is_new, "Opened CSV log");
        Ok(Self { path, writer })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for CsvLog {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write(&mut self, record: &Record) -> Result<()> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        debug!(record = record.record, "Appended CSV row");
        Ok(())
    }
}

/// Writes records into the database under one session.
#[derive(Debug)]
pub struct StorageSink {
    storage: Storage,
    session_id: i64,
}

impl StorageSink {
    /// Wrap an open database and an already started session.
    #[must_use]
    pub fn new(storage: Storage, session_id: i64) -> Self {
        Self {
            storage,
            session_id,
        }
    }

    /// The session records are stored under.
    #[must_use]
    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// Give back the database.
    #[must_use]
    pub fn into_storage(self) -> Storage {
        self.storage
    }
}

impl RecordSink for StorageSink {
    fn name(&self) -> &'static str {
        "database"
    }

    fn write(&mut self, record: &Record) -> Result<()> {
        self.storage.insert_record(self.session_id, record)?;
        Ok(())
    }
}

/// Write `records` as CSV with a header row to `out`.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns an error if serialization or the underlying writer fails.
pub fn export_csv<W: Write>(records: &[Record], out: W) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    writer.write_record(Record::COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::gps::{FixMode, GpsFix};
    use crate::record::Identity;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "crowdbike_sink_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn record(n: u64) -> Record {
        let fix = GpsFix {
            mode: FixMode::Fix2d,
            latitude: Some(52.0),
            longitude: Some(8.0),
            ..GpsFix::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        Record::new(&Identity::default(), n, now, &fix, None, None)
    }

    #[test]
    fn test_csv_log_creates_directory_and_header() {
        let dir = test_dir("header");
        let nested = dir.join("logs");

        let mut log = CsvLog::create(&nested, "ride.csv").unwrap();
        log.write(&record(1)).unwrap();
        log.write(&record(2)).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Record::COLUMNS.join(","));
        assert!(lines[2].contains(",2,"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_csv_log_appends_without_second_header() {
        let dir = test_dir("append");

        {
            let mut log = CsvLog::create(&dir, "ride.csv").unwrap();
            log.write(&record(1)).unwrap();
        }
        let mut log = CsvLog::create(&dir, "ride.csv").unwrap();
        log.write(&record(2)).unwrap();

        let text = std::fs::read_to_string(dir.join("ride.csv")).unwrap();
        assert_eq!(text.matches("raspberry_time").count(), 1);
        assert_eq!(text.lines().count(), 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_csv_rows_visible_before_drop() {
        let dir = test_dir("flush");
        let mut log = CsvLog::create(&dir, "ride.csv").unwrap();
        log.write(&record(7)).unwrap();

        // Still open; the row must already be on disk.
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 2);

        drop(log);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_storage_sink_writes_under_session() {
        let storage = Storage::open_in_memory().unwrap();
        let session = storage
            .begin_session(&Identity::default(), Utc::now(), None)
            .unwrap();

        let mut sink = StorageSink::new(storage, session);
        assert_eq!(sink.name(), "database");
        sink.write(&record(1)).unwrap();
        sink.write(&record(2)).unwrap();

        assert_eq!(sink.session_id(), session);
        let storage = sink.into_storage();
        assert_eq!(storage.session_records(session).unwrap().len(), 2);
    }

    #[test]
    fn test_export_csv_matches_log_layout() {
        let mut out = Vec::new();
        let rows = export_csv(&[record(1), record(3)], &mut out).unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Record::COLUMNS.join(","));
        assert!(lines[1].contains("2024-07-01 12:00:00"));
        assert!(lines[2].starts_with(",3,"));
    }

    #[test]
    fn test_export_csv_empty_still_has_header() {
        let mut out = Vec::new();
        assert_eq!(export_csv(&[], &mut out).unwrap(), 0);
        assert_eq!(
            String::from_utf8(out).unwrap().trim_end(),
            Record::COLUMNS.join(",")
        );
    }

    #[test]
    fn test_storage_sink_unknown_session_fails() {
        let storage = Storage::open_in_memory().unwrap();
        let mut sink = StorageSink::new(storage, 99);
        assert!(sink.write(&record(1)).is_err());
    }
}
