//! `SQLite` schema definitions for crowdbike.
//!
//! A session is one run of the logger; every record belongs to exactly one
//! session and is removed with it.

/// SQL statement to create the sessions table.
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    bike_id TEXT NOT NULL,
    student TEXT NOT NULL,
    mac TEXT NOT NULL DEFAULT '',
    logfile TEXT
)
";

/// SQL statement to create the records table.
pub const CREATE_RECORDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    record INTEGER NOT NULL,
    raspberry_time TEXT NOT NULL,
    gps_time TEXT,
    altitude REAL,
    latitude REAL,
    longitude REAL,
    speed REAL,
    temperature REAL,
    temperature_raw REAL,
    rel_humidity REAL,
    rel_humidity_raw REAL,
    vapour_pressure REAL,
    pm10 REAL,
    pm2_5 REAL
)
";

/// Index for reading a session back in order.
pub const CREATE_RECORDS_SESSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_records_session ON records(session_id, record)
";

/// Index on sample time for statistics.
pub const CREATE_RECORDS_TIME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_records_time ON records(raspberry_time)
";

/// Index on session start for pruning.
pub const CREATE_SESSIONS_STARTED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SESSIONS_TABLE,
    CREATE_RECORDS_TABLE,
    CREATE_RECORDS_SESSION_INDEX,
    CREATE_RECORDS_TIME_INDEX,
    CREATE_SESSIONS_STARTED_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.trim().is_empty());
        }
    }

    #[test]
    fn test_records_table_has_every_column() {
        for column in crate::record::Record::COLUMNS {
            // Bike id and MAC live on the session.
            if column == "id" || column == "mac" {
                continue;
            }
            assert!(
                CREATE_RECORDS_TABLE.contains(&format!("    {column} ")),
                "records table is missing {column}"
            );
        }
    }

    #[test]
    fn test_records_cascade_with_session() {
        assert!(CREATE_RECORDS_TABLE.contains("ON DELETE CASCADE"));
    }

    #[test]
    fn test_create_metadata_table_structure() {
        assert!(CREATE_METADATA_TABLE.contains("key TEXT PRIMARY KEY"));
        assert!(CREATE_METADATA_TABLE.contains("value TEXT NOT NULL"));
    }
}
