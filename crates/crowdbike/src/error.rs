//! Error types for crowdbike.
//!
//! This module defines all error types used throughout the crowdbike crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The main error type for crowdbike operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Sensor Errors ===
    /// A sensor could not be read.
    #[error("failed to read {sensor}: {message}")]
    SensorRead {
        /// Name of the sensor.
        sensor: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// A sensor frame failed its checksum.
    #[error("{sensor} checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum {
        /// Name of the sensor.
        sensor: &'static str,
        /// Checksum computed from the payload.
        expected: u8,
        /// Checksum carried by the frame.
        actual: u8,
    },

    /// A decoded value lies outside the sensor's rated range.
    #[error("{sensor} reported {quantity} = {value} outside its rated range")]
    OutOfRange {
        /// Name of the sensor.
        sensor: &'static str,
        /// Which measurement was implausible.
        quantity: &'static str,
        /// The decoded value.
        value: f64,
    },

    /// An operation timed out.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// How long we waited.
        after: Duration,
    },

    // === GPS Errors ===
    /// Failed to connect to gpsd.
    #[error("failed to connect to gpsd at {address}: {source}")]
    GpsConnect {
        /// Host and port that were tried.
        address: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// GPS data could not be understood.
    #[error("GPS protocol error: {0}")]
    GpsProtocol(String),

    // === Platform Errors ===
    /// Hardware access failed.
    #[error("platform error: {0}")]
    Platform(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for crowdbike operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

#[cfg(target_os = "linux")]
impl From<crowdbike_linux::HardwareError> for Error {
    fn from(err: crowdbike_linux::HardwareError) -> Self {
        match err {
            // Only DHT22 transactions are pulse-timed.
            crowdbike_linux::HardwareError::PulseTimeout { .. } => Self::SensorRead {
                sensor: crate::dht22::SENSOR_NAME,
                message: err.to_string(),
            },
            other => Self::Platform(other.to_string()),
        }
    }
}

impl Error {
    /// Create a new platform error.
    #[must_use]
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a sensor read error.
    #[must_use]
    pub fn sensor_read(sensor: &'static str, message: impl Into<String>) -> Self {
        Self::SensorRead {
            sensor,
            message: message.into(),
        }
    }

    /// Create a GPS protocol error.
    #[must_use]
    pub fn gps_protocol(message: impl Into<String>) -> Self {
        Self::GpsProtocol(message.into())
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Check if this error came from a sensor transaction rather than the
    /// host (checksum, range or read failures).
    #[must_use]
    pub fn is_sensor_error(&self) -> bool {
        matches!(
            self,
            Self::SensorRead { .. } | Self::Checksum { .. } | Self::OutOfRange { .. }
        )
    }
}
