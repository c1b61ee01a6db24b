//! Configuration management for crowdbike.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::calibration::{Calibration, LinearCalibration};
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "crowdbike";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "samples.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CROWDBIKE_`, sections split on `__`)
/// 2. TOML config file at `~/.config/crowdbike/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rider and logging configuration.
    pub user: UserConfig,
    /// Sensor intercomparison coefficients.
    pub calibration: CalibrationConfig,
    /// Temperature/humidity sensor wiring.
    pub dht22: Dht22Config,
    /// GPS receiver access.
    pub gps: GpsConfig,
    /// Optional particulate matter sensor.
    pub pm_sensor: PmSensorConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
}

/// Rider identity and sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Number painted on the bike / Pi.
    #[serde(deserialize_with = "string_or_number")]
    pub bike_nr: String,
    /// Name of the rider, used in log file names.
    #[serde(deserialize_with = "string_or_number")]
    pub studentname: String,
    /// Directory CSV logs are written to.
    /// Defaults to `~/.local/share/crowdbike/logs`
    pub logfile_path: Option<PathBuf>,
    /// Seconds between samples.
    pub sampling_rate: u64,
    /// Interface whose MAC address tags every record.
    pub network_interface: String,
}

/// Linear calibration coefficients, `calibrated = raw / a1 - a0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Temperature slope.
    pub temp_cal_a1: f64,
    /// Temperature offset.
    pub temp_cal_a0: f64,
    /// Humidity slope.
    pub hum_cal_a1: f64,
    /// Humidity offset.
    pub hum_cal_a0: f64,
}

/// DHT22 wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dht22Config {
    /// BCM pin number of the data line.
    pub gpio_pin: u8,
    /// Attempts per sample before giving up.
    pub retries: u32,
}

/// Where position fixes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpsSourceKind {
    /// The gpsd daemon's JSON socket.
    #[default]
    Gpsd,
    /// NMEA sentences read directly from the UART.
    Nmea,
}

impl std::fmt::Display for GpsSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gpsd => write!(f, "gpsd"),
            Self::Nmea => write!(f, "nmea"),
        }
    }
}

/// GPS access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Which source to read.
    pub source: GpsSourceKind,
    /// gpsd host.
    pub gpsd_host: String,
    /// gpsd port.
    pub gpsd_port: u16,
    /// UART device for NMEA input.
    pub serial_device: String,
    /// UART baud rate.
    pub baud_rate: u32,
    /// Seconds to wait before reconnecting to a lost source.
    pub reconnect_secs: u64,
}

/// Nova SDS011 particulate sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmSensorConfig {
    /// Whether the sensor is fitted.
    pub enabled: bool,
    /// USB serial device.
    pub device: String,
    /// Baud rate.
    pub baud_rate: u32,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/crowdbike/samples.db`
    pub database_path: Option<PathBuf>,
    /// Write a CSV log per ride.
    pub csv_enabled: bool,
    /// Record samples in the database.
    pub database_enabled: bool,
    /// Sessions older than this are pruned on startup.
    /// Set to 0 for unlimited.
    pub max_age_days: u32,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            bike_nr: "00".to_string(),
            studentname: "rider".to_string(),
            logfile_path: None,
            sampling_rate: 5,
            network_interface: "wlan0".to_string(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            temp_cal_a1: 1.0,
            temp_cal_a0: 0.0,
            hum_cal_a1: 1.0,
            hum_cal_a0: 0.0,
        }
    }
}

impl Default for Dht22Config {
    fn default() -> Self {
        Self {
            gpio_pin: 4,
            retries: 3,
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            source: GpsSourceKind::Gpsd,
            gpsd_host: "127.0.0.1".to_string(),
            gpsd_port: 2947,
            serial_device: "/dev/serial0".to_string(),
            baud_rate: 9600,
            reconnect_secs: 5,
        }
    }
}

impl Default for PmSensorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Resolved at runtime
            csv_enabled: true,
            database_enabled: true,
            max_age_days: 0,
        }
    }
}

impl CalibrationConfig {
    /// Build the calibration used by the recorder.
    #[must_use]
    pub fn to_calibration(&self) -> Calibration {
        Calibration {
            temperature: LinearCalibration::new(self.temp_cal_a1, self.temp_cal_a0),
            humidity: LinearCalibration::new(self.hum_cal_a1, self.hum_cal_a0),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("CROWDBIKE_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.user.sampling_rate == 0 {
            return Err(invalid("sampling_rate must be greater than 0"));
        }

        if self.user.bike_nr.trim().is_empty() {
            return Err(invalid("bike_nr must not be empty"));
        }

        // Both end up in the log file name
        for (field, value) in [
            ("bike_nr", &self.user.bike_nr),
            ("studentname", &self.user.studentname),
        ] {
            if value.contains(['/', '\\']) {
                return Err(invalid(format!(
                    "{field} must not contain path separators: {value}"
                )));
            }
        }

        self.calibration.to_calibration().validate()?;

        if self.gps.gpsd_port == 0 {
            return Err(invalid("gpsd_port must be greater than 0"));
        }

        if self.gps.baud_rate == 0 || self.pm_sensor.baud_rate == 0 {
            return Err(invalid("baud_rate must be greater than 0"));
        }

        if !self.storage.csv_enabled && !self.storage.database_enabled {
            return Err(invalid(
                "at least one of csv_enabled or database_enabled must be set",
            ));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the CSV log directory, resolving defaults if not set.
    #[must_use]
    pub fn logfile_dir(&self) -> PathBuf {
        self.user
            .logfile_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("logs"))
    }

    /// Get the sampling interval as a Duration.
    #[must_use]
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(self.user.sampling_rate)
    }

    /// Get the GPS reconnect delay as a Duration.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.gps.reconnect_secs)
    }

    /// Address of the gpsd socket.
    #[must_use]
    pub fn gpsd_address(&self) -> String {
        format!("{}:{}", self.gps.gpsd_host, self.gps.gpsd_port)
    }

    /// Get the max age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.storage.max_age_days == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.max_age_days) * 24 * 60 * 60,
            ))
        }
    }
}

/// Accept a bare number where a string is expected.
///
/// Environment values are parsed before they reach serde, so
/// `CROWDBIKE_USER__BIKE_NR=12` arrives as an integer. Leading zeros are
/// only kept when the value is quoted (`'"07"'`).
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct StringOrNumber;

    impl serde::de::Visitor<'_> for StringOrNumber {
        type Value = String;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: serde::de::Error>(self, v: String) -> std::result::Result<String, E> {
            Ok(v)
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
