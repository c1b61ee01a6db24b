//! The sample record written once per tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::CalibratedClimate;
use crate::gps::GpsFix;
use crate::physics::round_to;
use crate::sensor::PmReading;

/// Decimal places kept for speed.
const SPEED_PLACES: i32 = 2;

/// Who produced a set of records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Bike / Pi number.
    pub bike_id: String,
    /// Rider name.
    pub student: String,
    /// MAC address of the logging device; empty if unknown.
    pub mac: String,
}

/// One sample.
///
/// Field order is the CSV column order. Missing measurements serialize as
/// empty cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Bike / Pi number.
    pub id: String,
    /// Tick counter, starting at 1.
    pub record: u64,
    /// Wall clock of the logger at the tick, UTC.
    #[serde(with = "raspberry_time")]
    pub raspberry_time: DateTime<Utc>,
    /// Satellite time of the fix.
    pub gps_time: Option<DateTime<Utc>>,
    /// Metres above mean sea level.
    pub altitude: Option<f64>,
    /// Decimal degrees.
    pub latitude: Option<f64>,
    /// Decimal degrees.
    pub longitude: Option<f64>,
    /// km/h.
    pub speed: Option<f64>,
    /// Calibrated temperature in °C.
    pub temperature: Option<f64>,
    /// Raw temperature in °C.
    pub temperature_raw: Option<f64>,
    /// Calibrated relative humidity in %.
    pub rel_humidity: Option<f64>,
    /// Raw relative humidity in %.
    pub rel_humidity_raw: Option<f64>,
    /// Vapour pressure in kPa.
    pub vapour_pressure: Option<f64>,
    /// PM10 in µg/m³.
    pub pm10: Option<f64>,
    /// PM2.5 in µg/m³.
    pub pm2_5: Option<f64>,
    /// MAC address of the logging device.
    pub mac: String,
}

impl Record {
    /// Column names in output order.
    pub const COLUMNS: [&'static str; 16] = [
        "id",
        "record",
        "raspberry_time",
        "gps_time",
        "altitude",
        "latitude",
        "longitude",
        "speed",
        "temperature",
        "temperature_raw",
        "rel_humidity",
        "rel_humidity_raw",
        "vapour_pressure",
        "pm10",
        "pm2_5",
        "mac",
    ];

    /// Assemble a record from one tick's measurements.
    #[must_use]
    pub fn new(
        identity: &Identity,
        record: u64,
        raspberry_time: DateTime<Utc>,
        fix: &GpsFix,
        climate: Option<&CalibratedClimate>,
        pm: Option<&PmReading>,
    ) -> Self {
        Self {
            id: identity.bike_id.clone(),
            record,
            raspberry_time,
            gps_time: fix.time,
            altitude: fix.altitude,
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed: fix.speed_kmh.map(|s| round_to(s, SPEED_PLACES)),
            temperature: climate.map(|c| c.temperature),
            temperature_raw: climate.map(|c| c.temperature_raw),
            rel_humidity: climate.map(|c| c.rel_humidity),
            rel_humidity_raw: climate.map(|c| c.rel_humidity_raw),
            vapour_pressure: climate.map(|c| c.vapour_pressure),
            pm10: pm.map(|p| p.pm10),
            pm2_5: pm.map(|p| p.pm2_5),
            mac: identity.mac.clone(),
        }
    }

    /// `raspberry_time` as written to the log.
    #[must_use]
    pub fn raspberry_time_string(&self) -> String {
        self.raspberry_time
            .format(raspberry_time::FORMAT)
            .to_string()
    }
}

/// File name of the CSV log for a ride started at `started`.
#[must_use]
pub fn logfile_name(identity: &Identity, started: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}.csv",
        identity.bike_id,
        identity.student,
        started.format("%Y-%m-%d_%H%M%S")
    )
}

/// Serde adapter for the `YYYY-MM-DD HH:MM:SS` logger clock format.
pub mod raspberry_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Format string, UTC.
    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    /// Serialize with [`FORMAT`].
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(
        time: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(FORMAT))
    }

    /// Parse [`FORMAT`].
    ///
    /// # Errors
    ///
    /// Fails if the text does not match the format.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }

    /// Parse [`FORMAT`] outside of serde.
    ///
    /// # Errors
    ///
    /// Fails if the text does not match the format.
    pub fn parse(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(text, FORMAT).map(|naive| naive.and_utc())
    }
}
