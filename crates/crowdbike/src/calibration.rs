//! Sensor intercomparison calibration.
//!
//! Each rig's DHT22 is compared against a reference instrument before a
//! campaign. The fit is stored as a slope `a1` and offset `a0` and applied
//! as `calibrated = raw / a1 - a0`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::physics::{round_to, saturation_vapour_pressure, vapour_pressure};
use crate::sensor::ClimateReading;

/// Decimal places kept for raw sensor values.
const RAW_PLACES: i32 = 5;

/// Decimal places kept for calibrated values.
const CALIBRATED_PLACES: i32 = 3;

/// Decimal places kept for vapour pressure.
const VAPOUR_PLACES: i32 = 5;

/// A linear correction `raw / a1 - a0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearCalibration {
    /// Slope.
    pub a1: f64,
    /// Offset.
    pub a0: f64,
}

impl LinearCalibration {
    /// The correction that leaves values unchanged.
    pub const IDENTITY: Self = Self { a1: 1.0, a0: 0.0 };

    /// Create a calibration from its coefficients.
    #[must_use]
    pub const fn new(a1: f64, a0: f64) -> Self {
        Self { a1, a0 }
    }

    /// Apply the correction to a raw value.
    #[must_use]
    pub fn apply(&self, raw: f64) -> f64 {
        raw / self.a1 - self.a0
    }

    fn check(&self, quantity: &str) -> Result<()> {
        if !self.a1.is_finite() || self.a1 == 0.0 {
            return Err(Error::ConfigValidation {
                message: format!("{quantity} calibration slope must be finite and non-zero"),
            });
        }
        if !self.a0.is_finite() {
            return Err(Error::ConfigValidation {
                message: format!("{quantity} calibration offset must be finite"),
            });
        }
        Ok(())
    }
}

impl Default for LinearCalibration {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Calibration for both DHT22 channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Air temperature correction.
    pub temperature: LinearCalibration,
    /// Relative humidity correction.
    pub humidity: LinearCalibration,
}

/// Raw and corrected climate values for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibratedClimate {
    /// Raw sensor temperature in °C.
    pub temperature_raw: f64,
    /// Calibrated temperature in °C.
    pub temperature: f64,
    /// Raw relative humidity in %.
    pub rel_humidity_raw: f64,
    /// Calibrated relative humidity in %, clamped to 0..=100.
    pub rel_humidity: f64,
    /// Vapour pressure in kPa from the calibrated values.
    pub vapour_pressure: f64,
}

impl Calibration {
    /// Check that both corrections are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] for a zero or non-finite slope or
    /// a non-finite offset.
    pub fn validate(&self) -> Result<()> {
        self.temperature.check("temperature")?;
        self.humidity.check("humidity")
    }

    /// Correct a reading and derive vapour pressure.
    #[must_use]
    pub fn apply(&self, reading: ClimateReading) -> CalibratedClimate {
        let temperature = round_to(
            self.temperature.apply(reading.temperature_c),
            CALIBRATED_PLACES,
        );
        let rel_humidity = round_to(
            self.humidity
                .apply(reading.rel_humidity_pct)
                .clamp(0.0, 100.0),
            CALIBRATED_PLACES,
        );

        let es = saturation_vapour_pressure(temperature);

        CalibratedClimate {
            temperature_raw: round_to(reading.temperature_c, RAW_PLACES),
            temperature,
            rel_humidity_raw: round_to(reading.rel_humidity_pct, RAW_PLACES),
            rel_humidity,
            vapour_pressure: round_to(vapour_pressure(rel_humidity, es), VAPOUR_PLACES),
        }
    }
}
