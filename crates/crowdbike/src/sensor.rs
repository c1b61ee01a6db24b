//! Sensor abstractions.
//!
//! The recorder only sees these traits; the DHT22 and SDS011 drivers for the
//! Pi implement them in [`crate::hardware`], and tests substitute fakes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How often [`StopHandle::stopped`] checks the flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One air temperature / relative humidity measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateReading {
    /// Air temperature in °C.
    pub temperature_c: f64,
    /// Relative humidity in %.
    pub rel_humidity_pct: f64,
}

/// One particulate matter measurement in µg/m³.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PmReading {
    /// PM2.5 mass concentration.
    pub pm2_5: f64,
    /// PM10 mass concentration.
    pub pm10: f64,
}

/// A temperature/humidity sensor.
#[async_trait::async_trait]
pub trait ClimateSensor: Send {
    /// Sensor name for logs.
    fn name(&self) -> &'static str;

    /// Take one measurement.
    ///
    /// # Errors
    ///
    /// Returns an error if the sensor did not produce a valid reading.
    async fn read(&mut self) -> Result<ClimateReading>;
}

/// A particulate matter sensor.
#[async_trait::async_trait]
pub trait ParticulateSensor: Send {
    /// Sensor name for logs.
    fn name(&self) -> &'static str;

    /// Take one measurement.
    ///
    /// # Errors
    ///
    /// Returns an error if no valid frame arrived.
    async fn read(&mut self) -> Result<PmReading>;
}

/// A cloneable flag used to stop long-running tasks.
///
/// All clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stop_signal: Arc<AtomicBool>,
}

impl StopHandle {
    /// Create a handle that has not been signalled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every holder to stop.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Resolve once the stop signal has been sent.
    pub async fn stopped(&self) {
        while !self.should_stop() {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }
}
