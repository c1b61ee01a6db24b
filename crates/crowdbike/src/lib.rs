//! `crowdbike` - A bike-mounted air temperature and humidity logger
//!
//! This library provides sensor decoding, calibration, GPS fix tracking and
//! record storage for a Raspberry Pi that samples a DHT22 (plus an optional
//! SDS011) alongside a GPS position while riding.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod calibration;
pub mod cli;
pub mod config;
pub mod dht22;
pub mod doctor;
pub mod error;
pub mod gps;
pub mod hardware;
pub mod logging;
pub mod physics;
pub mod pm;
pub mod record;
pub mod recorder;
pub mod sensor;
pub mod sink;
pub mod storage;

pub use calibration::{CalibratedClimate, Calibration, LinearCalibration};
pub use config::Config;
pub use error::{Error, Result};
pub use gps::{FixHandle, FixMode, GpsFix, PositionSource};
pub use logging::init_logging;
pub use record::{Identity, Record};
pub use recorder::{Recorder, RecorderSummary};
pub use sensor::{ClimateReading, ClimateSensor, ParticulateSensor, PmReading, StopHandle};
pub use sink::{CsvLog, RecordSink, StorageSink};
pub use storage::{Session, Storage, StorageStats};
