//! Construction of the real sensors and GPS source from configuration.
//!
//! On Linux these wrap the drivers in `crowdbike-linux`; elsewhere every
//! constructor fails with [`crate::Error::Platform`], except the gpsd client which
//! only needs a TCP connection.

use tracing::warn;

use crate::config::{Dht22Config, GpsConfig, GpsSourceKind, PmSensorConfig};
use crate::error::Result;
use crate::gps::{GpsdSource, PositionSource};
use crate::sensor::{ClimateSensor, ParticulateSensor};

/// Open the DHT22 on the configured pin.
///
/// # Errors
///
/// Returns an error if the GPIO pin cannot be claimed.
pub fn open_climate_sensor(config: &Dht22Config) -> Result<Box<dyn ClimateSensor>> {
    #[cfg(target_os = "linux")]
    {
        let frames = pi::GpioFrames::open(config.gpio_pin)?;
        Ok(Box::new(crate::dht22::Dht22Sensor::new(frames, config.retries)))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Err(crate::error::Error::platform("the DHT22 driver requires Linux"))
    }
}

/// Open the particulate sensor if one is fitted.
///
/// Returns `Ok(None)` when the sensor is disabled.
///
/// # Errors
///
/// Returns an error if the sensor is enabled but its device cannot be
/// opened.
pub fn open_particulate_sensor(
    config: &PmSensorConfig,
) -> Result<Option<Box<dyn ParticulateSensor>>> {
    if !config.enabled {
        return Ok(None);
    }
    #[cfg(target_os = "linux")]
    {
        let sensor = pi::Sds011Sensor::open(&config.device, config.baud_rate)?;
        Ok(Some(Box::new(sensor)))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(crate::error::Error::platform("the SDS011 driver requires Linux"))
    }
}

/// Build the configured position source.
///
/// # Errors
///
/// Returns an error if direct NMEA input is requested on a platform
/// without UART support.
pub fn position_source(config: &GpsConfig) -> Result<Box<dyn PositionSource>> {
    let reconnect = std::time::Duration::from_secs(config.reconnect_secs);
    match config.source {
        GpsSourceKind::Gpsd => {
            let address = format!("{}:{}", config.gpsd_host, config.gpsd_port);
            Ok(Box::new(GpsdSource::new(address, reconnect)))
        }
        #[cfg(target_os = "linux")]
        GpsSourceKind::Nmea => Ok(Box::new(crate::gps::NmeaSerialSource::new(
            config.serial_device.clone(),
            config.baud_rate,
            reconnect,
        ))),
        #[cfg(not(target_os = "linux"))]
        GpsSourceKind::Nmea => Err(crate::error::Error::platform("NMEA over UART requires Linux")),
    }
}

/// MAC address of `iface`, or an empty string if it cannot be read.
#[must_use]
pub fn device_mac(iface: &str) -> String {
    #[cfg(target_os = "linux")]
    {
        match crowdbike_linux::mac_address(iface) {
            Ok(mac) => mac,
            Err(e) => {
                warn!(interface = iface, error = %e, "Cannot read MAC address");
                String::new()
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        warn!(interface = iface, "MAC address lookup requires Linux");
        String::new()
    }
}

#[cfg(target_os = "linux")]
mod pi {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crowdbike_linux::{open_serial, ClearBuffer, Dht22Line, SerialPort};
    use tracing::{debug, info};

    use crate::dht22::FrameSource;
    use crate::error::{Error, Result};
    use crate::pm::{self, FrameReader};
    use crate::sensor::{ParticulateSensor, PmReading};

    /// The SDS011 emits a frame every second in active mode.
    const PM_READ_TIMEOUT: Duration = Duration::from_millis(1_500);

    /// DHT22 transactions bit-banged on a GPIO line.
    #[derive(Debug)]
    pub(super) struct GpioFrames {
        line: Arc<Mutex<Dht22Line>>,
    }

    impl GpioFrames {
        pub(super) fn open(bcm: u8) -> Result<Self> {
            let line = Dht22Line::open(bcm)?;
            info!(pin = bcm, "Opened DHT22");
            Ok(Self {
                line: Arc::new(Mutex::new(line)),
            })
        }
    }

    #[async_trait::async_trait]
    impl FrameSource for GpioFrames {
        async fn read_frame(&mut self) -> Result<[u8; 5]> {
            let line = Arc::clone(&self.line);
            tokio::task::spawn_blocking(move || {
                let mut line = line
                    .lock()
                    .map_err(|_| Error::internal("DHT22 line lock poisoned"))?;
                line.read_frame().map_err(Error::from)
            })
            .await
            .map_err(|e| Error::internal(format!("DHT22 read task failed: {e}")))?
        }
    }

    pub(super) struct Sds011Sensor {
        device: String,
        reader: Arc<Mutex<FrameReader<Box<dyn SerialPort>>>>,
    }

    impl std::fmt::Debug for Sds011Sensor {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Sds011Sensor")
                .field("device", &self.device)
                .finish_non_exhaustive()
        }
    }

    impl Sds011Sensor {
        pub(super) fn open(device: &str, baud_rate: u32) -> Result<Self> {
            let port = open_serial(device, baud_rate, PM_READ_TIMEOUT)?;
            info!(device, baud_rate, "Opened SDS011");
            Ok(Self {
                device: device.to_string(),
                reader: Arc::new(Mutex::new(FrameReader::new(port))),
            })
        }
    }

    #[async_trait::async_trait]
    impl ParticulateSensor for Sds011Sensor {
        fn name(&self) -> &'static str {
            pm::SENSOR_NAME
        }

        async fn read(&mut self) -> Result<PmReading> {
            let reader = Arc::clone(&self.reader);
            tokio::task::spawn_blocking(move || {
                let mut reader = reader
                    .lock()
                    .map_err(|_| Error::internal("SDS011 reader lock poisoned"))?;
                // Frames queued since the last sample are stale.
                if let Err(e) = reader.get_mut().clear(ClearBuffer::Input) {
                    debug!(error = %e, "Cannot flush SDS011 input");
                }
                reader.read_frame()
            })
            .await
            .map_err(|e| Error::internal(format!("SDS011 read task failed: {e}")))?
        }
    }
}
