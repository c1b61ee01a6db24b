//! DHT22 (AM2302) frame decoding.
//!
//! A transaction yields five bytes: humidity high/low, temperature
//! high/low and a checksum. Both quantities are tenths; the top bit of the
//! temperature word is a sign flag, not two's complement.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::sensor::{ClimateReading, ClimateSensor};

/// Sensor name used in errors and logs.
pub const SENSOR_NAME: &str = "DHT22";

/// The sensor needs this long between transactions.
pub const MIN_READ_SPACING: Duration = Duration::from_secs(2);

/// Rated temperature range in °C.
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = -40.0..=80.0;

/// Decode and validate a raw frame.
///
/// # Errors
///
/// Returns [`Error::Checksum`] if the frame is corrupt and
/// [`Error::OutOfRange`] if a value lies outside the sensor's rated range.
pub fn decode_frame(frame: &[u8; 5]) -> Result<ClimateReading> {
    let expected = frame[..4]
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    if expected != frame[4] {
        return Err(Error::Checksum {
            sensor: SENSOR_NAME,
            expected,
            actual: frame[4],
        });
    }

    let rel_humidity_pct = f64::from(u16::from_be_bytes([frame[0], frame[1]])) / 10.0;
    if rel_humidity_pct > 100.0 {
        return Err(Error::OutOfRange {
            sensor: SENSOR_NAME,
            quantity: "humidity",
            value: rel_humidity_pct,
        });
    }

    let magnitude = f64::from(u16::from_be_bytes([frame[2] & 0x7F, frame[3]])) / 10.0;
    let temperature_c = if frame[2] & 0x80 == 0 {
        magnitude
    } else {
        -magnitude
    };
    if !TEMPERATURE_RANGE.contains(&temperature_c) {
        return Err(Error::OutOfRange {
            sensor: SENSOR_NAME,
            quantity: "temperature",
            value: temperature_c,
        });
    }

    Ok(ClimateReading {
        temperature_c,
        rel_humidity_pct,
    })
}

/// Something that runs one DHT22 transaction and returns the raw frame.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// Read one undecoded 5-byte frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction did not complete.
    async fn read_frame(&mut self) -> Result<[u8; 5]>;
}

/// A DHT22 behind any [`FrameSource`], with retries.
///
/// Consecutive transactions, retries included, are kept at least
/// [`MIN_READ_SPACING`] apart.
#[derive(Debug)]
pub struct Dht22Sensor<S> {
    source: S,
    retries: u32,
    last_attempt: Option<Instant>,
}

impl<S: FrameSource> Dht22Sensor<S> {
    /// Wrap `source`, making up to `retries` attempts per reading.
    #[must_use]
    pub fn new(source: S, retries: u32) -> Self {
        Self {
            source,
            retries: retries.max(1),
            last_attempt: None,
        }
    }

    async fn attempt(&mut self) -> Result<ClimateReading> {
        if let Some(last) = self.last_attempt {
            let since = last.elapsed();
            if since < MIN_READ_SPACING {
                tokio::time::sleep(MIN_READ_SPACING - since).await;
            }
        }
        self.last_attempt = Some(Instant::now());

        let frame = self.source.read_frame().await?;
        decode_frame(&frame)
    }
}

#[async_trait::async_trait]
impl<S: FrameSource> ClimateSensor for Dht22Sensor<S> {
    fn name(&self) -> &'static str {
        SENSOR_NAME
    }

    async fn read(&mut self) -> Result<ClimateReading> {
        let mut last_error = None;
        for attempt in 1..=self.retries {
            match self.attempt().await {
                Ok(reading) => return Ok(reading),
                // Host-side failures will not go away on retry.
                Err(e) if !e.is_sensor_error() => return Err(e),
                Err(e) => {
                    debug!(attempt, error = %e, "DHT22 attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::sensor_read(SENSOR_NAME, "no attempts made")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Replays canned frames and notes when each transaction starts.
    struct ScriptedFrames {
        frames: VecDeque<Result<[u8; 5]>>,
        started: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedFrames {
        fn new(frames: Vec<Result<[u8; 5]>>) -> (Self, Arc<Mutex<Vec<Instant>>>) {
            let started = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    frames: frames.into(),
                    started: Arc::clone(&started),
                },
                started,
            )
        }
    }

    #[async_trait::async_trait]
    impl FrameSource for ScriptedFrames {
        async fn read_frame(&mut self) -> Result<[u8; 5]> {
            self.started.lock().unwrap().push(Instant::now());
            self.frames
                .pop_front()
                .unwrap_or_else(|| Err(Error::sensor_read(SENSOR_NAME, "no response")))
        }
    }

    const GOOD: [u8; 5] = [0x02, 0x8C, 0x01, 0x5F, 0xEE];
    const CORRUPT: [u8; 5] = [0x02, 0x8C, 0x01, 0x5F, 0x00];

    fn offsets(started: &Arc<Mutex<Vec<Instant>>>, origin: Instant) -> Vec<u64> {
        started
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.duration_since(origin).as_secs())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_spaced() {
        let (source, started) = ScriptedFrames::new(vec![Ok(CORRUPT), Ok(CORRUPT), Ok(GOOD)]);
        let mut sensor = Dht22Sensor::new(source, 3);
        let origin = Instant::now();

        let reading = sensor.read().await.unwrap();
        assert!((reading.temperature_c - 35.1).abs() < 1e-9);
        assert_eq!(offsets(&started, origin), vec![0, 2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_holds_across_readings() {
        let (source, started) = ScriptedFrames::new(vec![Ok(GOOD), Ok(GOOD), Ok(GOOD)]);
        let mut sensor = Dht22Sensor::new(source, 1);
        let origin = Instant::now();

        sensor.read().await.unwrap();
        sensor.read().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        sensor.read().await.unwrap();

        // The third read was already far enough from the second one.
        assert_eq!(offsets(&started, origin), vec![0, 2, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_with_last_error() {
        let (source, started) = ScriptedFrames::new(vec![Ok(CORRUPT), Ok(CORRUPT)]);
        let mut sensor = Dht22Sensor::new(source, 2);

        let err = sensor.read().await.unwrap_err();
        assert!(matches!(err, Error::Checksum { .. }));
        assert_eq!(started.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_error_is_not_retried() {
        let (source, started) =
            ScriptedFrames::new(vec![Err(Error::internal("read task failed")), Ok(GOOD)]);
        let mut sensor = Dht22Sensor::new(source, 3);

        let err = sensor.read().await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(started.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let (source, _) = ScriptedFrames::new(Vec::new());
        assert_eq!(Dht22Sensor::new(source, 0).retries, 1);
    }

    fn with_checksum(bytes: [u8; 4]) -> [u8; 5] {
        let sum = bytes.iter().fold(0u8, |s, b| s.wrapping_add(*b));
        [bytes[0], bytes[1], bytes[2], bytes[3], sum]
    }

    #[test]
    fn test_decode_datasheet_example() {
        let reading = decode_frame(&[0x02, 0x8C, 0x01, 0x5F, 0xEE]).unwrap();
        assert!((reading.rel_humidity_pct - 65.2).abs() < 1e-9);
        assert!((reading.temperature_c - 35.1).abs() < 1e-9);
    }

    #[test]
    fn test_decode_negative_temperature() {
        // -10.1 °C
        let frame = with_checksum([0x01, 0xF4, 0x80, 0x65]);
        let reading = decode_frame(&frame).unwrap();
        assert!((reading.temperature_c + 10.1).abs() < 1e-9);
        assert!((reading.rel_humidity_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let err = decode_frame(&[0x02, 0x8C, 0x01, 0x5F, 0xEF]).unwrap_err();
        assert!(matches!(
            err,
            Error::Checksum {
                expected: 0xEE,
                actual: 0xEF,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_checksum_wraps() {
        let frame = with_checksum([0x03, 0x84, 0x00, 0xFA]);
        assert_eq!(frame[4], 0x81);
        let reading = decode_frame(&frame).unwrap();
        assert!((reading.rel_humidity_pct - 90.0).abs() < 1e-9);
        assert!((reading.temperature_c - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_humidity_out_of_range() {
        // 100.1 %
        let frame = with_checksum([0x03, 0xE9, 0x00, 0xC8]);
        let err = decode_frame(&frame).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfRange {
                quantity: "humidity",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_temperature_out_of_range() {
        // 85.0 °C
        let frame = with_checksum([0x01, 0xF4, 0x03, 0x52]);
        let err = decode_frame(&frame).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfRange {
                quantity: "temperature",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_all_zero_frame() {
        // A line stuck low decodes to zeros with a valid checksum.
        let reading = decode_frame(&[0, 0, 0, 0, 0]).unwrap();
        assert!(reading.temperature_c.abs() < f64::EPSILON);
        assert!(reading.rel_humidity_pct.abs() < f64::EPSILON);
    }
}
