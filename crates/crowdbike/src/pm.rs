//! Nova SDS011 particulate sensor protocol.
//!
//! In its default active mode the sensor emits one 10-byte frame per second:
//!
//! ```text
//! AA C0 D1 D2 D3 D4 D5 D6 CS AB
//! ```
//!
//! `D1..D2` is PM2.5 and `D3..D4` is PM10, little endian, in tenths of
//! µg/m³. `D5..D6` is the device id. `CS` is the low byte of `D1 + .. + D6`.

use std::io::{ErrorKind, Read};

use tracing::trace;

use crate::error::{Error, Result};
use crate::sensor::PmReading;

/// Sensor name used in errors and logs.
pub const SENSOR_NAME: &str = "SDS011";

/// Length of a data frame.
pub const FRAME_LEN: usize = 10;

const HEADER: u8 = 0xAA;
const COMMAND_DATA: u8 = 0xC0;
const TAIL: u8 = 0xAB;

/// Bytes to scan for a frame before giving up; three frames' worth.
const DEFAULT_BYTE_BUDGET: usize = 3 * FRAME_LEN;

/// Decode and validate a data frame.
///
/// # Errors
///
/// Returns [`Error::SensorRead`] for a bad header, command or tail byte and
/// [`Error::Checksum`] if the payload is corrupt.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Result<PmReading> {
    if frame[0] != HEADER || frame[1] != COMMAND_DATA || frame[9] != TAIL {
        return Err(Error::sensor_read(
            SENSOR_NAME,
            format!("malformed frame {frame:02x?}"),
        ));
    }

    let expected = frame[2..8]
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    if expected != frame[8] {
        return Err(Error::Checksum {
            sensor: SENSOR_NAME,
            expected,
            actual: frame[8],
        });
    }

    Ok(PmReading {
        pm2_5: f64::from(u16::from_le_bytes([frame[2], frame[3]])) / 10.0,
        pm10: f64::from(u16::from_le_bytes([frame[4], frame[5]])) / 10.0,
    })
}

/// Pulls data frames out of a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    byte_budget: usize,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a serial port or any other byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            byte_budget: DEFAULT_BYTE_BUDGET,
        }
    }

    /// Change how many bytes may be skipped while looking for a frame.
    #[must_use]
    pub fn with_byte_budget(mut self, byte_budget: usize) -> Self {
        self.byte_budget = byte_budget.max(FRAME_LEN);
        self
    }

    /// Read the next valid frame.
    ///
    /// Frames failing validation are skipped while the byte budget lasts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SensorRead`] if the source timed out, the budget ran
    /// out or the stream ended, and [`Error::Io`] for other read failures.
    pub fn read_frame(&mut self) -> Result<PmReading> {
        let mut consumed = 0usize;
        let mut frame = [0u8; FRAME_LEN];

        while consumed + FRAME_LEN <= self.byte_budget {
            let byte = self.read_byte()?;
            consumed += 1;
            if byte != HEADER {
                continue;
            }

            frame[0] = byte;
            self.read_exact(&mut frame[1..])?;
            consumed += FRAME_LEN - 1;

            match decode_frame(&frame) {
                Ok(reading) => return Ok(reading),
                Err(e) => trace!(error = %e, "Skipping SDS011 frame"),
            }
        }

        Err(Error::sensor_read(
            SENSOR_NAME,
            format!("no valid frame within {consumed} bytes"),
        ))
    }

    /// Access the wrapped source, e.g. to flush a serial buffer.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                Error::sensor_read(SENSOR_NAME, "timed out waiting for data")
            }
            ErrorKind::UnexpectedEof => Error::sensor_read(SENSOR_NAME, "stream ended"),
            _ => Error::Io(e),
        })
    }
}
