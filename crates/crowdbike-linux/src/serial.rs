//! Serial device access.

use std::time::Duration;

pub use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

use crate::{HardwareError, Result};

/// Open a serial device in raw 8N1 mode.
///
/// Reads block for at most `timeout` before returning
/// [`std::io::ErrorKind::TimedOut`], which lets polling loops check for
/// shutdown between reads.
///
/// # Errors
///
/// Returns [`HardwareError::SerialOpen`] if the device cannot be opened.
pub fn open_serial(path: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    debug!(path, baud_rate, "Opening serial device");
    serialport::new(path, baud_rate)
        .timeout(timeout)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(|source| HardwareError::SerialOpen {
            path: path.to_string(),
            source,
        })
}
