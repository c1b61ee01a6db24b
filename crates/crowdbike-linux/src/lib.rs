//! Linux-specific hardware access for crowdbike.
//!
//! This crate talks to the Raspberry Pi peripherals the rig is wired to:
//! the DHT22 on a GPIO pin, the serial UART used by the GPS receiver and
//! the USB serial particulate sensor, plus the sysfs and boot configuration
//! files used by the setup checks.

#![cfg(target_os = "linux")]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod boot;
pub mod gpio;
pub mod serial;
pub mod sysfs;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use boot::{boot_config_path, device_present, uart_enabled};
pub use gpio::{bits_to_frame, gpio_available, Dht22Line, DHT22_FRAME_BITS};
pub use serial::{open_serial, ClearBuffer, SerialPort};
pub use sysfs::mac_address;

/// Errors raised while accessing Linux hardware.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The GPIO controller or a pin could not be opened.
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    /// The sensor did not toggle the line within the expected window.
    #[error("timed out after {elapsed:?} during {phase}")]
    PulseTimeout {
        /// Which part of the transaction was waiting.
        phase: &'static str,
        /// How long we waited.
        elapsed: Duration,
    },

    /// A serial device could not be opened.
    #[error("failed to open serial device {path}: {source}")]
    SerialOpen {
        /// Device path.
        path: String,
        /// The underlying error.
        #[source]
        source: serialport::Error,
    },

    /// A sysfs or configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that could not be read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;
