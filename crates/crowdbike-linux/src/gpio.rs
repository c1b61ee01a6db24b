//! DHT22 single-wire transactions on a Raspberry Pi GPIO pin.
//!
//! The host pulls the line low for at least 1 ms to request a reading. The
//! sensor answers with an 80 µs low / 80 µs high handshake followed by 40
//! bits. Every bit starts with a ~50 µs low phase; the length of the high
//! phase that follows encodes the value (26-28 µs for 0, ~70 µs for 1).
//!
//! Timing is measured by busy-polling the pin, so a reading can be lost to
//! scheduler jitter. Callers are expected to retry.

use std::thread;
use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, IoPin, Level, Bias, Mode};
use tracing::trace;

use crate::{HardwareError, Result};

/// Number of data bits in one DHT22 transaction.
pub const DHT22_FRAME_BITS: usize = 40;

/// High pulses longer than this are read as a 1 bit.
const ONE_BIT_THRESHOLD: Duration = Duration::from_micros(48);

/// Host start signal length.
const START_SIGNAL: Duration = Duration::from_micros(1_100);

/// Upper bound for any single level change during a transaction.
const EDGE_TIMEOUT: Duration = Duration::from_micros(200);

/// A GPIO pin wired to a DHT22 data line.
#[derive(Debug)]
pub struct Dht22Line {
    pin: IoPin,
    bcm: u8,
}

impl Dht22Line {
    /// Claim the given BCM pin for DHT22 transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if the GPIO controller is unavailable or the pin is
    /// already in use.
    pub fn open(bcm: u8) -> Result<Self> {
        let mut pin = Gpio::new()?.get(bcm)?.into_io(Mode::Input);
        pin.set_bias(Bias::PullUp);
        Ok(Self { pin, bcm })
    }

    /// Run one transaction and return the raw 5-byte frame.
    ///
    /// The checksum is not verified here.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::PulseTimeout`] if the sensor stops answering
    /// part way through the transaction.
    pub fn read_frame(&mut self) -> Result<[u8; 5]> {
        self.send_start_signal();

        self.wait_for(Level::Low, "response low")?;
        self.wait_for(Level::High, "response high")?;
        self.wait_for(Level::Low, "response end")?;

        let mut widths = [Duration::ZERO; DHT22_FRAME_BITS];
        for width in &mut widths {
            self.wait_for(Level::High, "bit start")?;
            *width = self.wait_for(Level::Low, "bit value")?;
        }

        trace!(pin = self.bcm, ?widths, "DHT22 pulse widths");
        Ok(bits_to_frame(&widths))
    }

    fn send_start_signal(&mut self) {
        self.pin.set_mode(Mode::Output);
        self.pin.set_low();
        thread::sleep(START_SIGNAL);
        self.pin.set_high();
        self.pin.set_mode(Mode::Input);
        self.pin.set_bias(Bias::PullUp);
    }

    /// Spin until the line reaches `level`, returning how long that took.
    fn wait_for(&self, level: Level, phase: &'static str) -> Result<Duration> {
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if self.pin.read() == level {
                return Ok(elapsed);
            }
            if elapsed > EDGE_TIMEOUT {
                return Err(HardwareError::PulseTimeout { phase, elapsed });
            }
        }
    }
}

/// Convert 40 measured high-pulse widths into the 5-byte frame, MSB first.
#[must_use]
pub fn bits_to_frame(widths: &[Duration; DHT22_FRAME_BITS]) -> [u8; 5] {
    let mut frame = [0u8; 5];
    for (i, width) in widths.iter().enumerate() {
        if *width > ONE_BIT_THRESHOLD {
            frame[i / 8] |= 0x80 >> (i % 8);
        }
    }
    frame
}

/// Whether the GPIO controller can be opened by this process.
#[must_use]
pub fn gpio_available() -> bool {
    Gpio::new().is_ok()
}
