//! Client for the gpsd JSON protocol.
//!
//! After connecting, the client sends a `?WATCH` command and gpsd streams
//! one JSON object per line. `TPV` reports carry the position; `SKY`
//! reports carry satellite usage. Every other class is ignored.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use super::{sleep_unless_stopped, FixHandle, FixMode, GpsFix, PositionSource};
use crate::error::{Error, Result};
use crate::physics::metres_per_second_to_kmh;
use crate::sensor::StopHandle;

/// Command enabling JSON reports.
const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// How long one line may take before the stop flag is checked again.
const LINE_TIMEOUT: Duration = Duration::from_millis(500);

/// Silence after which the connection is considered dead.
const SILENCE_LIMIT: Duration = Duration::from_secs(10);

/// How long a connection attempt may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One gpsd report.
#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum Report {
    #[serde(rename = "TPV")]
    Tpv(Tpv),
    #[serde(rename = "SKY")]
    Sky(Sky),
    #[serde(other)]
    Other,
}

/// Time-position-velocity report.
#[derive(Debug, Default, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    time: Option<DateTime<Utc>>,
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    #[serde(rename = "altMSL")]
    alt_msl: Option<f64>,
    /// Metres per second.
    speed: Option<f64>,
}

/// Sky view report.
#[derive(Debug, Default, Deserialize)]
struct Sky {
    #[serde(rename = "uSat")]
    used: Option<u32>,
    satellites: Option<Vec<Satellite>>,
}

#[derive(Debug, Deserialize)]
struct Satellite {
    #[serde(default)]
    used: bool,
}

impl Tpv {
    fn apply(self, fix: &mut GpsFix) {
        fix.mode = match self.mode {
            2 => FixMode::Fix2d,
            3 => FixMode::Fix3d,
            _ => FixMode::NoFix,
        };
        if fix.mode == FixMode::NoFix {
            fix.speed_kmh = None;
            return;
        }

        fix.time = self.time.or(fix.time);
        fix.latitude = self.lat;
        fix.longitude = self.lon;
        fix.altitude = self.alt_msl.or(self.alt);
        fix.speed_kmh = self.speed.map(metres_per_second_to_kmh);
    }
}

impl Sky {
    fn used_count(&self) -> Option<u32> {
        self.used.or_else(|| {
            self.satellites.as_ref().map(|sats| {
                u32::try_from(sats.iter().filter(|s| s.used).count()).unwrap_or(u32::MAX)
            })
        })
    }
}

/// Apply one line of gpsd output to `fix`.
///
/// Returns whether the line changed the fix.
///
/// # Errors
///
/// Returns [`Error::Json`] if the line is not a gpsd report.
pub fn apply_report(line: &str, fix: &FixHandle) -> Result<bool> {
    match serde_json::from_str::<Report>(line)? {
        Report::Tpv(tpv) => {
            fix.update(|f| tpv.apply(f));
            Ok(true)
        }
        Report::Sky(sky) => match sky.used_count() {
            Some(count) => {
                fix.update(|f| f.satellites = Some(count));
                Ok(true)
            }
            None => Ok(false),
        },
        Report::Other => Ok(false),
    }
}

/// Reads fixes from a gpsd daemon.
#[derive(Debug, Clone)]
pub struct GpsdSource {
    address: String,
    reconnect_delay: Duration,
}

impl GpsdSource {
    /// Create a source for gpsd at `address` (`host:port`).
    #[must_use]
    pub fn new(address: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            address: address.into(),
            reconnect_delay,
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let connecting = TcpStream::connect(&self.address);
        match tokio::time::timeout(CONNECT_TIMEOUT, connecting).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(Error::GpsConnect {
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(Error::timeout(
                format!("connecting to gpsd at {}", self.address),
                CONNECT_TIMEOUT,
            )),
        }
    }
}

/// Drive one gpsd connection until it drops or `stop` is signalled.
///
/// # Errors
///
/// Returns an error if the connection closes, goes silent, or fails.
pub async fn watch<S>(stream: S, fix: &FixHandle, stop: &StopHandle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    writer.write_all(WATCH_COMMAND).await?;
    writer.flush().await?;

    let mut lines = BufReader::new(reader).lines();
    let mut silent_for = Duration::ZERO;

    while !stop.should_stop() {
        match tokio::time::timeout(LINE_TIMEOUT, lines.next_line()).await {
            Err(_) => {
                silent_for += LINE_TIMEOUT;
                if silent_for >= SILENCE_LIMIT {
                    return Err(Error::timeout("waiting for gpsd reports", SILENCE_LIMIT));
                }
            }
            Ok(Ok(Some(line))) => {
                silent_for = Duration::ZERO;
                if let Err(e) = apply_report(&line, fix) {
                    trace!(error = %e, "Skipping gpsd line");
                }
            }
            Ok(Ok(None)) => return Err(Error::gps_protocol("gpsd closed the connection")),
            Ok(Err(e)) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl PositionSource for GpsdSource {
    fn name(&self) -> &'static str {
        "gpsd"
    }

    async fn run(&mut self, fix: FixHandle, stop: StopHandle) -> Result<()> {
        while !stop.should_stop() {
            match self.connect().await {
                Ok(stream) => {
                    info!(address = %self.address, "Connected to gpsd");
                    match watch(stream, &fix, &stop).await {
                        Ok(()) => debug!("gpsd watch stopped"),
                        Err(e) => warn!(error = %e, "Lost gpsd connection"),
                    }
                }
                Err(e) => warn!(error = %e, "Cannot reach gpsd"),
            }

            fix.clear();
            if !stop.should_stop() {
                sleep_unless_stopped(self.reconnect_delay, &stop).await;
            }
        }
        Ok(())
    }
}
