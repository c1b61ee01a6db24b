//! NMEA 0183 parsing for receivers wired straight to the Pi's UART.
//!
//! Only the sentences that carry what a sample needs are handled: GGA
//! (position, altitude, satellites), RMC (date, speed) and GSA (fix
//! dimension). Any talker id is accepted, so `$GP`, `$GN` and `$GL`
//! receivers all work.

use std::io::{BufRead, ErrorKind};

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, trace};

use super::{FixHandle, FixMode, GpsFix};
use crate::error::{Error, Result};
use crate::physics::knots_to_kmh;
use crate::sensor::StopHandle;

/// GPS, combined GNSS and GLONASS talkers.
const TALKERS: [&str; 3] = ["GP", "GN", "GL"];

/// Sentence types the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentence {
    /// Fix data.
    Gga,
    /// Recommended minimum data.
    Rmc,
    /// DOP and active satellites.
    Gsa,
}

/// Accumulates NMEA sentences into a [`GpsFix`].
#[derive(Debug, Clone, Default)]
pub struct NmeaParser {
    fix: GpsFix,
    date: Option<NaiveDate>,
    time_of_day: Option<NaiveTime>,
}

impl NmeaParser {
    /// Create a parser with no fix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The fix assembled so far.
    #[must_use]
    pub fn fix(&self) -> &GpsFix {
        &self.fix
    }

    /// Feed one sentence.
    ///
    /// Returns `Ok(None)` for well-formed sentences of other types or from
    /// other talkers, including proprietary `$P...` sentences.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GpsProtocol`] if the sentence is malformed or its
    /// checksum does not match.
    pub fn parse(&mut self, line: &str) -> Result<Option<Sentence>> {
        let body = verify_checksum(line.trim())?;
        let fields: Vec<&str> = body.split(',').collect();
        let kind = fields[0];
        let (Some(talker), Some(message)) = (kind.get(..2), kind.get(2..)) else {
            return Err(Error::gps_protocol(format!("bad sentence id '{kind}'")));
        };
        if !TALKERS.contains(&talker) || message.len() != 3 {
            trace!(id = kind, "Ignoring sentence");
            return Ok(None);
        }

        let sentence = match message {
            "GGA" => {
                self.parse_gga(&fields)?;
                Sentence::Gga
            }
            "RMC" => {
                self.parse_rmc(&fields)?;
                Sentence::Rmc
            }
            "GSA" => {
                self.parse_gsa(&fields)?;
                Sentence::Gsa
            }
            _ => return Ok(None),
        };
        self.refresh_time();
        Ok(Some(sentence))
    }

    fn parse_gga(&mut self, fields: &[&str]) -> Result<()> {
        require_fields(fields, 10)?;

        if let Some(time) = parse_time(fields[1]) {
            self.time_of_day = Some(time);
        }

        let quality: u8 = fields[6].parse().unwrap_or(0);
        if quality == 0 {
            self.fix.mode = FixMode::NoFix;
        } else if self.fix.mode == FixMode::NoFix {
            self.fix.mode = FixMode::Fix2d;
        }

        self.fix.latitude = parse_coordinate(fields[2], fields[3]);
        self.fix.longitude = parse_coordinate(fields[4], fields[5]);
        self.fix.satellites = fields[7].parse().ok();
        self.fix.altitude = fields[9].parse().ok();
        Ok(())
    }

    fn parse_rmc(&mut self, fields: &[&str]) -> Result<()> {
        require_fields(fields, 10)?;

        if let Some(time) = parse_time(fields[1]) {
            self.time_of_day = Some(time);
        }
        if let Some(date) = parse_date(fields[9]) {
            self.date = Some(date);
        }

        if fields[2] == "A" {
            if self.fix.mode == FixMode::NoFix {
                self.fix.mode = FixMode::Fix2d;
            }
            self.fix.latitude = parse_coordinate(fields[3], fields[4]);
            self.fix.longitude = parse_coordinate(fields[5], fields[6]);
            self.fix.speed_kmh = fields[7].parse().ok().map(knots_to_kmh);
        } else {
            self.fix.mode = FixMode::NoFix;
            self.fix.speed_kmh = None;
        }
        Ok(())
    }

    fn parse_gsa(&mut self, fields: &[&str]) -> Result<()> {
        require_fields(fields, 3)?;

        self.fix.mode = match fields[2] {
            "2" => FixMode::Fix2d,
            "3" => FixMode::Fix3d,
            _ => FixMode::NoFix,
        };
        Ok(())
    }

    fn refresh_time(&mut self) {
        if let (Some(date), Some(time)) = (self.date, self.time_of_day) {
            self.fix.time = Some(date.and_time(time).and_utc());
        }
    }
}

/// Read sentences from `reader` into `fix` until the stream ends or `stop`
/// is signalled.
///
/// Read timeouts are treated as a quiet line; bytes already received are
/// kept for the next attempt.
///
/// # Errors
///
/// Returns [`Error::Io`] for read failures other than timeouts.
pub fn read_stream<R: BufRead>(
    mut reader: R,
    parser: &mut NmeaParser,
    fix: &FixHandle,
    stop: &StopHandle,
) -> Result<()> {
    let mut line = Vec::with_capacity(128);

    while !stop.should_stop() {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                debug!("NMEA stream ended");
                return Ok(());
            }
            Ok(_) => {
                if line.ends_with(b"\n") {
                    handle_line(&line, parser, fix);
                    line.clear();
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

fn handle_line(line: &[u8], parser: &mut NmeaParser, fix: &FixHandle) {
    let Ok(text) = std::str::from_utf8(line) else {
        trace!("Skipping non-UTF-8 NMEA line");
        return;
    };
    if !text.starts_with('$') {
        return;
    }
    match parser.parse(text) {
        Ok(Some(_)) => fix.set(parser.fix().clone()),
        Ok(None) => {}
        Err(e) => trace!(error = %e, "Skipping NMEA sentence"),
    }
}

/// Check the `*hh` checksum and return the text between `$` and `*`.
fn verify_checksum(sentence: &str) -> Result<&str> {
    let rest = sentence
        .strip_prefix('$')
        .ok_or_else(|| Error::gps_protocol("sentence does not start with '$'"))?;
    let (body, checksum) = rest
        .split_once('*')
        .ok_or_else(|| Error::gps_protocol("sentence has no checksum"))?;

    let expected = u8::from_str_radix(checksum.get(..2).unwrap_or(checksum), 16)
        .map_err(|_| Error::gps_protocol(format!("bad checksum field '{checksum}'")))?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
    if actual != expected {
        return Err(Error::gps_protocol(format!(
            "checksum mismatch: expected {expected:02X}, computed {actual:02X}"
        )));
    }
    Ok(body)
}

fn require_fields(fields: &[&str], count: usize) -> Result<()> {
    if fields.len() < count {
        return Err(Error::gps_protocol(format!(
            "{} has {} fields, expected at least {count}",
            fields[0],
            fields.len()
        )));
    }
    Ok(())
}

/// Parse `hhmmss` with optional fractional seconds.
fn parse_time(field: &str) -> Option<NaiveTime> {
    if field.len() < 6 {
        return None;
    }
    let hour = field.get(0..2)?.parse().ok()?;
    let minute = field.get(2..4)?.parse().ok()?;
    let seconds: f64 = field.get(4..)?.parse().ok()?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = ((seconds.fract() * 1000.0).round() as u32).min(999);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = seconds.trunc() as u32;
    NaiveTime::from_hms_milli_opt(hour, minute, whole, millis)
}

/// Parse `ddmmyy`; two-digit years are taken as 20xx.
fn parse_date(field: &str) -> Option<NaiveDate> {
    if field.len() != 6 {
        return None;
    }
    let day = field.get(0..2)?.parse().ok()?;
    let month = field.get(2..4)?.parse().ok()?;
    let year: i32 = field.get(4..6)?.parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// Parse `(d)ddmm.mmmm` plus hemisphere into signed decimal degrees.
fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }
    let dot = value.find('.').unwrap_or(value.len());
    if dot < 2 {
        return None;
    }
    let degrees: f64 = if dot == 2 {
        0.0
    } else {
        value.get(..dot - 2)?.parse().ok()?
    };
    let minutes: f64 = value.get(dot - 2..)?.parse().ok()?;
    let magnitude = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Some(magnitude),
        "S" | "W" => Some(-magnitude),
        _ => None,
    }
}

/// Reads NMEA from a serial-attached receiver.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone)]
pub struct NmeaSerialSource {
    device: String,
    baud: u32,
    reconnect_delay: std::time::Duration,
}

#[cfg(target_os = "linux")]
impl NmeaSerialSource {
    /// Per-read timeout; bounds how long a stop request can go unnoticed.
    const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(500);

    /// Create a source for `device` at `baud`.
    #[must_use]
    pub fn new(
        device: impl Into<String>,
        baud: u32,
        reconnect_delay: std::time::Duration,
    ) -> Self {
        Self {
            device: device.into(),
            baud,
            reconnect_delay,
        }
    }

    fn run_blocking(&self, fix: &FixHandle, stop: &StopHandle) {
        let mut parser = NmeaParser::new();

        while !stop.should_stop() {
            let opened =
                crowdbike_linux::open_serial(&self.device, self.baud, Self::READ_TIMEOUT);
            let port = match opened {
                Ok(port) => port,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        device = %self.device,
                        "Cannot open GPS serial port"
                    );
                    fix.clear();
                    sleep_blocking(self.reconnect_delay, stop);
                    continue;
                }
            };

            tracing::info!(device = %self.device, baud = self.baud, "Reading NMEA");
            if let Err(e) = read_stream(std::io::BufReader::new(port), &mut parser, fix, stop) {
                tracing::warn!(error = %e, "NMEA read failed");
            }
            fix.clear();
            parser = NmeaParser::new();

            if !stop.should_stop() {
                sleep_blocking(self.reconnect_delay, stop);
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn sleep_blocking(duration: std::time::Duration, stop: &StopHandle) {
    let step = std::time::Duration::from_millis(100);
    let mut remaining = duration;
    while !remaining.is_zero() && !stop.should_stop() {
        let nap = remaining.min(step);
        std::thread::sleep(nap);
        remaining = remaining.saturating_sub(nap);
    }
}

#[cfg(target_os = "linux")]
#[async_trait::async_trait]
impl super::PositionSource for NmeaSerialSource {
    fn name(&self) -> &'static str {
        "nmea"
    }

    async fn run(&mut self, fix: FixHandle, stop: StopHandle) -> Result<()> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || source.run_blocking(&fix, &stop))
            .await
            .map_err(|e| Error::internal(format!("NMEA reader task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::{Datelike, Timelike};

    use super::*;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const GSA: &str = "$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39";

    #[test]
    fn test_verify_checksum() {
        assert!(verify_checksum(GGA).is_ok());

        let corrupt = GGA.replace("*47", "*48");
        let err = verify_checksum(&corrupt).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));

        assert!(verify_checksum("GPGGA,1*00").is_err());
        assert!(verify_checksum("$GPGGA,1").is_err());
    }

    #[test]
    fn test_parse_gga() {
        let mut parser = NmeaParser::new();
        assert_eq!(parser.parse(GGA).unwrap(), Some(Sentence::Gga));

        let fix = parser.fix();
        assert_eq!(fix.mode, FixMode::Fix2d);
        assert!((fix.latitude.unwrap() - 48.1173).abs() < 1e-6);
        assert!((fix.longitude.unwrap() - 11.516_666_7).abs() < 1e-6);
        assert_eq!(fix.altitude, Some(545.4));
        assert_eq!(fix.satellites, Some(8));
        // No date yet.
        assert!(fix.time.is_none());
    }

    #[test]
    fn test_parse_rmc_speed_and_date() {
        let mut parser = NmeaParser::new();
        assert_eq!(parser.parse(RMC).unwrap(), Some(Sentence::Rmc));

        let fix = parser.fix();
        assert!((fix.speed_kmh.unwrap() - 22.4 * 1.852).abs() < 1e-9);
        let time = fix.time.unwrap();
        assert_eq!((time.year(), time.month(), time.day()), (1994, 3, 23));
        assert_eq!((time.hour(), time.minute(), time.second()), (12, 35, 19));
    }

    #[test]
    fn test_gsa_sets_mode() {
        let mut parser = NmeaParser::new();
        parser.parse(GGA).unwrap();
        parser.parse(GSA).unwrap();
        assert_eq!(parser.fix().mode, FixMode::Fix3d);

        // A following GGA keeps the 3D mode.
        parser.parse(GGA).unwrap();
        assert_eq!(parser.fix().mode, FixMode::Fix3d);
        assert!(parser.fix().has_fix());
    }

    #[test]
    fn test_gn_talker_and_southern_hemisphere() {
        let mut parser = NmeaParser::new();
        parser
            .parse("$GNGGA,101500.00,3352.128,S,15112.558,W,1,05,1.2,12.0,M,,M,,*51")
            .unwrap();
        let fix = parser.fix();
        assert!((fix.latitude.unwrap() + 33.8688).abs() < 1e-6);
        assert!((fix.longitude.unwrap() + 151.209_3).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_rmc_drops_fix() {
        let mut parser = NmeaParser::new();
        parser.parse(GGA).unwrap();
        assert!(parser.fix().has_fix());

        parser
            .parse("$GNRMC,235959.00,V,,,,,,,010124,,,N*64")
            .unwrap();
        assert_eq!(parser.fix().mode, FixMode::NoFix);
        assert!(parser.fix().speed_kmh.is_none());
    }

    #[test]
    fn test_gga_without_fix() {
        let mut parser = NmeaParser::new();
        parser.parse("$GPGGA,000000,,,,,0,00,,,M,,M,,*66").unwrap();
        let fix = parser.fix();
        assert!(!fix.has_fix());
        assert!(fix.latitude.is_none());
        assert_eq!(fix.satellites, Some(0));
    }

    #[test]
    fn test_glonass_talker_accepted() {
        let mut parser = NmeaParser::new();
        let out = parser
            .parse("$GLGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*5B")
            .unwrap();
        assert_eq!(out, Some(Sentence::Gga));
        assert!(parser.fix().has_fix());
    }

    #[test]
    fn test_other_talkers_ignored() {
        let mut parser = NmeaParser::new();
        let galileo = parser
            .parse("$GAGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*56")
            .unwrap();
        assert_eq!(galileo, None);
        assert!(!parser.fix().has_fix());

        let proprietary = parser.parse("$PMTK001,314,3*36").unwrap();
        assert_eq!(proprietary, None);
    }

    #[test]
    fn test_unhandled_sentence() {
        let mut parser = NmeaParser::new();
        let out = parser
            .parse("$GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00*74")
            .unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn test_parse_time_fractional() {
        let time = parse_time("235959.50").unwrap();
        assert_eq!(time.second(), 59);
        assert_eq!(time.nanosecond(), 500_000_000);
        assert!(parse_time("12").is_none());
    }

    #[test]
    fn test_parse_coordinate_edge_cases() {
        assert!(parse_coordinate("", "N").is_none());
        assert!(parse_coordinate("4807.038", "").is_none());
        assert!(parse_coordinate("4807.038", "X").is_none());
        assert!((parse_coordinate("0030.000", "N").unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_read_stream_updates_handle() {
        let input = format!("garbage\r\n{GSA}\r\n{RMC}\r\n{GGA}\r\n");
        let fix = FixHandle::new();
        let stop = StopHandle::new();
        let mut parser = NmeaParser::new();

        read_stream(Cursor::new(input), &mut parser, &fix, &stop).unwrap();

        let snapshot = fix.snapshot();
        assert!(snapshot.has_fix());
        assert_eq!(snapshot.mode, FixMode::Fix3d);
        assert_eq!(snapshot.altitude, Some(545.4));
        assert!(snapshot.time.is_some());
    }

    #[test]
    fn test_read_stream_honours_stop() {
        let fix = FixHandle::new();
        let stop = StopHandle::new();
        stop.stop();
        let mut parser = NmeaParser::new();

        read_stream(Cursor::new(format!("{GGA}\n")), &mut parser, &fix, &stop).unwrap();
        assert!(!fix.snapshot().has_fix());
    }
}
