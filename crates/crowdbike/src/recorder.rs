//! The sampling loop.
//!
//! Every tick the recorder looks at the latest GPS fix. Without a fix the
//! tick is skipped; otherwise the climate and particulate sensors are read,
//! calibration is applied and the resulting [`Record`] goes to every sink.
//! The record counter advances on every tick, so gaps in the numbering
//! show where the fix was lost.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::calibration::Calibration;
use crate::gps::FixHandle;
use crate::record::{Identity, Record};
use crate::sensor::{ClimateSensor, ParticulateSensor, StopHandle};
use crate::sink::RecordSink;

/// Counters for one recorder run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecorderSummary {
    /// Ticks processed.
    pub ticks: u64,
    /// Records accepted by at least one sink.
    pub written: u64,
    /// Ticks skipped for lack of a GPS fix.
    pub skipped_no_fix: u64,
    /// Records with empty climate fields.
    pub climate_failures: u64,
    /// Records with empty particulate fields while the sensor is fitted.
    pub pm_failures: u64,
    /// Individual sink writes that failed.
    pub sink_failures: u64,
}

/// Samples sensors on a fixed cadence and hands records to sinks.
pub struct Recorder {
    identity: Identity,
    calibration: Calibration,
    climate: Box<dyn ClimateSensor>,
    particulate: Option<Box<dyn ParticulateSensor>>,
    fix: FixHandle,
    sinks: Vec<Box<dyn RecordSink>>,
    interval: Duration,
    counter: u64,
    summary: RecorderSummary,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("identity", &self.identity)
            .field("climate", &self.climate.name())
            .field("particulate", &self.particulate.as_ref().map(|s| s.name()))
            .field(
                "sinks",
                &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("interval", &self.interval)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl Recorder {
    /// Create a recorder with no particulate sensor and no sinks.
    #[must_use]
    pub fn new(
        identity: Identity,
        calibration: Calibration,
        climate: Box<dyn ClimateSensor>,
        fix: FixHandle,
        interval: Duration,
    ) -> Self {
        Self {
            identity,
            calibration,
            climate,
            particulate: None,
            fix,
            sinks: Vec::new(),
            interval,
            counter: 1,
            summary: RecorderSummary::default(),
        }
    }

    /// Add a particulate sensor.
    #[must_use]
    pub fn with_particulate_sensor(mut self, sensor: Box<dyn ParticulateSensor>) -> Self {
        self.particulate = Some(sensor);
        self
    }

    /// Add a destination for records.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number the next tick will get.
    #[must_use]
    pub fn next_record(&self) -> u64 {
        self.counter
    }

    /// Counters so far.
    #[must_use]
    pub fn summary(&self) -> RecorderSummary {
        self.summary
    }

    /// Process one tick at wall-clock time `now`.
    ///
    /// Returns the record built for this tick, or `None` if there was no GPS fix.
    pub async fn sample(&mut self, now: DateTime<Utc>) -> Option<Record> {
        let number = self.counter;
        self.counter += 1;
        self.summary.ticks += 1;

        let fix = self.fix.snapshot();
        if !fix.has_fix() {
            debug!(record = number, "No GPS fix, skipping sample");
            self.summary.skipped_no_fix += 1;
            return None;
        }

        let climate = match self.climate.read().await {
            Ok(reading) => Some(self.calibration.apply(reading)),
            Err(e) => {
                warn!(
                    record = number,
                    sensor = self.climate.name(),
                    error = %e,
                    "Climate sensor read failed"
                );
                self.summary.climate_failures += 1;
                None
            }
        };

        let pm = match &mut self.particulate {
            Some(sensor) => match sensor.read().await {
                Ok(reading) => Some(reading),
                Err(e) => {
                    warn!(
                        record = number,
                        sensor = sensor.name(),
                        error = %e,
                        "Particulate sensor read failed"
                    );
                    self.summary.pm_failures += 1;
                    None
                }
            },
            None => None,
        };

        let record = Record::new(
            &self.identity,
            number,
            now,
            &fix,
            climate.as_ref(),
            pm.as_ref(),
        );

        let mut stored = false;
        for sink in &mut self.sinks {
            match sink.write(&record) {
                Ok(()) => stored = true,
                Err(e) => {
                    warn!(record = number, sink = sink.name(), error = %e, "Sink write failed");
                    self.summary.sink_failures += 1;
                }
            }
        }
        if stored {
            self.summary.written += 1;
        } else if !self.sinks.is_empty() {
            warn!(record = number, "No sink stored the record");
        }

        info!(
            record = number,
            latitude = record.latitude,
            longitude = record.longitude,
            speed = record.speed,
            temperature = record.temperature,
            rel_humidity = record.rel_humidity,
            "Sample recorded"
        );
        Some(record)
    }

    /// Tick until `stop` fires or `max_samples` ticks have run.
    ///
    /// The first tick runs immediately. A tick that overruns the interval
    /// is followed by the next one straight away.
    pub async fn run(&mut self, stop: &StopHandle, max_samples: Option<u64>) -> RecorderSummary {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            first_record = self.counter,
            "Recorder started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            if stop.should_stop() || max_samples.is_some_and(|max| ticks >= max) {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                () = stop.stopped() => break,
            }

            self.sample(Utc::now()).await;
            ticks += 1;
        }

        let summary = self.summary;
        info!(
            ticks = summary.ticks,
            written = summary.written,
            skipped_no_fix = summary.skipped_no_fix,
            climate_failures = summary.climate_failures,
            "Recorder stopped"
        );
        summary
    }
}

/// Resolve when the process receives SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("Shutdown signal received");
    Ok(())
}
