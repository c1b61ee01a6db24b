//! Position fixes.
//!
//! A background [`PositionSource`] keeps a shared [`FixHandle`] up to date;
//! the recorder takes a snapshot of it on every tick.

pub mod gpsd;
pub mod nmea;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sensor::StopHandle;

pub use gpsd::GpsdSource;
pub use nmea::NmeaParser;
#[cfg(target_os = "linux")]
pub use nmea::NmeaSerialSource;

/// How often [`wait_for_fix`] looks at the handle.
const FIX_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Receiver fix dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixMode {
    /// No usable position.
    #[default]
    NoFix,
    /// Horizontal position only.
    Fix2d,
    /// Position and altitude.
    Fix3d,
}

impl std::fmt::Display for FixMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFix => write!(f, "no fix"),
            Self::Fix2d => write!(f, "2D"),
            Self::Fix3d => write!(f, "3D"),
        }
    }
}

/// The latest known receiver state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Fix dimension.
    pub mode: FixMode,
    /// Satellite time of the fix.
    pub time: Option<DateTime<Utc>>,
    /// Latitude in decimal degrees, north positive.
    pub latitude: Option<f64>,
    /// Longitude in decimal degrees, east positive.
    pub longitude: Option<f64>,
    /// Altitude above mean sea level in metres.
    pub altitude: Option<f64>,
    /// Speed over ground in km/h.
    pub speed_kmh: Option<f64>,
    /// Satellites used in the solution.
    pub satellites: Option<u32>,
}

impl GpsFix {
    /// Whether the receiver reports a usable position.
    #[must_use]
    pub fn has_fix(&self) -> bool {
        self.mode != FixMode::NoFix && self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Shared, cloneable cell holding the latest fix.
#[derive(Debug, Clone, Default)]
pub struct FixHandle {
    inner: Arc<RwLock<GpsFix>>,
}

impl FixHandle {
    /// Create a handle with no fix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out the current fix.
    #[must_use]
    pub fn snapshot(&self) -> GpsFix {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current fix.
    pub fn set(&self, fix: GpsFix) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = fix;
    }

    /// Edit the current fix in place.
    pub fn update(&self, f: impl FnOnce(&mut GpsFix)) {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Drop the fix, e.g. after losing the receiver.
    pub fn clear(&self) {
        self.set(GpsFix::default());
    }
}

/// A task that feeds fixes into a [`FixHandle`].
#[async_trait::async_trait]
pub trait PositionSource: Send {
    /// Source name for logs.
    fn name(&self) -> &'static str;

    /// Keep `fix` updated until `stop` is signalled.
    ///
    /// Connection losses are retried internally.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures that retrying cannot fix.
    async fn run(&mut self, fix: FixHandle, stop: StopHandle) -> Result<()>;
}

/// Wait until `fix` reports a usable position.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if no fix arrives in time.
pub async fn wait_for_fix(fix: &FixHandle, timeout: Duration) -> Result<GpsFix> {
    let poll = async {
        loop {
            let current = fix.snapshot();
            if current.has_fix() {
                return current;
            }
            tokio::time::sleep(FIX_POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| Error::timeout("waiting for GPS fix", timeout))
}

/// Sleep for `duration`, waking early if `stop` is signalled.
pub(crate) async fn sleep_unless_stopped(duration: Duration, stop: &StopHandle) {
    let step = Duration::from_millis(100);
    let mut remaining = duration;
    while !remaining.is_zero() && !stop.should_stop() {
        let nap = remaining.min(step);
        tokio::time::sleep(nap).await;
        remaining = remaining.saturating_sub(nap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> GpsFix {
        GpsFix {
            mode: FixMode::Fix3d,
            latitude: Some(51.44),
            longitude: Some(7.26),
            ..GpsFix::default()
        }
    }

    #[test]
    fn test_default_has_no_fix() {
        assert!(!GpsFix::default().has_fix());
    }

    #[test]
    fn test_has_fix_requires_position() {
        let mut fix = fixed();
        assert!(fix.has_fix());

        fix.longitude = None;
        assert!(!fix.has_fix());

        let no_mode = GpsFix {
            mode: FixMode::NoFix,
            ..fixed()
        };
        assert!(!no_mode.has_fix());
    }

    #[test]
    fn test_fix_mode_display() {
        assert_eq!(FixMode::NoFix.to_string(), "no fix");
        assert_eq!(FixMode::Fix2d.to_string(), "2D");
        assert_eq!(FixMode::Fix3d.to_string(), "3D");
    }

    #[test]
    fn test_fix_handle_shared_between_clones() {
        let handle = FixHandle::new();
        let reader = handle.clone();

        handle.set(fixed());
        assert!(reader.snapshot().has_fix());

        handle.update(|f| f.speed_kmh = Some(18.0));
        assert_eq!(reader.snapshot().speed_kmh, Some(18.0));

        handle.clear();
        assert!(!reader.snapshot().has_fix());
    }

    #[tokio::test]
    async fn test_wait_for_fix_immediate() {
        let handle = FixHandle::new();
        handle.set(fixed());
        let fix = wait_for_fix(&handle, Duration::from_secs(1)).await.unwrap();
        assert_eq!(fix.mode, FixMode::Fix3d);
    }

    #[tokio::test]
    async fn test_wait_for_fix_arrives_later() {
        let handle = FixHandle::new();
        let writer = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            writer.set(fixed());
        });

        let fix = wait_for_fix(&handle, Duration::from_secs(5)).await.unwrap();
        assert!(fix.has_fix());
    }

    #[tokio::test]
    async fn test_wait_for_fix_times_out() {
        let handle = FixHandle::new();
        let err = wait_for_fix(&handle, Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_sleep_unless_stopped_wakes_early() {
        let stop = StopHandle::new();
        stop.stop();
        let started = std::time::Instant::now();
        sleep_unless_stopped(Duration::from_secs(10), &stop).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
