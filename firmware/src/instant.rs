//! Monotonic instant used by the engine and telemetry on the board.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::ops::Add;
use core::time::Duration as CoreDuration;

use embassy_time::{Duration, Instant, TICK_HZ};
use node_core::telemetry::TelemetryInstant;

/// Wrapper around Embassy's [`Instant`] that speaks `core::time::Duration`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    /// Reads the time driver.
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(Instant::from_micros(micros))
    }

    pub const fn into_embassy(self) -> Instant {
        self.0
    }

    pub fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(value: Instant) -> Self {
        Self(value)
    }
}

impl Add<CoreDuration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: CoreDuration) -> Self {
        let delta = core_duration_to_embassy(rhs);
        Self(self.0.checked_add(delta).unwrap_or(Instant::MAX))
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> CoreDuration {
        let elapsed = self.0.saturating_duration_since(earlier.0);
        CoreDuration::from_micros(elapsed.as_micros())
    }
}

/// Converts a `core` duration, rounding up to whole ticks and saturating at
/// [`Duration::MAX`].
pub fn core_duration_to_embassy(duration: CoreDuration) -> Duration {
    // A `core` duration in microseconds times any tick rate fits in a u128.
    let ticks = (duration.as_micros() * u128::from(TICK_HZ)).div_ceil(1_000_000);
    u64::try_from(ticks).map_or(Duration::MAX, Duration::from_ticks)
}
