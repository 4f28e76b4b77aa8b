//! Embassy-backed clocks for the passthrough engine.

use core::time::Duration;

use auth_core::bridge::BridgeDelay;
use auth_core::telemetry::TelemetryInstant;
use embassy_time::{Duration as EmbassyDuration, Instant};

/// Monotonic timestamp handed to the engine and telemetry ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(Instant::from_micros(micros))
    }

    /// Reads the time driver.
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub const fn into_embassy(self) -> Instant {
        self.0
    }

    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }
}

/// Converts to embassy's tick-based duration, saturating at the maximum.
#[must_use]
pub fn to_embassy(duration: Duration) -> EmbassyDuration {
    EmbassyDuration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

/// Busy-waits on the time driver; the bridge settle times are a few milliseconds.
#[derive(Copy, Clone, Debug, Default)]
pub struct FirmwareDelay;

impl BridgeDelay for FirmwareDelay {
    fn delay(&mut self, duration: Duration) {
        embassy_time::block_for(to_embassy(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_time_saturates_at_zero() {
        let early = FirmwareInstant::from_micros(1_000);
        let late = FirmwareInstant::from_micros(3_500);
        assert_eq!(
            late.saturating_duration_since(early),
            Duration::from_micros(2_500)
        );
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }

    #[test]
    fn conversion_keeps_microsecond_precision() {
        assert_eq!(to_embassy(Duration::from_millis(10)).as_micros(), 10_000);
    }
}
