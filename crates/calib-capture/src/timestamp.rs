//! Frame timestamps tagged with the clock domain they were taken from.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MILLI: i64 = 1_000_000;

/// Clock domain of a [`Timestamp`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Simulated or middleware time.
    Ros,
    /// Wall-clock time since the Unix epoch.
    #[default]
    System,
    /// Monotonic time with an arbitrary origin.
    Steady,
}

/// Nanoseconds in a given clock domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub nanos: i64,
    pub clock: ClockKind,
}

impl Timestamp {
    pub fn new(nanos: i64, clock: ClockKind) -> Self {
        Self { nanos, clock }
    }

    /// System-clock timestamp.
    pub fn from_nanos(nanos: i64) -> Self {
        Self::new(nanos, ClockKind::System)
    }

    /// System-clock timestamp from (possibly fractional) seconds.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::from_nanos((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_nanos(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    /// Signed seconds elapsed since `earlier`.
    #[inline]
    pub fn seconds_since(&self, earlier: Timestamp) -> f64 {
        (self.nanos - earlier.nanos) as f64 / NANOS_PER_SEC as f64
    }

    /// Signed milliseconds elapsed since `earlier`, truncated.
    #[inline]
    pub fn millis_since(&self, earlier: Timestamp) -> i64 {
        (self.nanos - earlier.nanos) / NANOS_PER_MILLI
    }

    /// `YYYY-MM-DD HH:MM:SS.mmm` in the local time zone.
    pub fn to_date_string(&self) -> String {
        self.to_local().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }

    /// The stamp read as nanoseconds since the Unix epoch.
    pub fn to_local(&self) -> DateTime<Local> {
        DateTime::from_timestamp_nanos(self.nanos).with_timezone(&Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Datelike, Timelike};

    #[test]
    fn date_string_is_local_time_with_millis() {
        let ts = Timestamp::from_nanos(1_700_000_000_123_456_789);
        let local = ts.to_local();
        assert_eq!(local.timestamp(), 1_700_000_000);
        let expected = format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.123",
            local.year(),
            local.month(),
            local.day(),
            local.hour(),
            local.minute(),
            local.second()
        );
        assert_eq!(ts.to_date_string(), expected);
    }

    #[test]
    fn now_is_after_2020() {
        assert!(Timestamp::now().nanos > 1_577_836_800 * NANOS_PER_SEC);
    }

    #[test]
    fn elapsed_helpers() {
        let a = Timestamp::from_secs_f64(1.0);
        let b = Timestamp::from_secs_f64(1.75);
        assert_eq!(b.millis_since(a), 750);
        assert!((b.seconds_since(a) - 0.75).abs() < 1e-12);
        assert!(a.seconds_since(b) < 0.0);
    }
}
