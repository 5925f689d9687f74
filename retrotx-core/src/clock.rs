//! Injected time source.
//!
//! Teletext packet 8/30, VITC and Eurocrypt dates all stamp wall-clock
//! time into the signal. Routing them through a trait keeps golden-file
//! tests deterministic.

use chrono::{DateTime, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock: the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Frozen clock for deterministic output.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0, 0).single().expect("valid epoch")
    }
}

/// Modified Julian Date of a calendar day, as carried in teletext
/// packet 8/30.
pub fn mjd(year: i32, month: u32, day: u32) -> i32 {
    let y = year as f64;
    let m = month as f64;
    let d = day as f64;
    (367.0 * y - (7.0 * (y + ((m + 9.0) / 12.0).floor()) / 4.0).floor()
        + (275.0 * m / 9.0).floor()
        + d
        - 678987.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn fixed_clock_is_stable() {
        let c = FixedClock(946684800); // 2000-01-01T00:00:00Z
        assert_eq!(c.now().year(), 2000);
        assert_eq!(c.now(), c.now());
    }

    #[test]
    fn mjd_epoch_points() {
        assert_eq!(mjd(1858, 11, 17), 0);
        assert_eq!(mjd(2000, 1, 1), 51544);
    }
}
