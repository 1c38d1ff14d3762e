//! Camera clock encoding and drift checks.
//!
//! The camera keeps a naive wall-clock time. HERO10 interprets it as UTC,
//! later generations as the phone's local time.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

/// Allowed difference between camera and host clocks before a resync
pub const DRIFT_THRESHOLD_SECS: i64 = 5;

/// The get-time answer is about one second stale by the time it is decoded
pub const RESPONSE_LATENCY_SECS: i64 = 1;

/// How the camera's wall-clock fields map to an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeConvention {
    Utc,
    Local,
}

/// Date and time fields as carried by the set/get time commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraClock {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl CameraClock {
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        Self {
            year: dt.year().clamp(0, u16::MAX as i32) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        }
    }

    /// Clock fields for `instant` under `convention`
    pub fn at(instant: DateTime<Utc>, convention: TimeConvention) -> Self {
        match convention {
            TimeConvention::Utc => Self::from_naive(&instant.naive_utc()),
            TimeConvention::Local => Self::from_naive(&instant.with_timezone(&Local).naive_local()),
        }
    }

    /// Parse the first parameter block of a get-time response:
    /// `[year_hi, year_lo, month, day, hour, minute, second, ...]`
    pub fn from_response(values: &[Vec<u8>]) -> Option<Self> {
        let block = values.first()?;
        if block.len() < 7 {
            return None;
        }
        Some(Self {
            year: u16::from_be_bytes([block[0], block[1]]),
            month: block[2],
            day: block[3],
            hour: block[4],
            minute: block[5],
            second: block[6],
        })
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?.and_hms_opt(
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
        )
    }

    /// Seconds since the Unix epoch, or `None` for an impossible date
    pub fn to_epoch_seconds(&self, convention: TimeConvention) -> Option<i64> {
        let naive = self.to_naive()?;
        match convention {
            TimeConvention::Utc => Some(naive.and_utc().timestamp()),
            TimeConvention::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp()),
        }
    }
}

/// Result of comparing the camera clock against the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCheck {
    pub camera_epoch: i64,
    pub host_epoch: i64,
    pub drift_secs: i64,
}

impl TimeCheck {
    pub fn new(camera_epoch: i64, host_epoch: i64) -> Self {
        Self {
            camera_epoch,
            host_epoch,
            drift_secs: (camera_epoch + RESPONSE_LATENCY_SECS - host_epoch).abs(),
        }
    }

    pub fn needs_resync(&self) -> bool {
        self.drift_secs > DRIFT_THRESHOLD_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_decodes_to_utc_epoch() {
        let values = vec![vec![0x07, 0xE8, 6, 1, 12, 0, 0, 0]];
        let clock = CameraClock::from_response(&values).unwrap();
        assert_eq!(clock.year, 2024);
        assert_eq!(
            clock.to_epoch_seconds(TimeConvention::Utc),
            Some(1_717_243_200)
        );
    }

    #[test]
    fn test_short_or_invalid_response() {
        assert_eq!(CameraClock::from_response(&[]), None);
        assert_eq!(CameraClock::from_response(&[vec![0x07, 0xE8, 6]]), None);

        let clock = CameraClock::from_response(&[vec![0x07, 0xE8, 13, 1, 0, 0, 0]]).unwrap();
        assert_eq!(clock.to_epoch_seconds(TimeConvention::Utc), None);
    }

    #[test]
    fn test_clock_at_utc() {
        let instant = DateTime::from_timestamp(1_717_245_005, 0).unwrap();
        let clock = CameraClock::at(instant, TimeConvention::Utc);
        assert_eq!(
            clock,
            CameraClock {
                year: 2024,
                month: 6,
                day: 1,
                hour: 12,
                minute: 30,
                second: 5
            }
        );
    }

    #[test]
    fn test_local_convention_round_trips() {
        let instant = DateTime::from_timestamp(1_717_243_200, 0).unwrap();
        let clock = CameraClock::at(instant, TimeConvention::Local);
        assert_eq!(
            clock.to_epoch_seconds(TimeConvention::Local),
            Some(1_717_243_200)
        );
    }

    #[test]
    fn test_drift_threshold() {
        // Camera reports one second behind: latency correction cancels it
        assert_eq!(TimeCheck::new(99, 100).drift_secs, 0);
        assert!(!TimeCheck::new(104, 100).needs_resync());
        assert!(!TimeCheck::new(94, 100).needs_resync());
        assert!(TimeCheck::new(93, 100).needs_resync());
        assert!(TimeCheck::new(105, 100).needs_resync());
    }
}
