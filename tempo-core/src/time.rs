//! Time utilities: timezone-aware working windows and `HH:MM` handling.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};

pub fn parse_tz(tz: &str) -> Result<Tz> {
    tz.parse()
        .map_err(|_| SchedulerError::Validation(format!("invalid timezone: {tz}")))
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Resolve a local wall-clock time on `date` in `tz` to UTC.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant.
pub fn local_to_utc(date: NaiveDate, time: NaiveTime, tz: Tz) -> Result<DateTime<Utc>> {
    let ndt = date.and_time(time);
    tz.from_local_datetime(&ndt)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            SchedulerError::Validation(format!("nonexistent local time (DST gap): {ndt} {tz}"))
        })
}

/// The calendar date an instant falls on in `tz`.
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Working window `[start, end)` of `date` in UTC.
pub fn day_window(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    tz: Tz,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    Ok((local_to_utc(date, start, tz)?, local_to_utc(date, end, tz)?))
}

/// Round up to the next 15-minute boundary.
pub fn ceil_to_quarter_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    let trimmed = dt - Duration::seconds(dt.second().into()) - Duration::nanoseconds(dt.nanosecond().into());
    let exact = trimmed == dt;
    let add = match (dt.minute() % 15, exact) {
        (0, true) => 0,
        (r, _) => 15 - r,
    };
    trimmed + Duration::minutes(add.into())
}

/// Serde adapter storing a `NaiveTime` as `HH:MM`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_hhmm(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid HH:MM time: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chicago_working_window_in_utc() {
        // Feb is CST (UTC-6)
        let tz = parse_tz("America/Chicago").unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 2, 20).unwrap();
        let (start, end) = day_window(
            date,
            parse_hhmm("09:00").unwrap(),
            parse_hhmm("17:00").unwrap(),
            tz,
        )
        .unwrap();
        assert_eq!(start.to_rfc3339(), "2026-02-20T15:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2026-02-20T23:00:00+00:00");
        assert_eq!(local_date(end, tz), date);
    }

    #[test]
    fn invalid_timezone_is_validation_error() {
        assert!(matches!(
            parse_tz("Mars/Olympus"),
            Err(SchedulerError::Validation(_))
        ));
    }

    #[test]
    fn spring_forward_gap_is_rejected() {
        let tz = parse_tz("America/Chicago").unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        assert!(local_to_utc(date, parse_hhmm("02:30").unwrap(), tz).is_err());
    }

    #[test]
    fn quarter_hour_rounding() {
        let at = |h, m, s| Utc.with_ymd_and_hms(2026, 2, 20, h, m, s).unwrap();
        assert_eq!(ceil_to_quarter_hour(at(9, 0, 0)), at(9, 0, 0));
        assert_eq!(ceil_to_quarter_hour(at(9, 0, 1)), at(9, 15, 0));
        assert_eq!(ceil_to_quarter_hour(at(9, 7, 0)), at(9, 15, 0));
        assert_eq!(ceil_to_quarter_hour(at(9, 50, 30)), at(10, 0, 0));
    }

    #[test]
    fn hhmm_accepts_seconds_and_rejects_garbage() {
        assert_eq!(parse_hhmm("17:30:00"), NaiveTime::from_hms_opt(17, 30, 0));
        assert_eq!(parse_hhmm("5pm"), None);
    }
}
